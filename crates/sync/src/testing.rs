//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tidecart_core::{Email, LineId, ProductId, SaleRequest};
use tokio::sync::Semaphore;

use crate::backend::{BackendError, CartBackend, CatalogProduct};
use crate::http::NetworkError;
use crate::retry::{RetryClassify, RetryPolicy};

#[derive(Default)]
struct FakeState {
    cart: Option<Value>,
    cart_error: Option<BackendError>,
    catalog: Vec<CatalogProduct>,
    catalog_error: Option<BackendError>,
    mutation_error: Option<BackendError>,
    sale_errors: HashMap<ProductId, NetworkError>,
    sales: Vec<SaleRequest>,
    calls: Vec<String>,
    gate: Option<Arc<Semaphore>>,
    fetch_gate: Option<Arc<Semaphore>>,
}

/// Scriptable [`CartBackend`].
///
/// `register_sale` simulates the retry loop: a transient failure counts
/// `policy.attempts()` attempts, a terminal one counts one.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    fetch_calls: AtomicU32,
    catalog_calls: AtomicU32,
    sale_attempts: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_cart(&self, payload: Value) {
        self.state().cart = Some(payload);
    }

    pub fn fail_cart(&self, error: impl Into<BackendError>) {
        self.state().cart_error = Some(error.into());
    }

    pub fn set_catalog(&self, products: Vec<CatalogProduct>) {
        self.state().catalog = products;
    }

    pub fn fail_catalog(&self, error: NetworkError) {
        self.state().catalog_error = Some(error.into());
    }

    pub fn fail_mutations(&self, error: NetworkError) {
        self.state().mutation_error = Some(error.into());
    }

    pub fn heal_mutations(&self) {
        self.state().mutation_error = None;
    }

    pub fn fail_sales_for(&self, product_id: ProductId, error: NetworkError) {
        self.state().sale_errors.insert(product_id, error);
    }

    pub fn heal_sales(&self) {
        self.state().sale_errors.clear();
    }

    /// Hold every cart mutation until [`FakeBackend::release`] is called.
    pub fn hold_mutations(&self) {
        self.state().gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.state().gate.take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Answer cart reads with the payload current at request time, but only
    /// after [`FakeBackend::release_fetches`].
    pub fn hold_fetches(&self) {
        self.state().fetch_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_fetches(&self) {
        if let Some(gate) = self.state().fetch_gate.take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn sales(&self) -> Vec<SaleRequest> {
        self.state().sales.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn catalog_calls(&self) -> u32 {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    pub fn sale_attempts(&self) -> u32 {
        self.sale_attempts.load(Ordering::SeqCst)
    }

    async fn mutate(&self, call: String) -> Result<(), BackendError> {
        let gate = {
            let mut state = self.state();
            state.calls.push(call);
            state.gate.clone()
        };
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        match self.state().mutation_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CartBackend for FakeBackend {
    async fn fetch_cart(&self, _email: &Email) -> Result<Value, BackendError> {
        let (answer, gate) = {
            let state = self.state();
            let answer = state.cart_error.clone().map_or_else(
                || Ok(state.cart.clone().unwrap_or_else(|| json!({ "carrinho": [] }))),
                Err,
            );
            (answer, state.fetch_gate.clone())
        };
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        answer
    }

    async fn add_line(
        &self,
        _email: &Email,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), BackendError> {
        self.mutate(format!("add {product_id} x{quantity}")).await
    }

    async fn remove_line(&self, line_id: &LineId) -> Result<(), BackendError> {
        self.mutate(format!("remove {line_id}")).await
    }

    async fn update_quantity(&self, line_id: &LineId, quantity: u32) -> Result<(), BackendError> {
        self.mutate(format!("update {line_id} {quantity}")).await
    }

    async fn clear_cart(&self, email: &Email) -> Result<(), BackendError> {
        self.mutate(format!("clear {email}")).await
    }

    async fn list_products(&self) -> Result<Vec<CatalogProduct>, BackendError> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(error) = &state.catalog_error {
            return Err(error.clone());
        }
        Ok(state.catalog.clone())
    }

    async fn register_sale(
        &self,
        sale: &SaleRequest,
        policy: &RetryPolicy,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state
            .calls
            .push(format!("sale {} x{}", sale.product_id, sale.quantity));
        if let Some(error) = state.sale_errors.get(&sale.product_id).cloned() {
            let attempts = if error.is_transient(policy) {
                policy.attempts()
            } else {
                1
            };
            self.sale_attempts.fetch_add(attempts, Ordering::SeqCst);
            return Err(error.into());
        }
        self.sale_attempts.fetch_add(1, Ordering::SeqCst);
        state.sales.push(sale.clone());
        Ok(())
    }
}

/// Catalog entry shorthand.
pub fn product(id: i64, name: &str) -> CatalogProduct {
    CatalogProduct {
        id: ProductId::new(id),
        name: name.to_string(),
        image_ref: None,
    }
}

pub fn email() -> Email {
    Email::parse("ana@loja.com").unwrap()
}
