//! HTTP implementation of [`CartBackend`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tidecart_core::{Email, LineId, ProductId, SaleRequest};
use tracing::instrument;

use super::normalize::{CatalogProduct, catalog_products};
use super::{BackendError, CartBackend};
use crate::config::RetryPolicies;
use crate::http::{ApiRequest, RetryClient};
use crate::retry::RetryPolicy;

/// Cart server reached over HTTP through the retry client.
#[derive(Debug, Clone)]
pub struct HttpCartBackend {
    client: RetryClient,
    policies: RetryPolicies,
}

impl HttpCartBackend {
    #[must_use]
    pub const fn new(client: RetryClient, policies: RetryPolicies) -> Self {
        Self { client, policies }
    }

    /// The underlying retry client.
    #[must_use]
    pub const fn client(&self) -> &RetryClient {
        &self.client
    }

    async fn send(&self, request: ApiRequest, policy: &RetryPolicy) -> Result<Value, BackendError> {
        Ok(self.client.send(&request, policy).await?.body)
    }
}

#[async_trait]
impl CartBackend for HttpCartBackend {
    #[instrument(skip(self), fields(email = %email))]
    async fn fetch_cart(&self, email: &Email) -> Result<Value, BackendError> {
        self.send(
            ApiRequest::get(["carrinho", email.as_str()]),
            &self.policies.cart_read,
        )
        .await
    }

    #[instrument(skip(self), fields(email = %email, product_id = %product_id))]
    async fn add_line(
        &self,
        email: &Email,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), BackendError> {
        let body = json!({
            "email_cliente": email.as_str(),
            "id_produto": product_id.as_i64(),
            "quantidade": quantity,
        });
        self.send(
            ApiRequest::post(["carrinho", "adicionar"], body),
            &self.policies.cart_mutation,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(line_id = %line_id))]
    async fn remove_line(&self, line_id: &LineId) -> Result<(), BackendError> {
        self.send(
            ApiRequest::delete(["carrinho", "remover", line_id.as_str()]),
            &self.policies.cart_mutation,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(line_id = %line_id))]
    async fn update_quantity(&self, line_id: &LineId, quantity: u32) -> Result<(), BackendError> {
        self.send(
            ApiRequest::put(
                ["carrinho", "atualizar", line_id.as_str()],
                json!({ "quantidade": quantity }),
            ),
            &self.policies.cart_mutation,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(email = %email))]
    async fn clear_cart(&self, email: &Email) -> Result<(), BackendError> {
        self.send(
            ApiRequest::delete(["carrinho", "limpar", email.as_str()]),
            &self.policies.cart_mutation,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_products(&self) -> Result<Vec<CatalogProduct>, BackendError> {
        let body = self
            .send(ApiRequest::get(["produtos"]), &self.policies.catalog)
            .await?;
        Ok(catalog_products(&body)?)
    }

    #[instrument(
        skip(self, sale, policy),
        fields(product_id = %sale.product_id, quantity = sale.quantity)
    )]
    async fn register_sale(
        &self,
        sale: &SaleRequest,
        policy: &RetryPolicy,
    ) -> Result<(), BackendError> {
        let body = json!({
            "email_cliente": sale.client_email.as_str(),
            "id_produto": sale.product_id.as_i64(),
            "quantidade": sale.quantity,
            "valor_unitario": decimal_json(sale.unit_price),
        });
        self.send(ApiRequest::post(["vendas"], body), policy).await?;
        Ok(())
    }
}

/// Decimals go over the wire as JSON numbers, the same way the server sends
/// them.
fn decimal_json(value: Decimal) -> Value {
    serde_json::from_str(&value.to_string()).unwrap_or_else(|_| Value::String(value.to_string()))
}
