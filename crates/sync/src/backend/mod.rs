//! Cart server collaborators.
//!
//! [`CartBackend`] is the seam between the engine and the cart server: the
//! reconciler, checkout sequencer and pending-sale queue only ever talk to
//! the trait. [`HttpCartBackend`] implements it over the retry client; tests
//! substitute in-memory fakes.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |---|---|
//! | fetch cart | `GET carrinho/{email}` |
//! | add line | `POST carrinho/adicionar` |
//! | remove line | `DELETE carrinho/remover/{line}` |
//! | update quantity | `PUT carrinho/atualizar/{line}` |
//! | clear cart | `DELETE carrinho/limpar/{email}` |
//! | list products | `GET produtos` |
//! | register sale | `POST vendas` |

mod http;
pub mod normalize;

pub use http::HttpCartBackend;
pub use normalize::{CatalogProduct, MalformedPayload};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tidecart_core::{Email, LineId, ProductId, SaleRequest};

use crate::http::NetworkError;
use crate::retry::RetryPolicy;

/// Errors returned by a [`CartBackend`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The request failed after retries, or was rejected.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The server answered with a payload the engine cannot read.
    #[error(transparent)]
    Malformed(#[from] MalformedPayload),
}

impl BackendError {
    /// Whether the server rejected the request itself (4xx).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        match self {
            Self::Network(e) => e.is_client_error(),
            Self::Malformed(_) => false,
        }
    }

    /// Message to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(e) => e.user_message(),
            Self::Malformed(e) => e.to_string(),
        }
    }
}

/// Operations the engine needs from the cart server.
#[async_trait]
pub trait CartBackend: Send + Sync {
    /// Raw cart payload for a client.
    async fn fetch_cart(&self, email: &Email) -> Result<Value, BackendError>;

    /// Add `quantity` units of a product to the client's cart.
    async fn add_line(
        &self,
        email: &Email,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), BackendError>;

    /// Remove one line from the server cart.
    async fn remove_line(&self, line_id: &LineId) -> Result<(), BackendError>;

    /// Set a line's absolute quantity.
    async fn update_quantity(&self, line_id: &LineId, quantity: u32) -> Result<(), BackendError>;

    /// Empty the client's cart.
    async fn clear_cart(&self, email: &Email) -> Result<(), BackendError>;

    /// Full catalog listing.
    async fn list_products(&self) -> Result<Vec<CatalogProduct>, BackendError>;

    /// Register one sale, retrying per `policy`.
    async fn register_sale(
        &self,
        sale: &SaleRequest,
        policy: &RetryPolicy,
    ) -> Result<(), BackendError>;
}
