//! Sale registration types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cart::CartLine;
use super::email::Email;
use super::id::ProductId;

/// One purchase intent sent to the sale-registration endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    pub client_email: Email,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl SaleRequest {
    /// Build a sale for a cart line.
    ///
    /// Returns `None` when the line has no product identity yet.
    #[must_use]
    pub fn for_line(client_email: &Email, line: &CartLine) -> Option<Self> {
        Some(Self {
            client_email: client_email.clone(),
            product_id: line.product_id?,
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
    }
}

/// A sale that exhausted its retry budget and waits in the durable queue.
///
/// `id` is local bookkeeping only; it lets a flush remove exactly the entries
/// it confirmed even if other entries were appended meanwhile. It is never
/// sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSale {
    pub id: Uuid,
    pub client_email: Email,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingSale {
    /// Wrap a sale request for queueing, stamped with `enqueued_at`.
    #[must_use]
    pub fn new(sale: SaleRequest, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_email: sale.client_email,
            product_id: sale.product_id,
            quantity: sale.quantity,
            unit_price: sale.unit_price,
            enqueued_at,
        }
    }

    /// The request to replay for this entry.
    #[must_use]
    pub fn to_request(&self) -> SaleRequest {
        SaleRequest {
            client_email: self.client_email.clone(),
            product_id: self.product_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
        }
    }
}
