//! Cart line type.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{LineId, ProductId};
use super::money::line_total;

/// One product entry in a cart.
///
/// `line_total` always equals `unit_price * quantity`; every mutator that
/// touches the quantity re-derives it. A line whose `product_id` is still
/// unknown after identity resolution can be displayed but not purchased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Server-assigned line identifier, stable across reconciliations.
    pub line_id: LineId,
    /// Catalog product, when known or resolved.
    pub product_id: Option<ProductId>,
    /// Display name; also the resolver's matching key.
    pub product_name: String,
    /// Units in the cart. Zero is never stored.
    pub quantity: u32,
    /// Price of one unit.
    pub unit_price: Decimal,
    /// `unit_price * quantity`, derived locally.
    pub line_total: Decimal,
    /// Image file reference, when the payload or catalog provides one.
    pub image_ref: Option<String>,
}

impl CartLine {
    /// Create a line, deriving its total.
    #[must_use]
    pub fn new(
        line_id: LineId,
        product_id: Option<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Decimal,
    ) -> Self {
        Self {
            line_id,
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            line_total: line_total(unit_price, quantity),
            image_ref: None,
        }
    }

    /// Attach an image reference.
    #[must_use]
    pub fn with_image(mut self, image_ref: Option<String>) -> Self {
        self.image_ref = image_ref;
        self
    }

    /// Set the quantity and re-derive the line total.
    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.line_total = line_total(self.unit_price, quantity);
    }

    /// Whether a sale can be registered for this line.
    #[must_use]
    pub const fn is_purchasable(&self) -> bool {
        self.product_id.is_some()
    }
}
