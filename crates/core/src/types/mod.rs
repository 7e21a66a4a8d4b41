//! Core types for Tidecart.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod cart;
pub mod email;
pub mod id;
pub mod money;
pub mod sale;
pub mod status;

pub use cart::CartLine;
pub use email::{Email, EmailError};
pub use id::*;
pub use money::{checked_line_total, line_total, total_value};
pub use sale::{PendingSale, SaleRequest};
pub use status::*;
