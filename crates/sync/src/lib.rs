//! Tidecart Sync - resilient cart synchronization engine.
//!
//! Keeps a client-held cart consistent with the cart server across an
//! unreliable network. Cart edits apply locally first and are confirmed or
//! rolled back when the server answers; purchases that cannot be confirmed
//! are queued durably and replayed later.
//!
//! # Modules
//!
//! - [`retry`] / [`http`] - retry policy and the HTTP client applying it
//! - [`backend`] - the cart server seam and payload normalization
//! - [`resolver`] - product identity resolution by name
//! - [`store`] - the optimistic in-memory cart
//! - [`reconciler`] - server-to-local cart merge
//! - [`queue`] - durable pending-sale queue
//! - [`checkout`] - sequential buy-everything workflow
//! - [`controller`] - the screen-level [`CartSession`]

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod checkout;
pub mod config;
pub mod controller;
pub mod http;
pub mod notify;
pub mod queue;
pub mod reconciler;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod store;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

pub use backend::{BackendError, CartBackend, CatalogProduct, HttpCartBackend};
pub use config::{ConfigError, RetryPolicies, SyncConfig};
pub use controller::{CartSession, SessionError};
pub use http::{NetworkError, RetryClient};
pub use notify::{Notice, NoticeLevel, Notifier};
pub use queue::{FlushReport, PendingSaleQueue};
pub use retry::RetryPolicy;
pub use session::{SessionProvider, StaticSession};
pub use store::{CartStore, SharedCart};
