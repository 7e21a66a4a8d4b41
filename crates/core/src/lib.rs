//! Tidecart Core - Shared cart types.
//!
//! This crate provides the domain types used by the Tidecart components:
//! - `sync` - Cart synchronization engine (retry client, reconciler, checkout)
//! - `cli` - Command-line front end driving the engine
//!
//! # Architecture
//!
//! The core crate contains only types and pure arithmetic - no I/O, no HTTP
//! clients, no storage. This keeps it lightweight and allows it to be used
//! anywhere, including in tests that fake every collaborator.
//!
//! # Modules
//!
//! - [`types`] - IDs, e-mails, money helpers, cart lines, sales and outcomes

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
