//! CLI subcommands.

pub mod cart;
pub mod queue;

use std::sync::Arc;

use thiserror::Error;
use tidecart_core::EmailError;
use tidecart_sync::notify::TracingNotifier;
use tidecart_sync::{CartSession, ConfigError, SessionError, StaticSession, SyncConfig};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The client e-mail is malformed.
    #[error("Invalid client e-mail: {0}")]
    InvalidEmail(#[from] EmailError),

    /// A cart operation failed.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// The operation was rolled back by the server.
    #[error("Rolled back: {0}")]
    RolledBack(String),
}

/// Load configuration and connect a cart session for `email` (or the
/// configured client when omitted).
pub async fn open_session(email: Option<&str>) -> Result<CartSession, CommandError> {
    let config = SyncConfig::from_env()?;
    let raw = email.or(config.client_email.as_deref());
    let session = StaticSession::from_stored(raw, config.api_token.clone())?;

    tracing::info!(api_url = %config.api_url, "Connecting to cart server...");
    Ok(CartSession::connect(config, Arc::new(session), Arc::new(TracingNotifier)).await)
}
