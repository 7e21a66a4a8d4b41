//! Cart reconciliation.
//!
//! Pulls the server cart, normalizes it, fills in missing product
//! identities and merges the result into the local store. A failed read
//! never touches the local cart.

use std::sync::Arc;

use thiserror::Error;
use tidecart_core::{CartLine, Email};
use tracing::{info, instrument, warn};

use crate::backend::{BackendError, CartBackend, MalformedPayload, normalize};
use crate::http::NetworkError;
use crate::resolver::ResolutionPass;
use crate::store::SharedCart;

/// Errors returned by reconciliation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// No client identity is available.
    #[error("not logged in")]
    NotLoggedIn,

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    MalformedResponse(#[from] MalformedPayload),
}

impl From<BackendError> for ReconcileError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Network(e) => Self::Network(e),
            BackendError::Malformed(e) => Self::MalformedResponse(e),
        }
    }
}

impl ReconcileError {
    /// Message to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Reconciles the local cart with the server.
#[derive(Clone)]
pub struct Reconciler {
    backend: Arc<dyn CartBackend>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(backend: Arc<dyn CartBackend>) -> Self {
        Self { backend }
    }

    /// Fetch and enrich the server cart without touching any local state.
    ///
    /// Lines whose product cannot be resolved are kept, unpurchasable.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::NotLoggedIn` without a network call when
    /// `email` is `None`, otherwise network or payload errors.
    #[instrument(skip(self, email))]
    pub async fn fetch_lines(
        &self,
        email: Option<&Email>,
    ) -> Result<Vec<CartLine>, ReconcileError> {
        let email = email.ok_or(ReconcileError::NotLoggedIn)?;
        let payload = self.backend.fetch_cart(email).await?;
        let mut lines = normalize::cart_lines(&payload)?;

        let mut pass = ResolutionPass::new(self.backend.as_ref());
        for line in &mut lines {
            if line.product_id.is_some() {
                continue;
            }
            if line.product_name.trim().is_empty() {
                warn!(line_id = %line.line_id, "Line has neither product id nor name");
                continue;
            }
            match pass.resolve(&line.product_name, None).await {
                Ok(resolution) => {
                    line.product_id = Some(resolution.product_id);
                    if line.image_ref.is_none() {
                        line.image_ref = resolution.image_ref;
                    }
                }
                Err(e) => {
                    warn!(
                        line_id = %line.line_id,
                        product = %line.product_name,
                        error = %e,
                        "Line left unpurchasable"
                    );
                }
            }
        }
        Ok(lines)
    }

    /// Fetch the server cart and merge it into `cart`.
    ///
    /// Returns the merged lines.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::fetch_lines`]. On error `cart` is unchanged.
    pub async fn reconcile(
        &self,
        email: Option<&Email>,
        cart: &SharedCart,
    ) -> Result<Vec<CartLine>, ReconcileError> {
        let since = cart.with(|store| store.epoch());
        let lines = self.fetch_lines(email).await?;
        let unresolved = lines.iter().filter(|l| !l.is_purchasable()).count();
        let merged = cart.with(|store| {
            store.replace_all(lines, since);
            store.snapshot()
        });
        info!(lines = merged.len(), unresolved, "Cart reconciled");
        Ok(merged)
    }
}
