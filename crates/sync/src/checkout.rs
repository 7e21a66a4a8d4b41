//! Checkout sequencing.
//!
//! Buys every line of a cart snapshot, one line at a time. Line N+1 is not
//! started before line N has finished, including its server-side removal.
//!
//! Per line:
//! - unresolvable product: skipped, line kept
//! - sale acknowledged: line removed from the server cart and locally
//! - sale rejected by the server (4xx): line kept, nothing queued
//! - retries exhausted: sale queued, line removed locally only

use std::sync::Arc;

use thiserror::Error;
use tidecart_core::{CartLine, CheckoutSummary, Email, SaleRequest};
use tracing::{error, info, instrument, warn};

use crate::backend::CartBackend;
use crate::queue::PendingSaleQueue;
use crate::resolver::ResolutionPass;
use crate::retry::RetryPolicy;
use crate::store::SharedCart;

/// Errors that stop a checkout before any line is processed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("not logged in")]
    NotLoggedIn,
}

/// What happened to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineResult {
    Purchased,
    Queued,
    Rejected,
    Unresolved,
    Lost,
}

/// Drives the buy-everything workflow.
pub struct CheckoutSequencer {
    backend: Arc<dyn CartBackend>,
    queue: Arc<PendingSaleQueue>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for CheckoutSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutSequencer")
            .field("queue", &self.queue)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CheckoutSequencer {
    /// Create a sequencer registering sales with `policy`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CartBackend>,
        queue: Arc<PendingSaleQueue>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            queue,
            policy,
        }
    }

    /// Buy every line of `snapshot`.
    ///
    /// `snapshot` is taken by the caller before the run; edits to `cart`
    /// made while the run is in progress do not change which lines are
    /// bought. Purchased and queued lines are removed from `cart`.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::NotLoggedIn` when `client_email` is `None`.
    /// Per-line failures are counted in the summary, not returned.
    #[instrument(skip_all, fields(lines = snapshot.len()))]
    pub async fn checkout_all(
        &self,
        client_email: Option<&Email>,
        snapshot: Vec<CartLine>,
        cart: &SharedCart,
    ) -> Result<CheckoutSummary, CheckoutError> {
        let client_email = client_email.ok_or(CheckoutError::NotLoggedIn)?;
        let mut pass = ResolutionPass::new(self.backend.as_ref());
        let mut summary = CheckoutSummary::default();

        for line in snapshot {
            let result = self.checkout_line(client_email, line, &mut pass, cart).await;
            match result {
                LineResult::Purchased => summary.purchased += 1,
                LineResult::Queued => {
                    summary.failed += 1;
                    summary.queued += 1;
                }
                LineResult::Unresolved => {
                    summary.failed += 1;
                    summary.unresolved += 1;
                }
                LineResult::Rejected | LineResult::Lost => summary.failed += 1,
            }
        }

        info!(
            purchased = summary.purchased,
            failed = summary.failed,
            queued = summary.queued,
            unresolved = summary.unresolved,
            "Checkout finished"
        );
        Ok(summary)
    }

    async fn checkout_line(
        &self,
        client_email: &Email,
        mut line: CartLine,
        pass: &mut ResolutionPass<'_>,
        cart: &SharedCart,
    ) -> LineResult {
        match pass.resolve(&line.product_name, line.product_id).await {
            Ok(resolution) => line.product_id = Some(resolution.product_id),
            Err(e) => {
                warn!(line_id = %line.line_id, error = %e, "Skipping unresolved line");
                return LineResult::Unresolved;
            }
        }
        let Some(sale) = SaleRequest::for_line(client_email, &line) else {
            return LineResult::Unresolved;
        };

        match self.backend.register_sale(&sale, &self.policy).await {
            Ok(()) => {
                if let Err(e) = self.backend.remove_line(&line.line_id).await {
                    warn!(
                        line_id = %line.line_id,
                        error = %e,
                        "Sale registered but server line not removed"
                    );
                }
                cart.with(|store| store.discard(&line.line_id));
                LineResult::Purchased
            }
            Err(e) if e.is_client_error() => {
                warn!(line_id = %line.line_id, error = %e, "Sale rejected by server");
                LineResult::Rejected
            }
            Err(e) => {
                warn!(line_id = %line.line_id, error = %e, "Sale not confirmed, queueing");
                match self.queue.enqueue(sale).await {
                    Ok(_) => {
                        cart.with(|store| store.discard(&line.line_id));
                        LineResult::Queued
                    }
                    Err(queue_error) => {
                        error!(
                            line_id = %line.line_id,
                            error = %queue_error,
                            "Could not queue sale, keeping line"
                        );
                        LineResult::Lost
                    }
                }
            }
        }
    }
}
