//! Outcome enums for cart mutations and checkout runs.

use serde::{Deserialize, Serialize};

/// Settled result of an optimistic cart mutation.
///
/// Between the local change and the server's answer the line is pending in
/// the cart store; an outcome exists only once the mutation has settled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// The server acknowledged the change.
    Confirmed,
    /// The server rejected or never acknowledged the change; the local
    /// state was restored.
    RolledBack {
        /// Message surfaced to the user.
        reason: String,
    },
}

impl MutationOutcome {
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// How a checkout run ended, for user-facing messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// The snapshot had no lines.
    Empty,
    AllSucceeded,
    PartialSuccess,
    TotalFailure,
}

/// Aggregate counts of a checkout run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckoutSummary {
    /// Lines whose sale the server acknowledged.
    pub purchased: u32,
    /// Lines that were not purchased, whether queued or skipped.
    pub failed: u32,
    /// Subset of `failed` preserved in the pending-sale queue.
    pub queued: u32,
    /// Subset of `failed` skipped because their product was unknown.
    pub unresolved: u32,
}

impl CheckoutSummary {
    /// Classify the run.
    #[must_use]
    pub const fn outcome(&self) -> CheckoutOutcome {
        match (self.purchased, self.failed) {
            (0, 0) => CheckoutOutcome::Empty,
            (_, 0) => CheckoutOutcome::AllSucceeded,
            (0, _) => CheckoutOutcome::TotalFailure,
            _ => CheckoutOutcome::PartialSuccess,
        }
    }
}
