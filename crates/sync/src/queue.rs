//! Pending-sale queue.
//!
//! Purchase intents whose registration never got an acknowledgement are
//! persisted here and replayed later. Delivery is at-least-once: an entry
//! leaves the queue only after the server acknowledged it, so a sale whose
//! acknowledgement was lost in transit will be sent again. The server
//! receives no idempotency key, so such a replay can register the sale twice.
//!
//! The whole list is stored as one JSON value under a fixed key and
//! read-modify-written on every change.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tidecart_core::{Email, PendingSale, SaleRequest};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::CartBackend;
use crate::retry::RetryPolicy;
use crate::storage::{KeyValueStore, StorageError};

/// Errors returned by the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Entries acknowledged by the server and removed.
    pub processed: usize,
    /// Entries still queued after the flush.
    pub remaining: usize,
}

/// Durable queue of sales awaiting registration.
pub struct PendingSaleQueue {
    storage: Arc<dyn KeyValueStore>,
    backend: Arc<dyn CartBackend>,
    key: String,
    policy: RetryPolicy,
    /// Serializes read-modify-write cycles on the stored list.
    write: Mutex<()>,
    /// Held for the duration of a flush.
    flushing: Mutex<()>,
}

impl std::fmt::Debug for PendingSaleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSaleQueue")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PendingSaleQueue {
    /// Create a queue persisted under `key`, replaying sales with `policy`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        backend: Arc<dyn CartBackend>,
        key: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            backend,
            key: key.into(),
            policy,
            write: Mutex::new(()),
            flushing: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a sale, stamped with the current time. Duplicates are kept.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the stored list cannot be read or written.
    #[instrument(skip(self, sale), fields(product_id = %sale.product_id, quantity = sale.quantity))]
    pub async fn enqueue(&self, sale: SaleRequest) -> Result<PendingSale, QueueError> {
        let pending = PendingSale::new(sale, Utc::now());
        let _guard = self.write.lock().await;
        let mut entries = self.load().await?;
        entries.push(pending.clone());
        self.save(&entries).await?;
        info!(pending_id = %pending.id, queued = entries.len(), "Sale queued for later");
        Ok(pending)
    }

    /// Every queued entry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the stored list cannot be read.
    pub async fn entries(&self) -> Result<Vec<PendingSale>, QueueError> {
        self.load().await
    }

    /// Number of queued entries.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the stored list cannot be read.
    pub async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.load().await?.len())
    }

    /// Replay the entries of `client_email`, or every entry when `None`.
    ///
    /// Each entry is sent once, in order. Acknowledged entries are removed;
    /// failed ones stay where they were. A flush that starts while another
    /// is running returns immediately without sending anything.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the stored list cannot be read or written.
    /// Sale failures are not errors; they leave the entry queued.
    #[instrument(skip(self, client_email))]
    pub async fn flush(&self, client_email: Option<&Email>) -> Result<FlushReport, QueueError> {
        let Ok(_flushing) = self.flushing.try_lock() else {
            debug!("Flush already running");
            return Ok(FlushReport {
                processed: 0,
                remaining: self.load().await?.len(),
            });
        };

        let entries = self.load().await?;
        if entries.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut confirmed: HashSet<Uuid> = HashSet::new();
        for entry in entries
            .iter()
            .filter(|e| client_email.is_none_or(|email| &e.client_email == email))
        {
            match self.backend.register_sale(&entry.to_request(), &self.policy).await {
                Ok(()) => {
                    confirmed.insert(entry.id);
                }
                Err(e) => {
                    warn!(
                        pending_id = %entry.id,
                        product_id = %entry.product_id,
                        error = %e,
                        "Queued sale still failing"
                    );
                }
            }
        }

        let remaining = if confirmed.is_empty() {
            entries.len()
        } else {
            let _guard = self.write.lock().await;
            let mut current = self.load().await?;
            current.retain(|e| !confirmed.contains(&e.id));
            self.save(&current).await?;
            current.len()
        };

        let report = FlushReport {
            processed: confirmed.len(),
            remaining,
        };
        info!(
            processed = report.processed,
            remaining = report.remaining,
            "Pending sales flushed"
        );
        Ok(report)
    }

    async fn load(&self) -> Result<Vec<PendingSale>, QueueError> {
        match self.storage.get(&self.key).await? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    async fn save(&self, entries: &[PendingSale]) -> Result<(), QueueError> {
        if entries.is_empty() {
            self.storage.remove(&self.key).await?;
        } else {
            let raw = serde_json::to_string(entries)?;
            self.storage.set(&self.key, &raw).await?;
        }
        Ok(())
    }
}
