//! Screen-level cart controller.
//!
//! [`CartSession`] owns one cart store, one pending-sale queue and the
//! collaborators they need, and exposes the operations a cart screen
//! performs. It is the only place that turns failures into user notices.

use std::sync::{Arc, Mutex, PoisonError};

use rust_decimal::Decimal;
use thiserror::Error;
use tidecart_core::{
    CartLine, CheckoutOutcome, CheckoutSummary, Email, LineId, MutationOutcome, ProductId,
};
use tracing::{info, instrument};

use crate::backend::{BackendError, CartBackend, HttpCartBackend};
use crate::checkout::{CheckoutError, CheckoutSequencer};
use crate::config::SyncConfig;
use crate::http::RetryClient;
use crate::notify::{Notice, NoticeLevel, Notifier};
use crate::queue::{FlushReport, PendingSaleQueue, QueueError};
use crate::reconciler::{ReconcileError, Reconciler};
use crate::scheduler::{FlushHandle, spawn_flush_task};
use crate::session::SessionProvider;
use crate::storage::{FileStore, KeyValueStore};
use crate::store::{MutationTicket, QuantityChange, SharedCart, StoreError};

/// Errors returned by [`CartSession`] operations.
///
/// Server-side rejections of optimistic mutations are not errors; they come
/// back as [`MutationOutcome::RolledBack`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<CheckoutError> for SessionError {
    fn from(error: CheckoutError) -> Self {
        match error {
            CheckoutError::NotLoggedIn => Self::NotLoggedIn,
        }
    }
}

impl SessionError {
    fn user_message(&self) -> String {
        match self {
            Self::Reconcile(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Everything a cart screen does.
pub struct CartSession {
    backend: Arc<dyn CartBackend>,
    session: Arc<dyn SessionProvider>,
    notifier: Arc<dyn Notifier>,
    cart: SharedCart,
    reconciler: Reconciler,
    queue: Arc<PendingSaleQueue>,
    checkout: CheckoutSequencer,
    config: SyncConfig,
    client: Option<RetryClient>,
    flush: Mutex<Option<FlushHandle>>,
}

impl std::fmt::Debug for CartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSession")
            .field("cart", &self.cart)
            .field("queue", &self.queue)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl CartSession {
    /// Assemble a session from its collaborators.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        backend: Arc<dyn CartBackend>,
        storage: Arc<dyn KeyValueStore>,
        session: Arc<dyn SessionProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let queue = Arc::new(PendingSaleQueue::new(
            storage,
            Arc::clone(&backend),
            config.queue_key.clone(),
            config.policies.flush,
        ));
        let checkout = CheckoutSequencer::new(
            Arc::clone(&backend),
            Arc::clone(&queue),
            config.policies.checkout,
        );
        Self {
            reconciler: Reconciler::new(Arc::clone(&backend)),
            backend,
            session,
            notifier,
            cart: SharedCart::default(),
            queue,
            checkout,
            config,
            client: None,
            flush: Mutex::new(None),
        }
    }

    /// Session talking to the configured server over HTTP, persisting its
    /// queue under the configured state directory.
    ///
    /// Requests use the session's bearer token when it has one, otherwise
    /// the configured API token.
    pub async fn connect(
        config: SyncConfig,
        session: Arc<dyn SessionProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let token = match session.bearer_token().await {
            Some(token) => Some(token),
            None => config.api_token.clone(),
        };
        let client = RetryClient::new(config.api_url.clone(), token).scoped();
        let backend: Arc<dyn CartBackend> =
            Arc::new(HttpCartBackend::new(client.clone(), config.policies));
        let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.state_dir.clone()));

        let mut this = Self::new(config, backend, storage, session, notifier);
        this.client = Some(client);
        this
    }

    /// The live cart.
    #[must_use]
    pub const fn cart(&self) -> &SharedCart {
        &self.cart
    }

    #[must_use]
    pub fn lines(&self) -> Vec<CartLine> {
        self.cart.snapshot()
    }

    #[must_use]
    pub fn total_value(&self) -> Decimal {
        self.cart.total_value()
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<PendingSaleQueue> {
        &self.queue
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The cart came into view: reconcile with the server, then replay
    /// queued sales.
    ///
    /// # Errors
    ///
    /// Returns the reconciliation error; the local cart is then unchanged.
    #[instrument(skip(self))]
    pub async fn on_focus(&self) -> Result<Vec<CartLine>, SessionError> {
        let email = self.session.client_email().await;
        let lines = match self.reconciler.reconcile(email.as_ref(), &self.cart).await {
            Ok(lines) => lines,
            Err(e) => return Err(self.fail("Could not load cart", e.into())),
        };

        if self.has_flush_timer() {
            self.with_flush(|handle| handle.focus());
        } else if let Some(email) = &email {
            if let Err(e) = self.queue.flush(Some(email)).await {
                return Err(self.fail("Could not replay pending purchases", e.into()));
            }
        }
        Ok(lines)
    }

    /// Reconcile without flushing.
    ///
    /// # Errors
    ///
    /// Returns the reconciliation error; the local cart is then unchanged.
    pub async fn refresh(&self) -> Result<Vec<CartLine>, SessionError> {
        let email = self.session.client_email().await;
        self.reconciler
            .reconcile(email.as_ref(), &self.cart)
            .await
            .map_err(|e| self.fail("Could not load cart", e.into()))
    }

    /// Change a line's quantity by `delta`, optimistically.
    ///
    /// The server receives the resulting absolute quantity, or a removal
    /// when it reaches zero.
    ///
    /// # Errors
    ///
    /// Returns `NotLoggedIn` or a store error for an unknown line.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn change_quantity(
        &self,
        line_id: &LineId,
        delta: i64,
    ) -> Result<MutationOutcome, SessionError> {
        self.require_email().await?;
        let applied = self
            .cart
            .with(|store| store.apply_quantity_delta(line_id, delta))
            .map_err(|e| self.fail("Could not update quantity", e.into()))?;

        let result = match applied.change {
            QuantityChange::Updated(quantity) => {
                self.backend.update_quantity(line_id, quantity).await
            }
            QuantityChange::Removed => self.backend.remove_line(line_id).await,
        };
        Ok(self.settle(applied.ticket, result, "Could not update quantity"))
    }

    /// Remove a line, optimistically.
    ///
    /// # Errors
    ///
    /// Returns `NotLoggedIn` or a store error for an unknown line.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn remove_line(&self, line_id: &LineId) -> Result<MutationOutcome, SessionError> {
        self.require_email().await?;
        let ticket = self
            .cart
            .with(|store| store.remove(line_id))
            .map_err(|e| self.fail("Could not remove item", e.into()))?;
        let result = self.backend.remove_line(line_id).await;
        Ok(self.settle(ticket, result, "Could not remove item"))
    }

    /// Empty the cart, optimistically.
    ///
    /// # Errors
    ///
    /// Returns `NotLoggedIn`.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<MutationOutcome, SessionError> {
        let email = self.require_email().await?;
        let ticket = self.cart.with(|store| store.clear());
        let result = self.backend.clear_cart(&email).await;
        Ok(self.settle(ticket, result, "Could not clear cart"))
    }

    /// Add a product. The server assigns the line, so the cart is
    /// reconciled afterwards instead of being mutated locally.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` for zero, or `NotLoggedIn`.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_product(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<MutationOutcome, SessionError> {
        if quantity == 0 {
            return Err(self.fail("Could not add item", SessionError::InvalidQuantity));
        }
        let email = self.require_email().await?;

        if let Err(e) = self.backend.add_line(&email, product_id, quantity).await {
            let reason = e.user_message();
            self.notifier
                .notify(Notice::error("Could not add item", reason.clone()));
            return Ok(MutationOutcome::RolledBack { reason });
        }

        match self.reconciler.reconcile(Some(&email), &self.cart).await {
            Ok(_) => {}
            Err(e) => {
                self.notifier
                    .notify(Notice::error("Could not load cart", e.user_message()));
            }
        }
        Ok(MutationOutcome::Confirmed)
    }

    /// Buy everything in the cart and report the result with one notice.
    ///
    /// # Errors
    ///
    /// Returns `NotLoggedIn`.
    #[instrument(skip(self))]
    pub async fn checkout_all(&self) -> Result<CheckoutSummary, SessionError> {
        let email = self.require_email().await?;
        let snapshot = self.cart.snapshot();
        let summary = self
            .checkout
            .checkout_all(Some(&email), snapshot, &self.cart)
            .await?;
        self.notifier.notify(checkout_notice(&summary));
        Ok(summary)
    }

    /// Replay the current client's queued sales now.
    ///
    /// # Errors
    ///
    /// Returns `NotLoggedIn` or a queue storage error.
    pub async fn flush_pending(&self) -> Result<FlushReport, SessionError> {
        let email = self.require_email().await?;
        self.queue
            .flush(Some(&email))
            .await
            .map_err(|e| self.fail("Could not replay pending purchases", e.into()))
    }

    /// Start the periodic flush, if it is not already running.
    pub fn start_flush_timer(&self) {
        let mut slot = self.flush.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(spawn_flush_task(
                Arc::clone(&self.queue),
                Arc::clone(&self.session),
                self.config.flush_interval,
            ));
        }
    }

    /// Stop the flush timer and cancel outstanding network retries.
    pub async fn shutdown(&self) {
        let handle = self
            .flush
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        if let Some(client) = &self.client {
            client.cancel_all();
        }
        info!("Cart session shut down");
    }

    fn has_flush_timer(&self) -> bool {
        self.flush
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn with_flush(&self, f: impl FnOnce(&FlushHandle)) {
        if let Some(handle) = self
            .flush
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            f(handle);
        }
    }

    async fn require_email(&self) -> Result<Email, SessionError> {
        match self.session.client_email().await {
            Some(email) => Ok(email),
            None => Err(self.fail("Not logged in", SessionError::NotLoggedIn)),
        }
    }

    /// Confirm or roll back an optimistic mutation from the server's answer.
    fn settle(
        &self,
        ticket: MutationTicket,
        result: Result<(), BackendError>,
        title: &str,
    ) -> MutationOutcome {
        match result {
            Ok(()) => {
                self.cart.with(|store| store.confirm(ticket));
                MutationOutcome::Confirmed
            }
            Err(e) => {
                self.cart.with(|store| store.rollback(ticket));
                let reason = e.user_message();
                self.notifier.notify(Notice::error(title, reason.clone()));
                MutationOutcome::RolledBack { reason }
            }
        }
    }

    /// Report `error` to the user and hand it back.
    fn fail(&self, title: &str, error: SessionError) -> SessionError {
        self.notifier
            .notify(Notice::error(title, error.user_message()));
        error
    }
}

/// The single notice summarizing a checkout run.
#[must_use]
pub fn checkout_notice(summary: &CheckoutSummary) -> Notice {
    let queued = if summary.queued > 0 {
        format!(
            " {} will be retried automatically.",
            plural(summary.queued, "purchase", "purchases")
        )
    } else {
        String::new()
    };
    match summary.outcome() {
        CheckoutOutcome::Empty => Notice::new(NoticeLevel::Info, "Checkout", "Your cart is empty."),
        CheckoutOutcome::AllSucceeded => Notice::new(
            NoticeLevel::Success,
            "Purchase complete",
            format!("{} bought.", plural(summary.purchased, "item", "items")),
        ),
        CheckoutOutcome::PartialSuccess => Notice::new(
            NoticeLevel::Warning,
            "Purchase partially complete",
            format!(
                "{} bought, {} failed.{queued}",
                plural(summary.purchased, "item", "items"),
                summary.failed
            ),
        ),
        CheckoutOutcome::TotalFailure => Notice::new(
            NoticeLevel::Error,
            "Purchase failed",
            format!(
                "{} could not be bought.{queued}",
                plural(summary.failed, "item", "items")
            ),
        ),
    }
}

fn plural(count: u32, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{count} {one}")
    } else {
        format!("{count} {many}")
    }
}
