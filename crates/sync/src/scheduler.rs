//! Background flushing of the pending-sale queue.
//!
//! The flush task runs on a fixed interval and whenever the front end
//! signals that the cart came into focus. It stops when its handle is shut
//! down or dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::queue::{FlushReport, PendingSaleQueue};
use crate::session::SessionProvider;

/// Handle to a running flush task.
#[derive(Debug)]
pub struct FlushHandle {
    shutdown: CancellationToken,
    focus: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl FlushHandle {
    /// Request an immediate flush.
    pub fn focus(&self) {
        self.focus.notify_one();
    }

    /// Stop the task and wait for it to finish its current flush.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "Flush task ended abnormally");
            }
        }
    }
}

impl Drop for FlushHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawn the flush task.
///
/// The first timed flush happens one `interval` after the start.
#[must_use]
pub fn spawn_flush_task(
    queue: Arc<PendingSaleQueue>,
    session: Arc<dyn SessionProvider>,
    interval: Duration,
) -> FlushHandle {
    let shutdown = CancellationToken::new();
    let focus = Arc::new(Notify::new());
    let join = tokio::spawn(run(queue, session, interval, shutdown.clone(), Arc::clone(&focus)));
    FlushHandle {
        shutdown,
        focus,
        join: Some(join),
    }
}

async fn run(
    queue: Arc<PendingSaleQueue>,
    session: Arc<dyn SessionProvider>,
    interval: Duration,
    shutdown: CancellationToken,
    focus: Arc<Notify>,
) {
    info!(interval_secs = interval.as_secs(), "Flush task started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let trigger = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => "timer",
            () = focus.notified() => "focus",
        };
        if let Some(report) = flush_once(&queue, session.as_ref()).await {
            debug!(
                trigger,
                processed = report.processed,
                remaining = report.remaining,
                "Flush tick"
            );
        }
    }

    info!("Flush task stopped");
}

/// Flush the current client's entries. Returns `None` when nobody is logged
/// in or the flush failed.
pub async fn flush_once(
    queue: &PendingSaleQueue,
    session: &dyn SessionProvider,
) -> Option<FlushReport> {
    let Some(email) = session.client_email().await else {
        debug!("No client logged in, skipping flush");
        return None;
    };
    match queue.flush(Some(&email)).await {
        Ok(report) => Some(report),
        Err(e) => {
            error!(error = %e, "Pending-sale flush failed");
            None
        }
    }
}
