//! Pending-sale queue commands.
//!
//! # Usage
//!
//! ```bash
//! # List queued sales
//! tidecart queue list
//!
//! # Replay them now
//! tidecart queue flush
//!
//! # Replay them periodically until Ctrl-C
//! tidecart watch
//! ```

use tidecart_sync::{CartSession, SessionError};

use super::CommandError;

/// Print every queued sale, oldest first.
#[allow(clippy::print_stdout)]
pub async fn list(session: &CartSession) -> Result<(), CommandError> {
    let entries = session
        .queue()
        .entries()
        .await
        .map_err(SessionError::from)?;

    if entries.is_empty() {
        println!("No pending sales");
        return Ok(());
    }

    for sale in &entries {
        println!(
            "{}  {}  {} x{} @ {}  ({})",
            sale.id,
            sale.client_email,
            sale.product_id,
            sale.quantity,
            sale.unit_price,
            sale.enqueued_at.to_rfc3339(),
        );
    }
    println!("{} pending", entries.len());
    Ok(())
}

/// Replay the client's queued sales once.
pub async fn flush(session: &CartSession) -> Result<(), CommandError> {
    let report = session.flush_pending().await?;
    tracing::info!(
        processed = report.processed,
        remaining = report.remaining,
        "Flush finished"
    );
    Ok(())
}

/// Run the periodic flush until Ctrl-C.
pub async fn watch(session: &CartSession) -> Result<(), CommandError> {
    session.start_flush_timer();
    tracing::info!(
        interval_secs = session.config().flush_interval.as_secs(),
        "Watching pending sales, press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for Ctrl-C");
    }
    Ok(())
}
