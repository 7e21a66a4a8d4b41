//! Cart commands.
//!
//! # Usage
//!
//! ```bash
//! tidecart show
//! tidecart add -p 12 -q 2
//! tidecart update -l 31 -d -1
//! tidecart remove -l 31
//! tidecart clear
//! tidecart checkout
//! ```

use tidecart_core::{CartLine, CheckoutOutcome, LineId, MutationOutcome, ProductId};
use tidecart_sync::CartSession;
use tidecart_sync::backend::normalize::image_url;

use super::CommandError;

/// Reconcile with the server and print every line.
pub async fn show(session: &CartSession) -> Result<(), CommandError> {
    let lines = session.on_focus().await?;
    print_cart(session, &lines);
    Ok(())
}

/// Add `quantity` units of a product.
pub async fn add(session: &CartSession, product: i64, quantity: u32) -> Result<(), CommandError> {
    let outcome = session
        .add_product(ProductId::new(product), quantity)
        .await?;
    settled(outcome)?;
    print_cart(session, &session.lines());
    Ok(())
}

/// Change a line's quantity by `delta`.
pub async fn update(session: &CartSession, line: &str, delta: i64) -> Result<(), CommandError> {
    session.refresh().await?;
    let outcome = session.change_quantity(&LineId::new(line), delta).await?;
    settled(outcome)?;
    print_cart(session, &session.lines());
    Ok(())
}

/// Remove a line.
pub async fn remove(session: &CartSession, line: &str) -> Result<(), CommandError> {
    session.refresh().await?;
    let outcome = session.remove_line(&LineId::new(line)).await?;
    settled(outcome)?;
    print_cart(session, &session.lines());
    Ok(())
}

/// Empty the cart.
pub async fn clear(session: &CartSession) -> Result<(), CommandError> {
    session.refresh().await?;
    settled(session.clear().await?)?;
    tracing::info!("Cart cleared");
    Ok(())
}

/// Buy every line in the cart.
pub async fn checkout(session: &CartSession) -> Result<(), CommandError> {
    session.refresh().await?;
    let summary = session.checkout_all().await?;

    tracing::info!(
        purchased = summary.purchased,
        failed = summary.failed,
        queued = summary.queued,
        unresolved = summary.unresolved,
        "Checkout finished"
    );
    if summary.outcome() == CheckoutOutcome::Empty {
        tracing::warn!("Cart is empty, nothing to buy");
    }
    print_cart(session, &session.lines());
    Ok(())
}

fn settled(outcome: MutationOutcome) -> Result<(), CommandError> {
    match outcome {
        MutationOutcome::RolledBack { reason } => Err(CommandError::RolledBack(reason)),
        MutationOutcome::Confirmed => Ok(()),
    }
}

#[allow(clippy::print_stdout)]
fn print_cart(session: &CartSession, lines: &[CartLine]) {
    if lines.is_empty() {
        println!("Cart is empty");
        return;
    }

    let base = &session.config().api_url;
    for line in lines {
        let product = line
            .product_id
            .map_or_else(|| "unresolved".to_owned(), |id| id.to_string());
        println!(
            "{:>6}  {:<32} x{:<4} {:>10} {:>10}  [{product}]",
            line.line_id.as_str(),
            line.product_name,
            line.quantity,
            line.unit_price,
            line.line_total,
        );
        if let Some(url) = line.image_ref.as_deref().and_then(|r| image_url(base, r)) {
            println!("        {url}");
        }
    }
    println!("Total: {}", session.total_value());
}
