//! Cart mutation commands.
//!
//! # Usage
//!
//! ```bash
//! as-cart add smart-cane -q 1 --name "Smart Cane" --price 3499.00 --stock 5
//! as-cart update smart-cane 2
//! as-cart remove smart-cane
//! as-cart clear
//! ```

use assistive_store_cart::MutationOutcome;
use assistive_store_core::{ProductDetails, ProductId};

use super::{CommandError, Session};

/// Add units of a product.
pub async fn add(
    session: &Session,
    product_id: String,
    quantity: u32,
    details: ProductDetails,
) -> Result<(), CommandError> {
    let product_id = ProductId::new(product_id);
    let outcome = session
        .store
        .add_to_cart(product_id.clone(), quantity, details)
        .await?;
    report(outcome, &format!("Added {quantity} x {product_id}"));
    Ok(())
}

/// Remove a product's line.
pub async fn remove(session: &Session, product_id: String) -> Result<(), CommandError> {
    let product_id = ProductId::new(product_id);
    let outcome = session.store.remove_from_cart(product_id.clone()).await?;
    report(outcome, &format!("Removed {product_id}"));
    Ok(())
}

/// Set a product's quantity.
pub async fn update(
    session: &Session,
    product_id: String,
    quantity: u32,
) -> Result<(), CommandError> {
    let product_id = ProductId::new(product_id);
    let outcome = session
        .store
        .update_quantity(product_id.clone(), quantity)
        .await?;
    report(outcome, &format!("Set {product_id} to {quantity}"));
    Ok(())
}

/// Empty the cart locally.
pub fn clear(session: &Session) {
    session.store.clear_cart();
    tracing::info!("Cart cleared");
}

fn report(outcome: MutationOutcome, summary: &str) {
    match outcome {
        MutationOutcome::Synced => tracing::info!("{summary}"),
        MutationOutcome::Queued => tracing::info!("{summary} (offline, will sync later)"),
    }
}
