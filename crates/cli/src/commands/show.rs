//! Read-only commands.
//!
//! # Usage
//!
//! ```bash
//! as-cart show
//! as-cart pending
//! ```

use assistive_store_core::Price;

use super::Session;

/// Report every line, the item count and the subtotal.
pub fn cart(session: &Session) {
    let snapshot = session.store.snapshot();

    if snapshot.cart.is_empty() {
        tracing::info!("Cart is empty");
    }
    for item in snapshot.cart.items() {
        tracing::info!(
            "{:>3} x {} ({}) @ {} = {}  [stock {}]",
            item.quantity,
            item.name,
            item.product_id,
            Price::inr(item.price).display(),
            Price::inr(item.line_total()).display(),
            item.stock,
        );
    }

    tracing::info!(
        "Items: {}, subtotal: {}, {}{}",
        snapshot.cart_count,
        Price::inr(snapshot.subtotal).display(),
        if session.online { "online" } else { "offline" },
        match snapshot.pending {
            0 => String::new(),
            n => format!(", {n} change(s) waiting to sync"),
        }
    );
}

/// Report queued offline changes, oldest first.
pub fn pending(session: &Session) {
    let pending = session.store.pending_actions();
    if pending.is_empty() {
        tracing::info!("No pending changes");
        return;
    }

    for action in pending {
        let quantity = action
            .quantity
            .map_or_else(String::new, |q| format!(" x{q}"));
        tracing::info!(
            "{}  {:<6} {}{}  ({})",
            action.timestamp.format("%Y-%m-%d %H:%M:%S"),
            action.action,
            action.product_id,
            quantity,
            action.id,
        );
    }
}
