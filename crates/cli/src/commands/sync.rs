//! Commands that talk to the remote cart directly.
//!
//! # Usage
//!
//! ```bash
//! as-cart fetch
//! as-cart sync
//! ```

use assistive_store_cart::FetchOutcome;

use super::{CommandError, Session};

/// Replace the local cart with the remote cart.
pub async fn fetch(session: &Session) -> Result<(), CommandError> {
    match session.store.fetch_cart().await? {
        FetchOutcome::Fetched => {
            tracing::info!("Fetched {} item(s)", session.store.cart_count());
        }
        FetchOutcome::AlreadyInFlight => tracing::info!("A fetch is already running"),
    }
    Ok(())
}

/// Replay queued offline changes.
pub async fn drain(session: &Session) -> Result<(), CommandError> {
    let report = session.store.drain_pending().await;

    if report.skipped {
        tracing::info!(
            "Not synced: service unreachable ({} change(s) waiting)",
            report.remaining
        );
        return Ok(());
    }

    tracing::info!("Synced {} change(s)", report.replayed);
    if let Some(id) = report.halted_at {
        tracing::info!(
            "Stopped at {id}; {} change(s) still waiting",
            report.remaining
        );
    }
    Ok(())
}
