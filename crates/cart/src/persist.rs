//! Snapshot persistence on top of a [`LocalStore`].
//!
//! Nothing here returns an error: unreadable snapshots are discarded,
//! oversized snapshots are stored with truncated fields, and a failed write
//! clears the key rather than leaving it half-updated.

use assistive_store_core::{Cart, CartItem, PendingAction};
use tracing::{debug, warn};

use crate::storage::LocalStore;

/// Storage key holding the serialized cart.
pub const CART_STORAGE_KEY: &str = "assistive-store-cart";

/// Storage key holding the serialized pending queue.
pub const PENDING_STORAGE_KEY: &str = "assistive-store-cart-pending";

/// Serialized size above which the reduced snapshot is written.
pub const DEFAULT_MAX_SNAPSHOT_BYTES: usize = 1024 * 1024;

/// Product names are cut to this many characters in a reduced snapshot.
pub const REDUCED_NAME_CHARS: usize = 50;

/// Image references are cut to this many characters in a reduced snapshot.
pub const REDUCED_IMAGE_CHARS: usize = 200;

/// What a snapshot write ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The full snapshot was written.
    Full,
    /// The snapshot was too large; the reduced form was written.
    Reduced,
    /// The write failed and the key was cleared.
    Cleared,
}

/// Read the persisted cart.
///
/// Returns `None` when nothing is stored or the stored value is not a list
/// of cart lines (in which case it is removed).
pub fn load_cart(store: &dyn LocalStore) -> Option<Cart> {
    let raw = match store.get(CART_STORAGE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, "Failed to read cart snapshot");
            return None;
        }
    };

    match serde_json::from_str::<Vec<CartItem>>(&raw) {
        Ok(items) => Some(Cart::from_items(items)),
        Err(e) => {
            warn!(error = %e, "Discarding unreadable cart snapshot");
            discard(store, CART_STORAGE_KEY);
            None
        }
    }
}

/// Write the cart snapshot, falling back to a reduced form when the full
/// serialization exceeds `max_bytes`.
pub fn save_cart(store: &dyn LocalStore, cart: &Cart, max_bytes: usize) -> SaveOutcome {
    let (payload, outcome) = match serde_json::to_string(cart) {
        Ok(full) if full.len() <= max_bytes => (full, SaveOutcome::Full),
        Ok(full) => {
            let reduced: Vec<CartItem> = cart
                .items()
                .iter()
                .map(|item| item.reduced(REDUCED_NAME_CHARS, REDUCED_IMAGE_CHARS))
                .collect();
            match serde_json::to_string(&reduced) {
                Ok(payload) => {
                    warn!(
                        full_bytes = full.len(),
                        reduced_bytes = payload.len(),
                        max_bytes,
                        "Cart snapshot too large, storing reduced snapshot"
                    );
                    (payload, SaveOutcome::Reduced)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to serialize reduced cart snapshot");
                    discard(store, CART_STORAGE_KEY);
                    return SaveOutcome::Cleared;
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to serialize cart snapshot");
            discard(store, CART_STORAGE_KEY);
            return SaveOutcome::Cleared;
        }
    };

    match store.set(CART_STORAGE_KEY, &payload) {
        Ok(()) => {
            debug!(bytes = payload.len(), lines = cart.len(), "Cart snapshot saved");
            outcome
        }
        Err(e) => {
            warn!(error = %e, "Failed to write cart snapshot, clearing it");
            discard(store, CART_STORAGE_KEY);
            SaveOutcome::Cleared
        }
    }
}

/// Read the persisted pending queue (oldest first).
pub fn load_queue(store: &dyn LocalStore) -> Vec<PendingAction> {
    let raw = match store.get(PENDING_STORAGE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(error = %e, "Failed to read pending queue");
            return Vec::new();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Discarding unreadable pending queue");
        discard(store, PENDING_STORAGE_KEY);
        Vec::new()
    })
}

/// Write the pending queue. An empty queue removes the key.
pub fn save_queue<'a>(
    store: &dyn LocalStore,
    actions: impl IntoIterator<Item = &'a PendingAction>,
) {
    let actions: Vec<&PendingAction> = actions.into_iter().collect();
    if actions.is_empty() {
        discard(store, PENDING_STORAGE_KEY);
        return;
    }

    let written = serde_json::to_string(&actions)
        .map_err(|e| e.to_string())
        .and_then(|payload| {
            store
                .set(PENDING_STORAGE_KEY, &payload)
                .map_err(|e| e.to_string())
        });
    if let Err(e) = written {
        warn!(error = %e, pending = actions.len(), "Failed to write pending queue, clearing it");
        discard(store, PENDING_STORAGE_KEY);
    }
}

/// Remove every key this module writes.
pub fn clear_all(store: &dyn LocalStore) {
    discard(store, CART_STORAGE_KEY);
    discard(store, PENDING_STORAGE_KEY);
}

fn discard(store: &dyn LocalStore, key: &str) {
    if let Err(e) = store.remove(key) {
        warn!(error = %e, key, "Failed to clear local store key");
    }
}
