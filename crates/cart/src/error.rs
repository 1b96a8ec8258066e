//! Cart error and outcome types.
//!
//! Every failure a cart operation can surface is a [`CartError`]. Storage
//! failures never appear here: the persistence layer degrades instead.

use assistive_store_core::ProductId;
use thiserror::Error;

use crate::remote::RemoteError;

/// Errors surfaced by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The resulting quantity would exceed the known stock.
    #[error("Only {available} available (requested {requested})")]
    StockExceeded { requested: u32, available: u32 },

    /// Quantity must be at least one.
    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    /// The product has no line in the cart.
    #[error("Product not in cart: {0}")]
    NotInCart(ProductId),

    /// The store has not finished hydrating.
    #[error("Cart is not hydrated yet")]
    NotHydrated,

    /// The remote cart rejected or could not receive a mutation.
    ///
    /// The optimistic change has been rolled back. When `queued` is set the
    /// mutation was also queued for replay because the failure looked like
    /// a connectivity problem.
    #[error("Cart sync failed: {source}")]
    Sync {
        #[source]
        source: RemoteError,
        queued: bool,
    },

    /// Fetching the remote cart failed.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl CartError {
    /// Whether this is a local validation rejection (no state was touched
    /// and no request was made).
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::StockExceeded { .. } | Self::InvalidQuantity | Self::NotInCart(_)
        )
    }

    /// Message suitable for a user-facing notification.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::StockExceeded { available: 0, .. } => {
                "You already have the maximum available quantity in your cart".to_string()
            }
            Self::StockExceeded { available, .. } => {
                format!("Only {available} available")
            }
            Self::InvalidQuantity => "Please choose a quantity of at least 1".to_string(),
            Self::NotInCart(_) => "That item is no longer in your cart".to_string(),
            Self::NotHydrated => "Your cart is still loading".to_string(),
            Self::Sync { queued: true, .. } => {
                "Could not reach the store, we'll retry when you're back online".to_string()
            }
            Self::Sync { queued: false, .. } => {
                "Could not update your cart, please try again".to_string()
            }
            Self::Remote(_) => "Could not load your cart".to_string(),
        }
    }
}

/// How a successful mutation was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Applied locally and confirmed by the remote cart.
    Synced,
    /// Applied locally while offline; queued until connectivity returns.
    Queued,
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;
