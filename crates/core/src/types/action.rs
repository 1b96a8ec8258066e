//! Cart mutations and deferred (pending) actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cart::ProductDetails;
use super::id::{ActionId, ProductId};

/// Kind of cart mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartAction {
    Add,
    Remove,
    Update,
}

impl CartAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Update => "update",
        }
    }
}

impl std::fmt::Display for CartAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a cart mutation sent to the remote cart service.
///
/// Serializes as `{"action": "add", "productId": "...", "quantity": 2}`.
/// `quantity` is the delta for `add` and the absolute value for `update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum CartMutation {
    Add { product_id: ProductId, quantity: u32 },
    Remove { product_id: ProductId },
    Update { product_id: ProductId, quantity: u32 },
}

impl CartMutation {
    /// The kind of this mutation.
    #[must_use]
    pub const fn action(&self) -> CartAction {
        match self {
            Self::Add { .. } => CartAction::Add,
            Self::Remove { .. } => CartAction::Remove,
            Self::Update { .. } => CartAction::Update,
        }
    }

    /// The product this mutation targets.
    #[must_use]
    pub const fn product_id(&self) -> &ProductId {
        match self {
            Self::Add { product_id, .. }
            | Self::Remove { product_id }
            | Self::Update { product_id, .. } => product_id,
        }
    }
}

/// A mutation that has not yet been applied to the remote cart.
///
/// Created when a mutation is attempted offline (or fails with a network
/// error) and consumed once it replays successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: ActionId,
    pub action: CartAction,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_details: Option<ProductDetails>,
    pub timestamp: DateTime<Utc>,
}

impl PendingAction {
    /// Record a deferred mutation at `timestamp`.
    #[must_use]
    pub fn from_mutation(
        mutation: &CartMutation,
        product_details: Option<ProductDetails>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let product_id = mutation.product_id().clone();
        let quantity = match mutation {
            CartMutation::Add { quantity, .. } | CartMutation::Update { quantity, .. } => {
                Some(*quantity)
            }
            CartMutation::Remove { .. } => None,
        };

        Self {
            id: ActionId::generate(timestamp.timestamp_millis(), &product_id),
            action: mutation.action(),
            product_id,
            quantity,
            product_details,
            timestamp,
        }
    }

    /// Rebuild the mutation to replay against the remote cart.
    ///
    /// A missing quantity on `add`/`update` replays as zero, which the
    /// remote cart rejects; it never occurs for actions built by
    /// [`PendingAction::from_mutation`].
    #[must_use]
    pub fn to_mutation(&self) -> CartMutation {
        let product_id = self.product_id.clone();
        let quantity = self.quantity.unwrap_or_default();
        match self.action {
            CartAction::Add => CartMutation::Add {
                product_id,
                quantity,
            },
            CartAction::Remove => CartMutation::Remove { product_id },
            CartAction::Update => CartMutation::Update {
                product_id,
                quantity,
            },
        }
    }
}
