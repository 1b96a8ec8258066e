//! Pending-action queue.
//!
//! Mutations that could not reach the remote cart wait here in the order
//! they were made. Replay is strictly FIFO: the head must succeed before
//! anything behind it is attempted.

use std::collections::VecDeque;

use assistive_store_core::{ActionId, PendingAction};

/// FIFO of deferred cart mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingQueue {
    actions: VecDeque<PendingAction>,
}

impl PendingQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted actions (oldest first).
    #[must_use]
    pub fn from_actions(actions: impl IntoIterator<Item = PendingAction>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
        }
    }

    /// Append an action at the tail.
    pub fn push(&mut self, action: PendingAction) {
        self.actions.push_back(action);
    }

    /// The oldest action, next to replay.
    #[must_use]
    pub fn front(&self) -> Option<&PendingAction> {
        self.actions.front()
    }

    /// Remove the head, but only if it is still the action `id`.
    ///
    /// The queue may be cleared or replaced while a replay is in flight;
    /// checking the id keeps a late acknowledgement from dropping an
    /// unrelated action.
    pub fn pop_if_front(&mut self, id: &ActionId) -> Option<PendingAction> {
        if self.actions.front().is_some_and(|action| &action.id == id) {
            self.actions.pop_front()
        } else {
            None
        }
    }

    /// Number of queued actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &PendingAction> {
        self.actions.iter()
    }

    /// Drop every queued action.
    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Actions replayed and removed from the queue.
    pub replayed: usize,
    /// Actions still queued after the pass.
    pub remaining: usize,
    /// The action whose replay failed and halted the pass.
    pub halted_at: Option<ActionId>,
    /// The pass did not run (offline, or another drain was in flight).
    pub skipped: bool,
}
