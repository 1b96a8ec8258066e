//! Cart reconciliation engine.
//!
//! [`CartStore`] owns the in-memory cart for a session and keeps it
//! eventually consistent with the remote cart:
//!
//! 1. `hydrate()` merges the persisted snapshot with any remote-sourced
//!    initial cart, restores the pending queue and starts listening for
//!    reconnects.
//! 2. Mutations are validated by the stock guard, applied optimistically,
//!    then sent to the remote cart. Offline mutations are queued; failed
//!    ones are rolled back to the exact prior line.
//! 3. The queue drains in FIFO order whenever connectivity returns and
//!    stops at the first failure.
//!
//! Consumers observe state through a `watch` channel of [`CartSnapshot`]s
//! and user-facing messages through a `broadcast` channel of
//! [`CartNotice`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use assistive_store_core::{
    Cart, CartItem, CartMutation, PendingAction, ProductDetails, ProductId,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::StoreOptions;
use crate::connectivity::Connectivity;
use crate::error::{CartError, MutationOutcome, Result};
use crate::guard;
use crate::persist;
use crate::queue::{DrainReport, PendingQueue};
use crate::remote::RemoteCart;
use crate::storage::LocalStore;

const NOTICE_CAPACITY: usize = 32;

/// Point-in-time view of the cart for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartSnapshot {
    pub cart: Cart,
    pub cart_count: u32,
    pub subtotal: Decimal,
    pub is_loading: bool,
    pub is_hydrated: bool,
    pub pending: usize,
}

/// Severity of a [`CartNotice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// A user-facing notification (rendered as a toast by UIs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartNotice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Result of a [`CartStore::fetch_cart`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The remote cart replaced local state.
    Fetched,
    /// Another fetch was already in flight; nothing was done.
    AlreadyInFlight,
}

/// A line's state before an optimistic mutation: its position and value,
/// or `None` if the product had no line.
type PriorLine = Option<(usize, CartItem)>;

/// Client-side cart state manager.
///
/// Cheap to clone; all clones share the same cart.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    remote: Arc<dyn RemoteCart>,
    local: Arc<dyn LocalStore>,
    connectivity: Arc<dyn Connectivity>,
    options: StoreOptions,
    state: Mutex<CartState>,
    fetching: AtomicBool,
    draining: AtomicBool,
    snapshots: watch::Sender<CartSnapshot>,
    notices: broadcast::Sender<CartNotice>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct CartState {
    cart: Cart,
    queue: PendingQueue,
    hydrated: bool,
    loading: bool,
}

impl CartState {
    fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            cart: self.cart.clone(),
            cart_count: self.cart.count(),
            subtotal: self.cart.subtotal(),
            is_loading: self.loading,
            is_hydrated: self.hydrated,
            pending: self.queue.len(),
        }
    }
}

/// Clears an in-flight flag when dropped.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then_some(Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Drop for CartStoreInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl CartStore {
    /// Create a store. Call [`CartStore::hydrate`] before mutating.
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteCart>,
        local: Arc<dyn LocalStore>,
        connectivity: Arc<dyn Connectivity>,
        options: StoreOptions,
    ) -> Self {
        let (snapshots, _) = watch::channel(CartSnapshot::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            inner: Arc::new(CartStoreInner {
                remote,
                local,
                connectivity,
                options,
                state: Mutex::new(CartState::default()),
                fetching: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                snapshots,
                notices,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Seed the store with a remote-sourced cart (e.g., rendered by the
    /// server for an authenticated session). Ignored once hydrated.
    #[must_use]
    pub fn with_initial_cart(self, items: impl IntoIterator<Item = CartItem>) -> Self {
        {
            let mut state = self.state();
            if !state.hydrated {
                state.cart = Cart::from_items(items);
            }
        }
        self
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Reconcile persisted state with the initial cart and start syncing.
    ///
    /// Runs once; later calls are no-ops. Persistence only begins after
    /// this completes, so an empty initial cart never clobbers the stored
    /// snapshot.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) {
        let drain_now = {
            let mut state = self.state();
            if state.hydrated {
                return;
            }

            match persist::load_cart(self.inner.local.as_ref()) {
                Some(local) if !local.is_empty() => {
                    if state.cart.is_empty() {
                        debug!(lines = local.len(), "Adopting persisted cart");
                        state.cart = local;
                    } else {
                        debug!(
                            local = local.len(),
                            remote = state.cart.len(),
                            "Merging persisted cart with remote cart"
                        );
                        state.cart = Cart::merge_larger(&local, &state.cart);
                    }
                }
                _ => {}
            }

            if self.inner.options.persist_queue {
                let restored = persist::load_queue(self.inner.local.as_ref());
                if !restored.is_empty() {
                    let live = std::mem::take(&mut state.queue);
                    state.queue = PendingQueue::from_actions(restored.into_iter().chain(live.iter().cloned()));
                }
            }

            state.hydrated = true;
            info!(
                lines = state.cart.len(),
                count = state.cart.count(),
                pending = state.queue.len(),
                "Cart hydrated"
            );
            self.save_queue(&state);
            self.commit(&state);

            !state.queue.is_empty()
        };

        self.start_listener();

        if drain_now && self.inner.connectivity.is_online() {
            self.drain_pending().await;
        }
    }

    /// Stop listening for reconnects and flush state to the local store.
    pub fn dispose(&self) {
        if let Some(handle) = self.listener().take() {
            handle.abort();
        }
        let state = self.state();
        if state.hydrated {
            persist::save_cart(
                self.inner.local.as_ref(),
                &state.cart,
                self.inner.options.max_snapshot_bytes,
            );
            self.save_queue(&state);
        }
        debug!("Cart store disposed");
    }

    fn start_listener(&self) {
        let mut listener = self.listener();
        if listener.is_some() {
            return;
        }

        let mut online = self.inner.connectivity.subscribe();
        let weak: Weak<CartStoreInner> = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            while online.changed().await.is_ok() {
                if !*online.borrow_and_update() {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let store = Self { inner };
                info!("Back online, replaying pending cart actions");
                store.drain_pending().await;
            }
        }));
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.state().snapshot()
    }

    /// Subscribe to snapshot updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Subscribe to user-facing notices.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<CartNotice> {
        self.inner.notices.subscribe()
    }

    /// Current cart lines.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.state().cart.clone()
    }

    /// Total units in the cart.
    #[must_use]
    pub fn cart_count(&self) -> u32 {
        self.state().cart.count()
    }

    /// Whether a remote fetch is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    /// Whether hydration has completed.
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.state().hydrated
    }

    /// Queued actions, oldest first.
    #[must_use]
    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.state().queue.iter().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Replace local state with the remote cart (remote wins, no merge).
    ///
    /// A call made while another fetch is in flight does nothing.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Remote` if the fetch fails; local state is kept.
    #[instrument(skip(self))]
    pub async fn fetch_cart(&self) -> Result<FetchOutcome> {
        let Some(_flight) = FlightGuard::acquire(&self.inner.fetching) else {
            debug!("Cart fetch already in flight");
            return Ok(FetchOutcome::AlreadyInFlight);
        };

        {
            let mut state = self.state();
            state.loading = true;
            self.publish(&state);
        }

        let fetched = self.inner.remote.fetch().await;

        let mut state = self.state();
        state.loading = false;
        match fetched {
            Ok(items) => {
                state.cart = Cart::from_items(items);
                info!(lines = state.cart.len(), "Fetched remote cart");
                persist::save_cart(
                    self.inner.local.as_ref(),
                    &state.cart,
                    self.inner.options.max_snapshot_bytes,
                );
                self.publish(&state);
                Ok(FetchOutcome::Fetched)
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch remote cart");
                self.publish(&state);
                drop(state);
                let err = CartError::Remote(e);
                self.notify(NoticeLevel::Error, err.user_message());
                Err(err)
            }
        }
    }

    /// Add `quantity` units of a product.
    ///
    /// # Errors
    ///
    /// - `StockExceeded` / `InvalidQuantity` on validation failure (no state
    ///   change, no request)
    /// - `Sync` if the remote cart rejected the change (rolled back)
    /// - `NotHydrated` before [`CartStore::hydrate`]
    #[instrument(skip(self, details), fields(product_id = %product_id, stock = details.stock))]
    pub async fn add_to_cart(
        &self,
        product_id: ProductId,
        quantity: u32,
        details: ProductDetails,
    ) -> Result<MutationOutcome> {
        let prior = {
            let mut state = self.hydrated_state()?;
            let current = state.cart.quantity_of(&product_id);
            let total = self.validated(guard::check_add(current, quantity, details.stock))?;

            let prior = Self::prior_line(&state.cart, &product_id);
            let line = CartItem::new(
                product_id.clone(),
                guard::cap(total, details.stock),
                &details,
            );
            state.cart.upsert(line);
            self.commit(&state);
            prior
        };

        let mutation = CartMutation::Add {
            product_id,
            quantity,
        };
        self.sync(mutation, Some(details), prior).await
    }

    /// Remove a product's line.
    ///
    /// # Errors
    ///
    /// - `NotInCart` if the product has no line
    /// - `Sync` if the remote cart rejected the change (line restored)
    /// - `NotHydrated` before [`CartStore::hydrate`]
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove_from_cart(&self, product_id: ProductId) -> Result<MutationOutcome> {
        let prior = {
            let mut state = self.hydrated_state()?;
            let Some(prior) = state.cart.remove(&product_id) else {
                return Err(CartError::NotInCart(product_id));
            };
            self.commit(&state);
            prior
        };

        self.sync(CartMutation::Remove { product_id }, None, Some(prior))
            .await
    }

    /// Set a product's line to an absolute quantity. Zero removes the line.
    ///
    /// # Errors
    ///
    /// - `StockExceeded` if `quantity` is above the line's stock (no clamping)
    /// - `NotInCart` if the product has no line
    /// - `Sync` if the remote cart rejected the change (prior quantity restored)
    /// - `NotHydrated` before [`CartStore::hydrate`]
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn update_quantity(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<MutationOutcome> {
        if quantity == 0 {
            return self.remove_from_cart(product_id).await;
        }

        let prior = {
            let mut state = self.hydrated_state()?;
            let Some(prior) = Self::prior_line(&state.cart, &product_id) else {
                return Err(CartError::NotInCart(product_id));
            };
            let stock = prior.1.stock;
            let quantity = self.validated(guard::check_set(quantity, stock))?;

            state
                .cart
                .set_quantity(&product_id, guard::cap(quantity, stock));
            self.commit(&state);
            Some(prior)
        };

        let mutation = CartMutation::Update {
            product_id,
            quantity,
        };
        self.sync(mutation, None, prior).await
    }

    /// Empty the cart locally and discard pending actions.
    ///
    /// Nothing is sent to the remote cart.
    pub fn clear_cart(&self) {
        let mut state = self.state();
        state.cart.clear();
        state.queue.clear();
        persist::clear_all(self.inner.local.as_ref());
        self.publish(&state);
        info!("Cart cleared");
    }

    /// Replay queued actions, oldest first, stopping at the first failure.
    ///
    /// Skipped while offline or while another drain is in flight.
    #[instrument(skip(self))]
    pub async fn drain_pending(&self) -> DrainReport {
        if !self.inner.connectivity.is_online() {
            return DrainReport {
                remaining: self.state().queue.len(),
                skipped: true,
                ..DrainReport::default()
            };
        }
        let Some(_flight) = FlightGuard::acquire(&self.inner.draining) else {
            debug!("Pending queue drain already in flight");
            return DrainReport {
                remaining: self.state().queue.len(),
                skipped: true,
                ..DrainReport::default()
            };
        };

        let mut report = DrainReport::default();
        loop {
            let Some(action) = self.state().queue.front().cloned() else {
                break;
            };

            match self.inner.remote.mutate(&action.to_mutation()).await {
                Ok(()) => {
                    let mut state = self.state();
                    state.queue.pop_if_front(&action.id);
                    self.save_queue(&state);
                    self.publish(&state);
                    report.replayed += 1;
                    debug!(action_id = %action.id, "Replayed pending cart action");
                }
                Err(e) => {
                    warn!(
                        action_id = %action.id,
                        action = %action.action,
                        error = %e,
                        "Pending cart action failed, halting replay"
                    );
                    report.halted_at = Some(action.id);
                    break;
                }
            }
        }

        report.remaining = self.state().queue.len();
        if report.replayed > 0 {
            info!(
                replayed = report.replayed,
                remaining = report.remaining,
                "Replayed pending cart actions"
            );
            self.notify(
                NoticeLevel::Success,
                format!("Synced {} offline cart change(s)", report.replayed),
            );
        }
        report
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, CartState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn hydrated_state(&self) -> Result<MutexGuard<'_, CartState>> {
        let state = self.state();
        if state.hydrated {
            Ok(state)
        } else {
            Err(CartError::NotHydrated)
        }
    }

    fn prior_line(cart: &Cart, product_id: &ProductId) -> PriorLine {
        let idx = cart.position(product_id)?;
        cart.items().get(idx).map(|item| (idx, item.clone()))
    }

    /// Pass a guard result through, notifying on rejection.
    fn validated(&self, checked: Result<u32>) -> Result<u32> {
        checked.inspect_err(|e| {
            debug!(error = %e, "Cart mutation rejected");
            self.notify(NoticeLevel::Error, e.user_message());
        })
    }

    /// Send an optimistic mutation to the remote cart, queueing it when
    /// offline and rolling back to `prior` when it fails.
    async fn sync(
        &self,
        mutation: CartMutation,
        details: Option<ProductDetails>,
        prior: PriorLine,
    ) -> Result<MutationOutcome> {
        if !self.inner.connectivity.is_online() {
            self.enqueue(&mutation, details);
            self.notify(
                NoticeLevel::Info,
                "Saved offline, will sync when you're back online".to_string(),
            );
            return Ok(MutationOutcome::Queued);
        }

        match self.inner.remote.mutate(&mutation).await {
            Ok(()) => {
                debug!(action = %mutation.action(), "Cart mutation synced");
                Ok(MutationOutcome::Synced)
            }
            Err(source) => {
                warn!(
                    action = %mutation.action(),
                    product_id = %mutation.product_id(),
                    error = %source,
                    "Cart sync failed, rolling back"
                );
                {
                    let mut state = self.state();
                    state.cart.restore(mutation.product_id(), prior);
                    self.commit(&state);
                }

                let queued = source.is_network();
                if queued {
                    self.enqueue(&mutation, details);
                    self.schedule_drain();
                }

                let err = CartError::Sync { source, queued };
                self.notify(NoticeLevel::Error, err.user_message());
                Err(err)
            }
        }
    }

    fn enqueue(&self, mutation: &CartMutation, details: Option<ProductDetails>) {
        let mut state = self.state();
        // Keep timestamps strictly increasing so ids stay unique in the queue.
        let now = Utc::now();
        let timestamp = state
            .queue
            .iter()
            .last()
            .map_or(now, |last| now.max(last.timestamp + Duration::milliseconds(1)));

        let action = PendingAction::from_mutation(mutation, details, timestamp);
        debug!(action_id = %action.id, action = %action.action, "Queued cart action");
        state.queue.push(action);
        self.save_queue(&state);
        self.publish(&state);
    }

    /// Start a background drain if we are online.
    fn schedule_drain(&self) {
        if !self.inner.connectivity.is_online() || self.inner.draining.load(Ordering::Acquire) {
            return;
        }
        let store = self.clone();
        tokio::spawn(async move {
            store.drain_pending().await;
        });
    }

    /// Persist (once hydrated) and publish the cart.
    fn commit(&self, state: &CartState) {
        if state.hydrated {
            persist::save_cart(
                self.inner.local.as_ref(),
                &state.cart,
                self.inner.options.max_snapshot_bytes,
            );
        }
        self.publish(state);
    }

    fn save_queue(&self, state: &CartState) {
        if state.hydrated && self.inner.options.persist_queue {
            persist::save_queue(self.inner.local.as_ref(), state.queue.iter());
        }
    }

    fn publish(&self, state: &CartState) {
        self.inner.snapshots.send_replace(state.snapshot());
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        // No subscribers is fine.
        let _ = self.inner.notices.send(CartNotice { level, message });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration as StdDuration;

    use assistive_store_core::CartAction;
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    use super::*;
    use crate::connectivity::NetworkStatus;
    use crate::persist::{CART_STORAGE_KEY, PENDING_STORAGE_KEY, REDUCED_NAME_CHARS};
    use crate::remote::RemoteError;
    use crate::storage::MemoryStore;

    // =========================================================================
    // Test doubles
    // =========================================================================

    /// Remote cart whose mutate results are scripted per call.
    #[derive(Default)]
    struct ScriptedRemote {
        mutations: Mutex<Vec<CartMutation>>,
        scripted: Mutex<VecDeque<RemoteError>>,
        fail_all: AtomicBool,
        cart: Mutex<Vec<CartItem>>,
        fetches: Mutex<usize>,
        fetch_gate: Option<Notify>,
        mutate_gate: Option<Semaphore>,
    }

    impl ScriptedRemote {
        fn gated() -> Self {
            Self {
                fetch_gate: Some(Notify::new()),
                ..Self::default()
            }
        }

        /// Successful mutations wait for a permit from `release_mutations`.
        fn gated_mutations() -> Self {
            Self {
                mutate_gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn release_mutations(&self, permits: usize) {
            self.mutate_gate.as_ref().unwrap().add_permits(permits);
        }

        fn fail_next(&self, error: RemoteError) {
            self.scripted.lock().unwrap().push_back(error);
        }

        fn fail_all(&self, fail: bool) {
            self.fail_all.store(fail, Ordering::SeqCst);
        }

        fn mutations(&self) -> Vec<CartMutation> {
            self.mutations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteCart for ScriptedRemote {
        async fn fetch(&self) -> std::result::Result<Vec<CartItem>, RemoteError> {
            *self.fetches.lock().unwrap() += 1;
            if let Some(gate) = &self.fetch_gate {
                gate.notified().await;
            }
            Ok(self.cart.lock().unwrap().clone())
        }

        async fn mutate(&self, mutation: &CartMutation) -> std::result::Result<(), RemoteError> {
            self.mutations.lock().unwrap().push(mutation.clone());
            if let Some(error) = self.scripted.lock().unwrap().pop_front() {
                return Err(error);
            }
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(RemoteError::Unavailable("connection refused".into()));
            }
            if let Some(gate) = &self.mutate_gate {
                gate.acquire().await.unwrap().forget();
            }
            Ok(())
        }
    }

    struct Harness {
        store: CartStore,
        remote: Arc<ScriptedRemote>,
        local: Arc<MemoryStore>,
        status: NetworkStatus,
    }

    fn harness_with(remote: ScriptedRemote, local: Arc<MemoryStore>, online: bool) -> Harness {
        let remote = Arc::new(remote);
        let status = NetworkStatus::new(online);
        let store = CartStore::new(
            remote.clone(),
            local.clone(),
            Arc::new(status.clone()),
            StoreOptions::default(),
        );
        Harness {
            store,
            remote,
            local,
            status,
        }
    }

    fn harness(online: bool) -> Harness {
        harness_with(ScriptedRemote::default(), Arc::new(MemoryStore::new()), online)
    }

    fn details(stock: u32) -> ProductDetails {
        ProductDetails {
            name: "Smart Cane".to_string(),
            price: Decimal::new(349_900, 2),
            image: Some("https://cdn.test/cane.png".to_string()),
            stock,
        }
    }

    fn line(id: &str, quantity: u32, stock: u32) -> CartItem {
        CartItem::new(ProductId::from(id), quantity, &details(stock))
    }

    fn pid(id: &str) -> ProductId {
        ProductId::from(id)
    }

    fn quantities(cart: &Cart) -> Vec<(String, u32)> {
        cart.items()
            .iter()
            .map(|i| (i.product_id.to_string(), i.quantity))
            .collect()
    }

    fn stored_cart(local: &MemoryStore) -> Vec<CartItem> {
        serde_json::from_str(&local.get(CART_STORAGE_KEY).unwrap().unwrap()).unwrap()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(StdDuration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    // =========================================================================
    // Hydration
    // =========================================================================

    #[tokio::test]
    async fn test_hydration_merge_keeps_larger_quantity() {
        let local = Arc::new(MemoryStore::new());
        local
            .set(
                CART_STORAGE_KEY,
                &serde_json::to_string(&vec![line("A", 2, 10)]).unwrap(),
            )
            .unwrap();

        let h = harness_with(ScriptedRemote::default(), local, true);
        let store = h
            .store
            .with_initial_cart([line("A", 5, 10), line("B", 1, 10)]);
        store.hydrate().await;

        assert!(store.is_hydrated());
        assert_eq!(
            quantities(&store.cart()),
            vec![("A".to_string(), 5), ("B".to_string(), 1)]
        );
        assert_eq!(stored_cart(&h.local).len(), 2);
    }

    #[tokio::test]
    async fn test_hydration_adopts_local_when_no_remote() {
        let local = Arc::new(MemoryStore::new());
        local
            .set(
                CART_STORAGE_KEY,
                &serde_json::to_string(&vec![line("A", 3, 10)]).unwrap(),
            )
            .unwrap();

        let h = harness_with(ScriptedRemote::default(), local, true);
        h.store.hydrate().await;
        assert_eq!(quantities(&h.store.cart()), vec![("A".to_string(), 3)]);
    }

    #[tokio::test]
    async fn test_hydration_discards_corrupt_snapshot() {
        let local = Arc::new(MemoryStore::new());
        local.set(CART_STORAGE_KEY, "not json").unwrap();

        let h = harness_with(ScriptedRemote::default(), local, true);
        let store = h.store.with_initial_cart([line("B", 1, 10)]);
        store.hydrate().await;
        assert_eq!(quantities(&store.cart()), vec![("B".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_nothing_persisted_or_mutated_before_hydration() {
        let h = harness(true);
        let result = h.store.add_to_cart(pid("A"), 1, details(5)).await;

        assert!(matches!(result, Err(CartError::NotHydrated)));
        assert_eq!(h.local.get(CART_STORAGE_KEY).unwrap(), None);
        assert!(h.remote.mutations().is_empty());
        assert!(!h.store.snapshot().is_hydrated);
    }

    #[tokio::test]
    async fn test_hydrate_runs_once() {
        let h = harness(true);
        h.store.hydrate().await;
        h.store.add_to_cart(pid("A"), 1, details(5)).await.unwrap();

        h.store.hydrate().await;
        assert_eq!(h.store.cart_count(), 1);
    }

    // =========================================================================
    // Stock enforcement
    // =========================================================================

    #[tokio::test]
    async fn test_add_exceeding_stock_is_rejected_without_side_effects() {
        let h = harness(true);
        h.store.hydrate().await;
        let mut notices = h.store.notices();

        let result = h.store.add_to_cart(pid("p1"), 3, details(2)).await;

        assert!(matches!(
            result,
            Err(CartError::StockExceeded {
                requested: 3,
                available: 2
            })
        ));
        assert!(h.store.cart().is_empty());
        assert!(h.remote.mutations().is_empty());
        assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn test_quantity_never_exceeds_latest_stock() {
        let h = harness(true);
        h.store.hydrate().await;

        let steps: [(bool, u32, u32); 8] = [
            // (is_add, quantity, stock)
            (true, 2, 5),
            (true, 2, 5),
            (true, 2, 5),
            (false, 9, 5),
            (true, 1, 3),
            (false, 3, 5),
            (true, 4, 4),
            (false, 1, 4),
        ];
        for (is_add, quantity, stock) in steps {
            if is_add {
                let _ = h.store.add_to_cart(pid("A"), quantity, details(stock)).await;
            } else {
                let _ = h.store.update_quantity(pid("A"), quantity).await;
            }
            let cart = h.store.cart();
            let item = cart.get(&pid("A")).unwrap();
            assert!(item.quantity <= item.stock, "{item:?}");
            assert!(guard::within_ceiling(item.quantity, item.stock));
        }
    }

    #[tokio::test]
    async fn test_repeated_adds_keep_one_line_per_product() {
        let h = harness(true);
        h.store.hydrate().await;

        for _ in 0..3 {
            h.store.add_to_cart(pid("A"), 1, details(10)).await.unwrap();
            h.store.add_to_cart(pid("B"), 1, details(10)).await.unwrap();
        }

        let cart = h.store.cart();
        assert_eq!(
            quantities(&cart),
            vec![("A".to_string(), 3), ("B".to_string(), 3)]
        );
        assert_eq!(h.store.cart_count(), 6);
    }

    #[tokio::test]
    async fn test_update_above_stock_is_rejected_without_request() {
        let h = harness(true);
        let store = h.store.with_initial_cart([line("A", 3, 10)]);
        store.hydrate().await;

        let result = store.update_quantity(pid("A"), 11).await;
        assert!(matches!(
            result,
            Err(CartError::StockExceeded {
                requested: 11,
                available: 10
            })
        ));
        assert_eq!(store.cart().quantity_of(&pid("A")), 3);
        assert!(h.remote.mutations().is_empty());
    }

    // =========================================================================
    // Sync and rollback
    // =========================================================================

    #[tokio::test]
    async fn test_online_add_syncs_and_persists() {
        let h = harness(true);
        h.store.hydrate().await;

        let outcome = h.store.add_to_cart(pid("A"), 2, details(5)).await.unwrap();

        assert_eq!(outcome, MutationOutcome::Synced);
        assert_eq!(
            h.remote.mutations(),
            vec![CartMutation::Add {
                product_id: pid("A"),
                quantity: 2
            }]
        );
        assert_eq!(stored_cart(&h.local)[0].quantity, 2);
        let snapshot = h.store.snapshot();
        assert_eq!(snapshot.cart_count, 2);
        assert_eq!(snapshot.subtotal, Decimal::new(699_800, 2));
    }

    #[tokio::test]
    async fn test_huge_price_saturates_subtotal() {
        let h = harness(true);
        h.store.hydrate().await;
        let priceless = ProductDetails {
            price: Decimal::MAX,
            ..details(5)
        };

        let outcome = h.store.add_to_cart(pid("A"), 2, priceless).await.unwrap();
        h.store.add_to_cart(pid("B"), 1, details(5)).await.unwrap();

        assert_eq!(outcome, MutationOutcome::Synced);
        let snapshot = h.store.snapshot();
        assert_eq!(snapshot.cart_count, 3);
        assert_eq!(snapshot.subtotal, Decimal::MAX);
        assert_eq!(stored_cart(&h.local)[0].price, Decimal::MAX);
    }

    #[tokio::test]
    async fn test_update_failure_restores_prior_quantity() {
        let h = harness(true);
        let store = h.store.with_initial_cart([line("A", 3, 10)]);
        store.hydrate().await;
        h.remote
            .fail_next(RemoteError::Rejected("cart locked".into()));

        let result = store.update_quantity(pid("A"), 7).await;

        assert!(matches!(result, Err(CartError::Sync { queued: false, .. })));
        assert_eq!(quantities(&store.cart()), vec![("A".to_string(), 3)]);
        assert_eq!(stored_cart(&h.local)[0].quantity, 3);
        assert!(store.pending_actions().is_empty());
    }

    #[tokio::test]
    async fn test_add_failure_restores_existing_line() {
        let h = harness(true);
        let store = h.store.with_initial_cart([line("A", 2, 10)]);
        store.hydrate().await;
        h.remote.fail_next(RemoteError::Rejected("nope".into()));

        let result = store.add_to_cart(pid("A"), 3, details(10)).await;

        assert!(result.is_err());
        assert_eq!(quantities(&store.cart()), vec![("A".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_add_failure_removes_new_line() {
        let h = harness(true);
        h.store.hydrate().await;
        h.remote.fail_next(RemoteError::Rejected("nope".into()));

        let result = h.store.add_to_cart(pid("A"), 1, details(10)).await;

        assert!(result.is_err());
        assert!(h.store.cart().is_empty());
    }

    #[tokio::test]
    async fn test_remove_failure_reinserts_line_in_place() {
        let h = harness(true);
        let store = h
            .store
            .with_initial_cart([line("A", 1, 10), line("B", 4, 10), line("C", 2, 10)]);
        store.hydrate().await;
        h.remote.fail_next(RemoteError::Rejected("nope".into()));

        let result = store.remove_from_cart(pid("B")).await;

        assert!(result.is_err());
        assert_eq!(
            quantities(&store.cart()),
            vec![
                ("A".to_string(), 1),
                ("B".to_string(), 4),
                ("C".to_string(), 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_network_failure_rolls_back_and_queues() {
        let h = harness(true);
        h.store.hydrate().await;
        h.remote.fail_all(true);

        let result = h.store.add_to_cart(pid("A"), 1, details(10)).await;

        assert!(matches!(result, Err(CartError::Sync { queued: true, .. })));
        assert!(h.store.cart().is_empty());
        let pending = h.store.pending_actions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, CartAction::Add);
        assert_eq!(pending[0].product_details, Some(details(10)));
    }

    #[tokio::test]
    async fn test_update_to_zero_removes_line() {
        let h = harness(true);
        let store = h.store.with_initial_cart([line("A", 2, 10)]);
        store.hydrate().await;

        store.update_quantity(pid("A"), 0).await.unwrap();

        assert!(store.cart().is_empty());
        assert_eq!(
            h.remote.mutations(),
            vec![CartMutation::Remove {
                product_id: pid("A")
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_line_is_reported() {
        let h = harness(true);
        h.store.hydrate().await;

        assert!(matches!(
            h.store.remove_from_cart(pid("ghost")).await,
            Err(CartError::NotInCart(_))
        ));
        assert!(matches!(
            h.store.update_quantity(pid("ghost"), 2).await,
            Err(CartError::NotInCart(_))
        ));
    }

    // =========================================================================
    // Offline queue
    // =========================================================================

    #[tokio::test]
    async fn test_offline_mutations_apply_locally_and_queue() {
        let h = harness(false);
        h.store.hydrate().await;

        let outcome = h.store.add_to_cart(pid("A"), 2, details(5)).await.unwrap();

        assert_eq!(outcome, MutationOutcome::Queued);
        assert_eq!(h.store.cart().quantity_of(&pid("A")), 2);
        assert!(h.remote.mutations().is_empty());
        assert_eq!(h.store.snapshot().pending, 1);
    }

    #[tokio::test]
    async fn test_failed_replay_blocks_rest_of_queue() {
        let h = harness(false);
        h.store.hydrate().await;

        h.store.add_to_cart(pid("A"), 1, details(5)).await.unwrap();
        h.store.update_quantity(pid("A"), 3).await.unwrap();
        h.store.remove_from_cart(pid("A")).await.unwrap();
        let queued: Vec<CartAction> = h.store.pending_actions().iter().map(|a| a.action).collect();
        assert_eq!(
            queued,
            vec![CartAction::Add, CartAction::Update, CartAction::Remove]
        );

        h.remote.fail_all(true);
        h.status.set_online(true);
        wait_until(|| !h.remote.mutations().is_empty()).await;
        let report = h.store.drain_pending().await;

        let after: Vec<CartAction> = h.store.pending_actions().iter().map(|a| a.action).collect();
        assert_eq!(
            after,
            vec![CartAction::Add, CartAction::Update, CartAction::Remove]
        );
        assert!(
            h.remote
                .mutations()
                .iter()
                .all(|m| m.action() == CartAction::Add)
        );
        assert_eq!(report.remaining, 3);
        assert_eq!(report.replayed, 0);
    }

    #[tokio::test]
    async fn test_reconnect_replays_queue_in_order() {
        let h = harness(false);
        h.store.hydrate().await;

        h.store.add_to_cart(pid("A"), 1, details(5)).await.unwrap();
        h.store.update_quantity(pid("A"), 4).await.unwrap();
        h.store.add_to_cart(pid("B"), 1, details(5)).await.unwrap();

        h.status.set_online(true);
        wait_until(|| h.store.pending_actions().is_empty()).await;

        assert_eq!(
            h.remote.mutations(),
            vec![
                CartMutation::Add {
                    product_id: pid("A"),
                    quantity: 1
                },
                CartMutation::Update {
                    product_id: pid("A"),
                    quantity: 4
                },
                CartMutation::Add {
                    product_id: pid("B"),
                    quantity: 1
                },
            ]
        );
        assert_eq!(h.local.get(PENDING_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_queued_ids_are_unique_and_ordered() {
        let h = harness(false);
        h.store.hydrate().await;

        for _ in 0..5 {
            h.store.add_to_cart(pid("A"), 1, details(10)).await.unwrap();
        }

        let pending = h.store.pending_actions();
        for pair in pending.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
            assert_ne!(pair[0].id, pair[1].id);
        }
    }

    #[tokio::test]
    async fn test_drain_is_skipped_offline() {
        let h = harness(false);
        h.store.hydrate().await;
        h.store.add_to_cart(pid("A"), 1, details(5)).await.unwrap();

        let report = h.store.drain_pending().await;
        assert!(report.skipped);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn test_overlapping_drains_send_each_action_once() {
        let h = harness_with(
            ScriptedRemote::gated_mutations(),
            Arc::new(MemoryStore::new()),
            false,
        );
        h.store.hydrate().await;
        h.store.add_to_cart(pid("A"), 1, details(5)).await.unwrap();
        h.store.add_to_cart(pid("B"), 2, details(5)).await.unwrap();
        // Stop the reconnect listener so only the drains below run.
        h.store.dispose();
        h.status.set_online(true);

        let remote = h.remote.clone();
        let (first, second, ()) = tokio::join!(
            h.store.drain_pending(),
            h.store.drain_pending(),
            async {
                wait_until(|| !remote.mutations().is_empty()).await;
                remote.release_mutations(2);
            }
        );

        assert_ne!(first.skipped, second.skipped);
        assert_eq!(first.replayed + second.replayed, 2);
        assert_eq!(
            h.remote.mutations(),
            vec![
                CartMutation::Add {
                    product_id: pid("A"),
                    quantity: 1
                },
                CartMutation::Add {
                    product_id: pid("B"),
                    quantity: 2
                },
            ]
        );
        assert!(h.store.pending_actions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_sync_joins_running_drain() {
        let h = harness_with(
            ScriptedRemote::gated_mutations(),
            Arc::new(MemoryStore::new()),
            true,
        );
        h.store.hydrate().await;

        // The failed add queues A and starts a background drain, which
        // then waits at the gate while replaying A.
        h.remote.fail_next(RemoteError::Unavailable("connection reset".into()));
        let first = h.store.add_to_cart(pid("A"), 1, details(5)).await;
        assert!(matches!(first, Err(CartError::Sync { queued: true, .. })));
        wait_until(|| h.remote.mutations().len() == 2).await;

        h.remote.fail_next(RemoteError::Unavailable("connection reset".into()));
        let second = h.store.add_to_cart(pid("B"), 1, details(5)).await;
        assert!(matches!(second, Err(CartError::Sync { queued: true, .. })));
        assert!(h.store.drain_pending().await.skipped);
        assert_eq!(h.store.pending_actions().len(), 2);

        h.remote.release_mutations(2);
        wait_until(|| h.store.pending_actions().is_empty()).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let add = |id: &str| CartMutation::Add {
            product_id: pid(id),
            quantity: 1,
        };
        assert_eq!(h.remote.mutations(), vec![add("A"), add("A"), add("B"), add("B")]);
    }

    #[tokio::test]
    async fn test_pending_queue_survives_restart() {
        let local = Arc::new(MemoryStore::new());

        let first = harness_with(ScriptedRemote::default(), local.clone(), false);
        first.store.hydrate().await;
        first
            .store
            .add_to_cart(pid("A"), 2, details(5))
            .await
            .unwrap();
        first.store.dispose();
        assert!(local.get(PENDING_STORAGE_KEY).unwrap().is_some());

        let second = harness_with(ScriptedRemote::default(), local.clone(), true);
        second.store.hydrate().await;

        assert_eq!(second.store.cart().quantity_of(&pid("A")), 2);
        assert!(second.store.pending_actions().is_empty());
        assert_eq!(
            second.remote.mutations(),
            vec![CartMutation::Add {
                product_id: pid("A"),
                quantity: 2
            }]
        );
    }

    // =========================================================================
    // Fetch, clear, persistence
    // =========================================================================

    #[tokio::test]
    async fn test_fetch_replaces_state_and_rewrites_store() {
        let remote = ScriptedRemote::default();
        *remote.cart.lock().unwrap() = vec![line("R", 4, 10)];
        let h = harness_with(remote, Arc::new(MemoryStore::new()), true);
        let store = h.store.with_initial_cart([line("A", 1, 10)]);
        store.hydrate().await;

        let outcome = store.fetch_cart().await.unwrap();

        assert_eq!(outcome, FetchOutcome::Fetched);
        assert_eq!(quantities(&store.cart()), vec![("R".to_string(), 4)]);
        assert_eq!(stored_cart(&h.local)[0].product_id, pid("R"));
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_concurrent_fetch_is_a_no_op() {
        let h = harness_with(ScriptedRemote::gated(), Arc::new(MemoryStore::new()), true);
        h.store.hydrate().await;
        let gate_remote = h.remote.clone();

        let (first, second, ()) = tokio::join!(h.store.fetch_cart(), h.store.fetch_cart(), async {
            gate_remote.fetch_gate.as_ref().unwrap().notify_one();
        });

        assert_eq!(first.unwrap(), FetchOutcome::Fetched);
        assert_eq!(second.unwrap(), FetchOutcome::AlreadyInFlight);
        assert_eq!(*h.remote.fetches.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let h = harness(false);
        h.store.hydrate().await;
        h.store.add_to_cart(pid("A"), 1, details(5)).await.unwrap();

        h.store.clear_cart();
        assert!(h.store.cart().is_empty());
        assert!(h.store.pending_actions().is_empty());
        assert_eq!(h.local.get(CART_STORAGE_KEY).unwrap(), None);

        h.store.clear_cart();
        assert!(h.store.cart().is_empty());
        assert_eq!(h.store.cart_count(), 0);
        assert!(h.remote.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_cart_is_persisted_reduced() {
        let remote = Arc::new(ScriptedRemote::default());
        let local = Arc::new(MemoryStore::new());
        let store = CartStore::new(
            remote,
            local.clone(),
            Arc::new(NetworkStatus::new(true)),
            StoreOptions {
                persist_queue: false,
                max_snapshot_bytes: 256,
            },
        );
        store.hydrate().await;

        let mut product = details(5);
        product.name = "Screen reader licence ".repeat(20);
        store.add_to_cart(pid("A"), 1, product.clone()).await.unwrap();

        assert_eq!(store.cart().items()[0].name, product.name);
        let stored = stored_cart(&local);
        assert_eq!(stored[0].name.chars().count(), REDUCED_NAME_CHARS);
    }

    #[tokio::test]
    async fn test_snapshot_channel_tracks_changes() {
        let h = harness(true);
        let mut rx = h.store.subscribe();
        h.store.hydrate().await;
        assert!(rx.borrow_and_update().is_hydrated);

        h.store.add_to_cart(pid("A"), 3, details(5)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().cart_count, 3);
    }
}
