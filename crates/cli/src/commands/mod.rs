//! CLI commands over a hydrated [`CartStore`].
//!
//! Every command opens a [`Session`]: the file store under
//! `CART_STORAGE_DIR`, the HTTP remote cart, and a one-off health check
//! deciding whether changes are sent or queued.

use std::sync::Arc;

use assistive_store_cart::{
    CartConfig, CartError, CartStore, FileStore, HealthProbe, HttpRemoteCart, NetworkStatus,
    RemoteCart, RemoteError, StorageError,
};
use thiserror::Error;

pub mod edit;
pub mod show;
pub mod sync;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The local store could not be opened.
    #[error("Local store error: {0}")]
    Storage(#[from] StorageError),

    /// The remote cart client could not be built.
    #[error("Remote cart error: {0}")]
    Remote(#[from] RemoteError),

    /// A cart operation failed.
    #[error("{}", .0.user_message())]
    Cart(#[from] CartError),
}

/// A hydrated cart store plus the connectivity it was opened with.
pub struct Session {
    pub store: CartStore,
    pub online: bool,
}

impl Session {
    /// Open the local store, probe the service and hydrate.
    ///
    /// When online, the remote cart seeds hydration so it merges with the
    /// local snapshot; queued changes are replayed as part of hydration.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store or HTTP client cannot be created.
    pub async fn open(config: &CartConfig, force_offline: bool) -> Result<Self, CommandError> {
        let local = Arc::new(FileStore::open(&config.storage_dir)?);
        let remote = Arc::new(HttpRemoteCart::new(config)?);

        let online = !force_offline
            && HealthProbe::reachable(&config.api_base_url, config.request_timeout).await;
        tracing::debug!(online, storage_dir = %config.storage_dir.display(), "Opening cart session");

        let mut store = CartStore::new(
            remote.clone(),
            local,
            Arc::new(NetworkStatus::new(online)),
            config.store,
        );

        if online {
            match remote.fetch().await {
                Ok(items) => store = store.with_initial_cart(items),
                Err(e) => tracing::warn!(error = %e, "Could not load remote cart, using local snapshot"),
            }
        } else {
            tracing::info!("Cart service unreachable, working offline");
        }

        store.hydrate().await;
        Ok(Self { store, online })
    }

    /// Flush state and stop background work.
    pub fn close(&self) {
        self.store.dispose();
    }
}
