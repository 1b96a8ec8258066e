//! Network connectivity signal.
//!
//! Consumers ask "are we online?" and subscribe to changes. The signal is a
//! `tokio::sync::watch` channel, so late subscribers always see the current
//! state and a burst of flips collapses to the latest value.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Online query plus an online-event subscription.
pub trait Connectivity: Send + Sync {
    /// Whether the network is currently believed to be reachable.
    fn is_online(&self) -> bool;

    /// Subscribe to connectivity changes.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Manually driven connectivity state.
///
/// Cloning yields another handle to the same state.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    /// Create a status that starts `online` (or offline).
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Record the current connectivity. Subscribers are only woken when the
    /// value actually changes.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for NetworkStatus {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// =============================================================================
// HealthProbe
// =============================================================================

/// Background task that polls the service's `/health` endpoint and keeps a
/// [`NetworkStatus`] up to date.
///
/// The task stops when the probe is dropped.
pub struct HealthProbe {
    handle: JoinHandle<()>,
}

impl HealthProbe {
    /// Check `{base}/health` once.
    pub async fn check(client: &reqwest::Client, health_url: &Url) -> bool {
        match client.get(health_url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health check failed");
                false
            }
        }
    }

    /// Check `{base}/health` once with a fresh client.
    pub async fn reachable(base_url: &Url, timeout: Duration) -> bool {
        let Ok(health_url) = base_url.join("health") else {
            return false;
        };
        match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => Self::check(&client, &health_url).await,
            Err(e) => {
                warn!(error = %e, "Failed to build probe client");
                false
            }
        }
    }

    /// Spawn the polling task. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the health URL cannot be derived from `base_url`.
    pub fn spawn(
        base_url: &Url,
        interval: Duration,
        timeout: Duration,
        status: NetworkStatus,
    ) -> Result<Self, url::ParseError> {
        let health_url = base_url.join("health")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build probe client, using defaults");
                reqwest::Client::new()
            });

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                status.set_online(Self::check(&client, &health_url).await);
            }
        });

        Ok(Self { handle })
    }

    /// Stop polling.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for HealthProbe {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
