//! Integration tests for the Assistive Store cart.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p assistive-store-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `remote_client` - `HttpRemoteCart` against the mock service
//! - `cart_sync` - `CartStore` end-to-end over HTTP and the file store
//!
//! The [`MockCartService`] is an in-process axum server speaking the remote
//! cart protocol. It keeps one cart, enforces stock from a registered
//! catalog, and can be taken down (503) or told to reject mutations.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use assistive_store_cart::remote::{MutationResponse, RemoteCartLine};
use assistive_store_cart::{CartConfig, ConfigError};
use assistive_store_core::{CartMutation, ProductDetails, ProductId};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

/// In-process stand-in for the remote cart service.
///
/// The server stops when this value is dropped.
pub struct MockCartService {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct MockState {
    lines: Mutex<Vec<RemoteCartLine>>,
    catalog: Mutex<HashMap<ProductId, ProductDetails>>,
    mutations: Mutex<Vec<CartMutation>>,
    rejections: Mutex<VecDeque<String>>,
    cookies: Mutex<Vec<Option<String>>>,
    down: Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockCartService {
    /// Bind to an ephemeral local port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/health", get(health))
            .route("/api/cart", get(get_cart).post(post_cart))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock cart service");
        let addr = listener.local_addr().expect("mock cart service address");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "Mock cart service stopped");
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Base URL of the service, with a trailing slash.
    ///
    /// # Panics
    ///
    /// Panics if the bound address does not form a valid URL.
    #[must_use]
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).expect("mock base url")
    }

    /// Client configuration pointing at this service.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is rejected.
    pub fn config(&self) -> Result<CartConfig, ConfigError> {
        CartConfig::with_base_url(self.base_url().as_str())
    }

    /// Register a product the service will accept.
    pub fn stock(&self, product_id: &str, details: ProductDetails) {
        lock(&self.state.catalog).insert(ProductId::from(product_id), details);
    }

    /// Put a line directly into the server cart.
    pub fn seed(&self, product_id: &str, quantity: u32, details: ProductDetails) {
        self.stock(product_id, details.clone());
        lock(&self.state.lines).push(RemoteCartLine {
            product_id: ProductId::from(product_id),
            quantity,
            product_snapshot: details,
        });
    }

    /// Answer every request with 503 while `down` is set.
    pub fn set_down(&self, down: bool) {
        *lock(&self.state.down) = down;
    }

    /// Refuse the next mutation with `message`.
    pub fn reject_next(&self, message: &str) {
        lock(&self.state.rejections).push_back(message.to_string());
    }

    /// Server cart as `(product id, quantity)` pairs, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<(String, u32)> {
        lock(&self.state.lines)
            .iter()
            .map(|line| (line.product_id.to_string(), line.quantity))
            .collect()
    }

    /// Mutations received so far, including refused ones.
    #[must_use]
    pub fn mutations(&self) -> Vec<CartMutation> {
        lock(&self.state.mutations).clone()
    }

    /// `Cookie` header of each request to `/api/cart`.
    #[must_use]
    pub fn cookies(&self) -> Vec<Option<String>> {
        lock(&self.state.cookies).clone()
    }

    /// Stop serving; later connections are refused.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for MockCartService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "service unavailable").into_response()
}

fn record_cookie(state: &MockState, headers: &HeaderMap) {
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    lock(&state.cookies).push(cookie);
}

async fn health(State(state): State<Arc<MockState>>) -> Response {
    if *lock(&state.down) {
        return unavailable();
    }
    (StatusCode::OK, "ok").into_response()
}

async fn get_cart(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if *lock(&state.down) {
        return unavailable();
    }
    record_cookie(&state, &headers);
    Json(lock(&state.lines).clone()).into_response()
}

async fn post_cart(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(mutation): Json<CartMutation>,
) -> Response {
    if *lock(&state.down) {
        return unavailable();
    }
    record_cookie(&state, &headers);
    lock(&state.mutations).push(mutation.clone());

    let result = match lock(&state.rejections).pop_front() {
        Some(message) => Err(message),
        None => apply(&state, &mutation),
    };

    let body = match result {
        Ok(()) => MutationResponse {
            success: true,
            message: None,
        },
        Err(message) => MutationResponse {
            success: false,
            message: Some(message),
        },
    };
    Json(body).into_response()
}

fn apply(state: &MockState, mutation: &CartMutation) -> Result<(), String> {
    let mut lines = lock(&state.lines);
    let position = lines
        .iter()
        .position(|line| &line.product_id == mutation.product_id());

    match mutation {
        CartMutation::Add {
            product_id,
            quantity,
        } => {
            let details = lock(&state.catalog)
                .get(product_id)
                .cloned()
                .ok_or_else(|| format!("Unknown product {product_id}"))?;
            let current = position
                .and_then(|idx| lines.get(idx))
                .map_or(0, |line| line.quantity);
            let total = current.saturating_add(*quantity);
            if total > details.stock {
                return Err("Insufficient stock".to_string());
            }
            match position.and_then(|idx| lines.get_mut(idx)) {
                Some(line) => line.quantity = total,
                None => lines.push(RemoteCartLine {
                    product_id: product_id.clone(),
                    quantity: total,
                    product_snapshot: details,
                }),
            }
            Ok(())
        }
        CartMutation::Remove { .. } => {
            if let Some(idx) = position {
                lines.remove(idx);
            }
            Ok(())
        }
        CartMutation::Update { quantity, .. } => {
            let line = position
                .and_then(|idx| lines.get_mut(idx))
                .ok_or_else(|| "Item not in cart".to_string())?;
            if *quantity > line.product_snapshot.stock {
                return Err("Insufficient stock".to_string());
            }
            line.quantity = *quantity;
            Ok(())
        }
    }
}
