//! Remote cart service client.
//!
//! The remote cart is the authoritative copy, held server-side against the
//! caller's session. Two endpoints are used:
//!
//! - `GET {base}/api/cart` - list of `{productId, quantity, productSnapshot}`
//! - `POST {base}/api/cart` - body `{action, productId, quantity?}`,
//!   answers `{success, message?}`
//!
//! Authentication rides on the session cookie; nothing else is sent.

use std::sync::Arc;

use assistive_store_core::{CartItem, CartMutation, ProductDetails, ProductId};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::config::CartConfig;

const CART_PATH: &str = "api/cart";

/// Errors that can occur when talking to the remote cart service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The service refused the mutation.
    #[error("Cart service rejected the request: {0}")]
    Rejected(String),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The service could not be reached.
    #[error("Cart service unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// Whether this failure is a connectivity problem worth retrying later.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Status { status, .. } => matches!(
                *status,
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            Self::Unavailable(_) => true,
            Self::Rejected(_) | Self::Parse(_) => false,
        }
    }
}

/// The authoritative, server-held cart.
#[async_trait]
pub trait RemoteCart: Send + Sync {
    /// Fetch the full cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached or answers badly.
    async fn fetch(&self) -> Result<Vec<CartItem>, RemoteError>;

    /// Apply one mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached or rejects it.
    async fn mutate(&self, mutation: &CartMutation) -> Result<(), RemoteError>;
}

// =============================================================================
// Wire Types
// =============================================================================

/// One line of the remote cart as served by `GET /api/cart`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCartLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub product_snapshot: ProductDetails,
}

impl From<RemoteCartLine> for CartItem {
    fn from(line: RemoteCartLine) -> Self {
        Self::new(line.product_id, line.quantity, &line.product_snapshot)
    }
}

impl From<&CartItem> for RemoteCartLine {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            product_snapshot: item.details(),
        }
    }
}

/// Response body of `POST /api/cart`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// HttpRemoteCart
// =============================================================================

/// HTTP client for the remote cart service.
#[derive(Clone)]
pub struct HttpRemoteCart {
    inner: Arc<HttpRemoteCartInner>,
}

struct HttpRemoteCartInner {
    client: reqwest::Client,
    endpoint: Url,
    cookie: Option<String>,
}

impl HttpRemoteCart {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the endpoint
    /// URL cannot be derived from the base URL.
    pub fn new(config: &CartConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let endpoint = config
            .api_base_url
            .join(CART_PATH)
            .map_err(|e| RemoteError::Unavailable(format!("invalid cart endpoint: {e}")))?;

        Ok(Self {
            inner: Arc::new(HttpRemoteCartInner {
                client,
                endpoint,
                cookie: config
                    .session_cookie
                    .as_ref()
                    .map(|cookie| cookie.expose_secret().to_string()),
            }),
        })
    }

    /// Endpoint used for both reads and mutations.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let builder = self
            .inner
            .client
            .request(method, self.inner.endpoint.clone())
            .header("Accept", "application/json");
        match &self.inner.cookie {
            Some(cookie) => builder.header("Cookie", cookie),
            None => builder,
        }
    }

    /// Read the body, mapping non-success statuses to `RemoteError::Status`.
    async fn read_body(response: reqwest::Response) -> Result<String, RemoteError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::warn!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Cart service returned non-success status"
            );
            return Err(RemoteError::Status {
                status,
                body: body.chars().take(200).collect(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl RemoteCart for HttpRemoteCart {
    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<Vec<CartItem>, RemoteError> {
        let response = self.request(reqwest::Method::GET).send().await?;
        let body = Self::read_body(response).await?;
        let lines: Vec<RemoteCartLine> = serde_json::from_str(&body)?;
        debug!(lines = lines.len(), "Fetched remote cart");
        Ok(lines.into_iter().map(CartItem::from).collect())
    }

    #[instrument(skip(self), fields(action = %mutation.action(), product_id = %mutation.product_id()))]
    async fn mutate(&self, mutation: &CartMutation) -> Result<(), RemoteError> {
        let response = self
            .request(reqwest::Method::POST)
            .json(mutation)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let result: MutationResponse = serde_json::from_str(&body)?;
        if result.success {
            Ok(())
        } else {
            Err(RemoteError::Rejected(
                result
                    .message
                    .unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}
