//! Cart client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CART_API_BASE_URL` - Base URL of the remote cart service
//!
//! ## Optional
//! - `CART_SESSION_COOKIE` - Session cookie forwarded with remote requests
//! - `CART_STORAGE_DIR` - Local store directory (default: .assistive-store)
//! - `CART_REQUEST_TIMEOUT_SECS` - Remote request timeout (default: 10)
//! - `CART_PROBE_INTERVAL_SECS` - Connectivity probe interval (default: 15)
//! - `CART_PERSIST_QUEUE` - Persist pending actions across restarts (default: true)
//! - `CART_MAX_SNAPSHOT_BYTES` - Snapshot size before fields are truncated (default: 1 MiB)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::persist::DEFAULT_MAX_SNAPSHOT_BYTES;

const DEFAULT_STORAGE_DIR: &str = ".assistive-store";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart client configuration.
///
/// Implements `Debug` manually to redact the session cookie.
#[derive(Clone)]
pub struct CartConfig {
    /// Base URL of the remote cart service
    pub api_base_url: Url,
    /// Session cookie sent with every remote request
    pub session_cookie: Option<SecretString>,
    /// Directory backing the file store
    pub storage_dir: PathBuf,
    /// Timeout applied to each remote request
    pub request_timeout: Duration,
    /// How often the health probe checks connectivity
    pub probe_interval: Duration,
    /// Cart store behaviour
    pub store: StoreOptions,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Options that shape how a `CartStore` persists state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Write the pending queue to the local store so it survives restarts
    pub persist_queue: bool,
    /// Serialized snapshot size above which a reduced snapshot is stored
    pub max_snapshot_bytes: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            persist_queue: true,
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }
}

impl std::fmt::Debug for CartConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartConfig")
            .field("api_base_url", &self.api_base_url.as_str())
            .field(
                "session_cookie",
                &self.session_cookie.as_ref().map(|_| "[REDACTED]"),
            )
            .field("storage_dir", &self.storage_dir)
            .field("request_timeout", &self.request_timeout)
            .field("probe_interval", &self.probe_interval)
            .field("store", &self.store)
            .field("sentry_dsn", &self.sentry_dsn)
            .field("sentry_environment", &self.sentry_environment)
            .finish()
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_url = lookup("CART_API_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("CART_API_BASE_URL".to_string()))?;
        let api_base_url = parse_base_url("CART_API_BASE_URL", &raw_url)?;

        let session_cookie = lookup("CART_SESSION_COOKIE")
            .filter(|value| !value.is_empty())
            .map(SecretString::from);

        let storage_dir = PathBuf::from(
            lookup("CART_STORAGE_DIR").unwrap_or_else(|| DEFAULT_STORAGE_DIR.to_string()),
        );

        let request_timeout = Duration::from_secs(parse_or_default(
            "CART_REQUEST_TIMEOUT_SECS",
            lookup("CART_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let probe_interval = Duration::from_secs(parse_or_default(
            "CART_PROBE_INTERVAL_SECS",
            lookup("CART_PROBE_INTERVAL_SECS"),
            DEFAULT_PROBE_INTERVAL_SECS,
        )?);

        let persist_queue = match lookup("CART_PERSIST_QUEUE") {
            Some(value) => parse_bool("CART_PERSIST_QUEUE", &value)?,
            None => true,
        };
        let max_snapshot_bytes = parse_or_default(
            "CART_MAX_SNAPSHOT_BYTES",
            lookup("CART_MAX_SNAPSHOT_BYTES"),
            DEFAULT_MAX_SNAPSHOT_BYTES,
        )?;

        Ok(Self {
            api_base_url,
            session_cookie,
            storage_dir,
            request_timeout,
            probe_interval,
            store: StoreOptions {
                persist_queue,
                max_snapshot_bytes,
            },
            sentry_dsn: lookup("SENTRY_DSN"),
            sentry_environment: lookup("SENTRY_ENVIRONMENT"),
        })
    }

    /// Build a configuration for a service at `api_base_url` with defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the URL cannot be used as a base.
    pub fn with_base_url(api_base_url: &str) -> Result<Self, ConfigError> {
        let url = api_base_url.to_string();
        Self::from_lookup(move |key| (key == "CART_API_BASE_URL").then(|| url.clone()))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse the service base URL, normalizing it to end with a slash so that
/// relative joins keep any path prefix.
fn parse_base_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "URL cannot be used as a base".to_string(),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Parse an optional numeric variable, falling back to `default`.
fn parse_or_default<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse a boolean flag (`true/false`, `1/0`, `yes/no`, `on/off`).
fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected a boolean, got '{other}'"),
        )),
    }
}
