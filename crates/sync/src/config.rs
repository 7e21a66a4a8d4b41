//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `TIDECART_API_URL` - Base URL of the cart server (e.g., `http://192.168.1.122:5000/`)
//!
//! ## Optional
//! - `TIDECART_API_TOKEN` - Bearer token sent with every request
//! - `TIDECART_CLIENT_EMAIL` - Client identity used by the CLI session
//! - `TIDECART_STATE_DIR` - Directory for durable local storage (default: `.tidecart`)
//! - `TIDECART_QUEUE_KEY` - Storage key of the pending-sale queue (default: `pending_sales`)
//! - `TIDECART_FLUSH_INTERVAL_SECS` - Pending-sale flush period (default: 10)
//! - `TIDECART_RETRY_SERVER_ERRORS` - Retry HTTP 5xx responses (default: true)

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::retry::RetryPolicy;

/// Default storage key of the pending-sale queue.
pub const DEFAULT_QUEUE_KEY: &str = "pending_sales";

/// Default flush timer period.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Retry policies per endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicies {
    /// Fetching the cart.
    pub cart_read: RetryPolicy,
    /// Add, remove, update quantity, clear.
    pub cart_mutation: RetryPolicy,
    /// Catalog listing for identity resolution.
    pub catalog: RetryPolicy,
    /// Sale registration during checkout. Latency-sensitive, so it backs off
    /// faster than the other classes.
    pub checkout: RetryPolicy,
    /// Sale replay from the pending-sale queue, per entry and flush.
    pub flush: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            cart_read: RetryPolicy::new(3, 10_000, 500),
            cart_mutation: RetryPolicy::new(3, 8_000, 500),
            catalog: RetryPolicy::new(3, 15_000, 600),
            checkout: RetryPolicy::new(3, 8_000, 250),
            flush: RetryPolicy::new(2, 30_000, 600),
        }
    }
}

impl RetryPolicies {
    /// Apply the 5xx retry switch to every class.
    #[must_use]
    pub const fn with_server_error_retry(self, retry: bool) -> Self {
        Self {
            cart_read: self.cart_read.with_server_error_retry(retry),
            cart_mutation: self.cart_mutation.with_server_error_retry(retry),
            catalog: self.catalog.with_server_error_retry(retry),
            checkout: self.checkout.with_server_error_retry(retry),
            flush: self.flush.with_server_error_retry(retry),
        }
    }
}

/// Engine configuration.
///
/// Implements `Debug` manually to redact the API token.
#[derive(Clone)]
pub struct SyncConfig {
    /// Cart server base URL
    pub api_url: Url,
    /// Bearer token, when the server requires one
    pub api_token: Option<SecretString>,
    /// Client e-mail for sessions that are not backed by a login flow
    pub client_email: Option<String>,
    /// Durable storage directory
    pub state_dir: PathBuf,
    /// Storage key of the pending-sale queue
    pub queue_key: String,
    /// Pending-sale flush timer period
    pub flush_interval: Duration,
    /// Retry policies per endpoint class
    pub policies: RetryPolicies,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("api_url", &self.api_url.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("client_email", &self.client_email)
            .field("state_dir", &self.state_dir)
            .field("queue_key", &self.queue_key)
            .field("flush_interval", &self.flush_interval)
            .field("policies", &self.policies)
            .finish()
    }
}

impl SyncConfig {
    /// Configuration with defaults for everything but the server URL.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            api_token: None,
            client_email: None,
            state_dir: PathBuf::from(".tidecart"),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            policies: RetryPolicies::default(),
        }
    }

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
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = get_required(&lookup, "TIDECART_API_URL")?;
        let api_url = Url::parse(&raw_url).map_err(|e| {
            ConfigError::InvalidEnvVar("TIDECART_API_URL".to_string(), e.to_string())
        })?;
        if api_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidEnvVar(
                "TIDECART_API_URL".to_string(),
                "must be a hierarchical http(s) URL".to_string(),
            ));
        }

        let flush_secs: u64 = parse_or_default(&lookup, "TIDECART_FLUSH_INTERVAL_SECS", 10)?;
        if flush_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "TIDECART_FLUSH_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let retry_server_errors = parse_or_default(&lookup, "TIDECART_RETRY_SERVER_ERRORS", true)?;

        Ok(Self {
            api_url,
            api_token: get_optional(&lookup, "TIDECART_API_TOKEN").map(SecretString::from),
            client_email: get_optional(&lookup, "TIDECART_CLIENT_EMAIL"),
            state_dir: get_optional(&lookup, "TIDECART_STATE_DIR")
                .map_or_else(|| PathBuf::from(".tidecart"), PathBuf::from),
            queue_key: get_optional(&lookup, "TIDECART_QUEUE_KEY")
                .unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
            flush_interval: Duration::from_secs(flush_secs),
            policies: RetryPolicies::default().with_server_error_retry(retry_server_errors),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required variable.
fn get_required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    get_optional(lookup, key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional variable; blank values count as unset.
fn get_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a variable, falling back to `default` when unset.
fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional(lookup, key).map_or(Ok(default), |value| {
        value
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}
