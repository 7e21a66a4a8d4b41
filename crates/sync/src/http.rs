//! Network retry client.
//!
//! Wraps `reqwest` with the attempt loop from [`crate::retry`]. Every call is
//! independent: the only state shared between calls is the connection pool
//! and the cancellation scope used to tear down outstanding retries.

use std::sync::Arc;

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::retry::{RetryClassify, RetryPolicy, run_with_retry};

/// Keys under which servers put a human-readable error message, in order.
const ERROR_MESSAGE_KEYS: &[&str] = &["erro", "error", "mensagem", "message"];

/// Longest raw error body surfaced to the user.
const MAX_RAW_ERROR_CHARS: usize = 200;

/// Errors surfaced by the retry client after its budget is spent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// A try exceeded the per-attempt timeout.
    #[error("request timed out")]
    Timeout,

    /// Transport-level failure (connection refused, reset, DNS...).
    #[error("connection aborted: {0}")]
    Aborted(String),

    /// The server answered with a non-success status.
    #[error("{}", format_http_status(*status, message.as_deref()))]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error payload, if any.
        message: Option<String>,
    },

    /// The caller cancelled the operation.
    #[error("request cancelled")]
    Cancelled,

    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn format_http_status(status: u16, message: Option<&str>) -> String {
    message.map_or_else(
        || format!("HTTP {status}"),
        |message| format!("HTTP {status}: {message}"),
    )
}

impl NetworkError {
    fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_builder() {
            Self::InvalidRequest(error.to_string())
        } else {
            Self::Aborted(error.to_string())
        }
    }

    /// HTTP status, for status errors.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the server rejected the request itself (4xx).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::HttpStatus { status, .. } if *status >= 400 && *status < 500)
    }

    /// Message to show the user: the server's own text when it sent one.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::HttpStatus {
                message: Some(message),
                ..
            } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl RetryClassify for NetworkError {
    fn is_transient(&self, policy: &RetryPolicy) -> bool {
        match self {
            Self::Timeout | Self::Aborted(_) => true,
            Self::HttpStatus { status, .. } => policy.retry_server_errors && *status >= 500,
            Self::Cancelled | Self::InvalidRequest(_) => false,
        }
    }

    fn timed_out() -> Self {
        Self::Timeout
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }
}

/// Extract the human-readable message from an error body.
///
/// Looks for the known message keys in a JSON object, then falls back to
/// the raw (truncated) text. Blank bodies yield `None`.
#[must_use]
pub fn extract_error_message(body: &str) -> Option<String> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        return ERROR_MESSAGE_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|value| value.as_str().map(str::trim).filter(|s| !s.is_empty()))
            .map(ToOwned::to_owned);
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(MAX_RAW_ERROR_CHARS).collect())
    }
}

/// A request relative to the client's base URL.
///
/// The path is kept as segments so values such as e-mails are percent-encoded
/// by `url` rather than spliced into a string.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new<I, S>(method: Method, segments: I, body: Option<Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            body,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments, None)
    }

    pub fn post<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, segments, Some(body))
    }

    pub fn put<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::PUT, segments, Some(body))
    }

    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::DELETE, segments, None)
    }

    /// Short label for logs, e.g. `GET carrinho/{..}`.
    fn label(&self) -> String {
        let head = self.segments.first().map_or("", String::as_str);
        format!("{} {head}", self.method)
    }
}

/// A successful response. Non-JSON bodies are kept as a JSON string and an
/// empty body becomes `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Handle to a retrying request running in the background.
#[derive(Debug)]
pub struct RetryHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<ApiResponse, NetworkError>>,
}

impl RetryHandle {
    /// Stop the request and any pending retries.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the request to finish.
    ///
    /// # Errors
    ///
    /// Returns the request's error, or `Cancelled` if the task was aborted.
    pub async fn join(self) -> Result<ApiResponse, NetworkError> {
        self.join.await.unwrap_or(Err(NetworkError::Cancelled))
    }
}

/// HTTP client applying a [`RetryPolicy`] to every call.
///
/// Cheap to clone. Clones share the connection pool and the cancellation
/// scope; [`RetryClient::scoped`] creates a client whose outstanding calls
/// can be cancelled on their own.
#[derive(Clone)]
pub struct RetryClient {
    inner: Arc<RetryClientInner>,
    scope: CancellationToken,
}

struct RetryClientInner {
    http: reqwest::Client,
    base_url: Url,
    bearer_token: Option<SecretString>,
}

impl std::fmt::Debug for RetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("bearer_token", &self.inner.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("cancelled", &self.scope.is_cancelled())
            .finish()
    }
}

impl RetryClient {
    /// Create a client for `base_url`.
    #[must_use]
    pub fn new(base_url: Url, bearer_token: Option<SecretString>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, bearer_token)
    }

    /// Create a client around an existing `reqwest::Client`.
    #[must_use]
    pub fn with_http_client(
        http: reqwest::Client,
        base_url: Url,
        bearer_token: Option<SecretString>,
    ) -> Self {
        Self {
            inner: Arc::new(RetryClientInner {
                http,
                base_url,
                bearer_token,
            }),
            scope: CancellationToken::new(),
        }
    }

    /// A client sharing this one's pool whose calls are cancelled by
    /// [`RetryClient::cancel_all`] on it, or on any parent scope.
    #[must_use]
    pub fn scoped(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            scope: self.scope.child_token(),
        }
    }

    /// Cancel every outstanding call made through this scope.
    pub fn cancel_all(&self) {
        self.scope.cancel();
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Send `request`, retrying per `policy`.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` once the retry budget is spent, immediately on a
    /// 4xx, or when the client scope is cancelled.
    #[instrument(skip(self, request, policy), fields(call = %request.label()))]
    pub async fn send(
        &self,
        request: &ApiRequest,
        policy: &RetryPolicy,
    ) -> Result<ApiResponse, NetworkError> {
        self.send_with_cancel(request, policy, &self.scope.child_token())
            .await
    }

    /// Send `request` in a background task and return a handle to it.
    #[must_use]
    pub fn spawn(&self, request: ApiRequest, policy: RetryPolicy) -> RetryHandle {
        let cancel = self.scope.child_token();
        let client = self.clone();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            client
                .send_with_cancel(&request, &policy, &task_cancel)
                .await
        });
        RetryHandle { cancel, join }
    }

    async fn send_with_cancel(
        &self,
        request: &ApiRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, NetworkError> {
        let url = self.url_for(request)?;
        let label = request.label();
        run_with_retry(policy, cancel, &label, |attempt| {
            let url = url.clone();
            async move {
                debug!(attempt = attempt + 1, url = %url, "Sending request");
                self.attempt(url, request).await
            }
        })
        .await
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, NetworkError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                NetworkError::InvalidRequest(format!(
                    "base URL cannot carry a path: {}",
                    self.inner.base_url
                ))
            })?
            .pop_if_empty()
            .extend(&request.segments);
        Ok(url)
    }

    async fn attempt(&self, url: Url, request: &ApiRequest) -> Result<ApiResponse, NetworkError> {
        let mut builder = self.inner.http.request(request.method.clone(), url);
        if let Some(token) = &self.inner.bearer_token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NetworkError::from_transport(&e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NetworkError::from_transport(&e))?;

        if !status.is_success() {
            return Err(NetworkError::HttpStatus {
                status: status.as_u16(),
                message: extract_error_message(&text),
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}
