//! Dashboard backend API client.
//!
//! Provides authenticated HTTP communication with the restaurant backend:
//! order listing and transitions for the views, the order feed polled by the
//! synchronizer, and the login endpoint.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::orders::{OrderAction, OrderId};

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend origin:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Join a base and an endpoint. The base loses its trailing slashes and the
/// endpoint always gains a leading one.
pub fn build_url(base: &str, endpoint: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let endpoint = endpoint.trim();
    if endpoint.starts_with('/') {
        format!("{base}{endpoint}")
    } else {
        format!("{base}/{endpoint}")
    }
}

/// WebSocket endpoint for the push channel (`{base}/ws`, `ws`/`wss` scheme).
pub fn build_ws_url(base: &str) -> String {
    let base = normalize_base_url(base);
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base
    };
    build_url(&ws_base, "/ws")
}

/// Characters escaped in a single path segment: everything except the
/// RFC 3986 unreserved set.
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub(crate) fn encode_path_segment(input: &str) -> String {
    utf8_percent_encode(input, PATH_SEGMENT_ENCODE_SET).to_string()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Cannot reach dashboard backend at {url}")]
    Connect { url: String },
    #[error("Connection to {url} timed out")]
    Timeout { url: String },
    #[error("Invalid dashboard backend URL: {url}")]
    InvalidUrl { url: String },
    #[error("Network error communicating with {url}: {message}")]
    Network { url: String, message: String },
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },
    #[error("Invalid JSON from dashboard backend: {0}")]
    InvalidJson(String),
}

impl ApiError {
    /// Transport-level failures are retried by the synchronizer; everything
    /// else is a server answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Network { .. }
        )
    }

    /// Message suitable for an inline error next to the initiating view.
    pub fn inline_message(&self) -> String {
        match self {
            Self::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Convert a `reqwest::Error` into a user-friendly error.
fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Connect {
            url: url.to_string(),
        };
    }
    if err.is_timeout() {
        return ApiError::Timeout {
            url: url.to_string(),
        };
    }
    if err.is_builder() {
        return ApiError::InvalidUrl {
            url: url.to_string(),
        };
    }
    ApiError::Network {
        url: url.to_string(),
        message: err.to_string(),
    }
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "Admin not authorized".to_string(),
        404 => "Resource not found".to_string(),
        s if s >= 500 => format!("Dashboard backend server error (HTTP {s})"),
        s => format!("Unexpected response from dashboard backend (HTTP {s})"),
    }
}

/// Pull the backend's `{message}` (or `{error}`) out of an error body.
fn error_message(status: StatusCode, body_text: &str) -> String {
    serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| status_error(status))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client bound to one backend origin and, optionally, one admin.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    admin_id: Option<String>,
    token: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("admin_id", &self.admin_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(base_url);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network {
                url: base_url.clone(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url,
            admin_id: None,
            token: None,
        })
    }

    /// Attach the admin identity sent as `Admin-ID` (and the bearer token,
    /// when the session has one).
    pub fn with_credentials(mut self, admin_id: &str, token: Option<&str>) -> Self {
        self.admin_id = Some(admin_id.trim().to_string());
        self.token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Zeroizing::new(t.to_string()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn admin_id(&self) -> Option<&str> {
        self.admin_id.as_deref()
    }

    /// Absolute URL for an endpoint under `{base}/api`.
    pub fn api_url(&self, endpoint: &str) -> String {
        build_url(&format!("{}/api", self.base_url), endpoint)
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let full_url = self.api_url(endpoint);
        debug!(method = %method, url = %full_url, "dashboard request");

        let mut req = self
            .http
            .request(method, &full_url)
            .header("Content-Type", "application/json");
        if let Some(admin_id) = self.admin_id.as_deref() {
            req = req.header("Admin-ID", admin_id);
        }
        if let Some(token) = self.token.as_deref() {
            req = req.bearer_auth(token.as_str());
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(status, &body_text),
            });
        }

        // Return the JSON body, or null for empty 204 responses.
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| ApiError::InvalidJson(e.to_string()))
    }

    /// `GET /api/orders`: the raw order collection for the current admin.
    pub async fn fetch_orders(&self) -> Result<Value, ApiError> {
        self.request(Method::GET, "/orders", None).await
    }

    pub async fn get_order(&self, id: &OrderId) -> Result<Value, ApiError> {
        let path = format!("/orders/{}", encode_path_segment(id.as_str()));
        self.request(Method::GET, &path, None).await
    }

    /// `POST /api/orders/{id}/start|complete|cancel`.
    pub async fn transition_order(
        &self,
        id: &OrderId,
        action: OrderAction,
    ) -> Result<Value, ApiError> {
        let path = format!(
            "/orders/{}/{}",
            encode_path_segment(id.as_str()),
            action.path_segment()
        );
        let resp = self.request(Method::POST, &path, None).await?;
        info!(order_id = %id, action = action.path_segment(), "order transition accepted");
        Ok(resp)
    }

    pub async fn delete_order(&self, id: &OrderId) -> Result<(), ApiError> {
        let path = format!("/orders/{}", encode_path_segment(id.as_str()));
        self.request(Method::DELETE, &path, None).await?;
        info!(order_id = %id, "order deleted");
        Ok(())
    }

    /// `POST /api/login`. The backend answers 200 with `{error}` on bad
    /// credentials, so callers inspect the body.
    pub async fn login(&self, username: &str, password: &str) -> Result<Value, ApiError> {
        let body = serde_json::json!({ "username": username, "password": password });
        self.request(Method::POST, "/login", Some(&body)).await
    }
}
