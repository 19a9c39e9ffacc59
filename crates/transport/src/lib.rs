//! UPLINK: backend transport
//!
//! Opaque request/response access to the tracking backend, plus the
//! account and device operations that sit beside location reporting.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use thiserror::Error;

pub mod backend;
pub mod http;

pub use backend::{BackendClient, Device, Endpoints};
pub use http::HttpTransport;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Uplink errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("LINK DOWN: {0}")]
    Connect(String),

    #[error("LINK TIMEOUT AFTER {0:?}")]
    Timeout(Duration),

    #[error("TRANSMISSION FAILED: {0}")]
    Request(String),

    #[error("SERVER REJECTED: HTTP {0}")]
    Status(u16),

    #[error("CORRUPTED RESPONSE: {0}")]
    Malformed(String),

    #[error("ACCESS DENIED: {0}")]
    Rejected(String),

    #[error("UPLINK CANCELLED")]
    Cancelled,
}

impl TransportError {
    /// Transport-level failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Request(_)
        )
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            bearer_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
            bearer_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Attach `Authorization: Bearer <token>` when a token is present
    pub fn with_bearer(mut self, token: Option<impl Into<String>>) -> Self {
        self.bearer_token = token.map(Into::into).filter(|t: &String| !t.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Response to a completed exchange, whatever its status
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON; `None` when empty or not JSON
    pub fn json(&self) -> Option<Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&self.body).ok()
    }
}

/// Backend transport
///
/// `Ok` means an HTTP exchange completed; non-2xx statuses are returned
/// as responses and classified by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Connect("refused".to_string());
        assert_eq!(err.to_string(), "LINK DOWN: refused");

        let err = TransportError::Status(503);
        assert_eq!(err.to_string(), "SERVER REJECTED: HTTP 503");

        let err = TransportError::Cancelled;
        assert_eq!(err.to_string(), "UPLINK CANCELLED");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Connect("dns".to_string()).is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::Request("reset".to_string()).is_retryable());

        assert!(!TransportError::Status(500).is_retryable());
        assert!(!TransportError::Malformed("x".to_string()).is_retryable());
        assert!(!TransportError::Rejected("x".to_string()).is_retryable());
        assert!(!TransportError::Cancelled.is_retryable());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(TransportError::Status(401).status(), Some(401));
        assert_eq!(TransportError::Cancelled.status(), None);
    }

    #[test]
    fn test_request_builders() {
        let req = TransportRequest::post_json("http://x/update", json!({"lat": 1.0}))
            .with_bearer(Some("tok"))
            .with_timeout(Duration::from_secs(3));

        assert_eq!(req.method, Method::Post);
        assert_eq!(req.bearer_token.as_deref(), Some("tok"));
        assert_eq!(req.timeout, Duration::from_secs(3));
        assert_eq!(req.body, Some(json!({"lat": 1.0})));

        let req = TransportRequest::get("http://x/devices").with_bearer(None::<String>);
        assert_eq!(req.method, Method::Get);
        assert!(req.bearer_token.is_none());
        assert_eq!(req.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_empty_bearer_is_dropped() {
        let req = TransportRequest::get("http://x").with_bearer(Some(""));
        assert!(req.bearer_token.is_none());
    }

    #[test]
    fn test_response_helpers() {
        assert!(TransportResponse::new(200, "").is_success());
        assert!(TransportResponse::new(204, "").is_success());
        assert!(!TransportResponse::new(302, "").is_success());
        assert!(!TransportResponse::new(500, "").is_success());

        assert_eq!(TransportResponse::new(200, "  ").json(), None);
        assert_eq!(TransportResponse::new(200, "<html>").json(), None);
        assert_eq!(
            TransportResponse::new(200, r#"{"lock":true}"#).json(),
            Some(json!({"lock": true}))
        );
    }
}
