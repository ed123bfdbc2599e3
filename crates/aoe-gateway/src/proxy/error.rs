//! Error kinds raised by the streaming core
//!
//! None of these escape the core: one-shot calls fold them into an
//! [`Envelope`](super::Envelope) message and streaming calls terminate with a
//! single failure envelope.

use std::time::Duration;
use thiserror::Error;

use super::parser::ParseError;

/// Errors that can occur while talking to an upstream provider
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// Connection, DNS, TLS or body transfer failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response (one-shot) or no bytes (streaming read) within the deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream answered with a non-success status
    #[error("Request failed, upstream status code: {status}")]
    UpstreamStatus { status: u16, body: String },

    /// Malformed or unexpected JSON from upstream
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// One-shot body is not valid structured data. Recovered locally by the
    /// transport, never surfaced to callers.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A stream callback rejected a provider frame
    #[error("Provider error: {0}")]
    Callback(String),
}

impl ProxyError {
    /// Classify a reqwest error, using `timeout` to describe deadline expiry
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout(timeout)
        } else if err.is_connect() {
            ProxyError::Transport(format!("Failed to connect to upstream: {err}"))
        } else if err.is_body() || err.is_decode() {
            ProxyError::Transport(format!("Failed to read upstream body: {err}"))
        } else {
            ProxyError::Transport(format!("Request failed: {err}"))
        }
    }

    /// Whether the caller may reasonably retry the same call
    pub fn is_retryable(&self) -> bool {
        match self {
            ProxyError::Timeout(_) | ProxyError::Transport(_) => true,
            ProxyError::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            ProxyError::Parse(_) | ProxyError::Decode(_) | ProxyError::Callback(_) => false,
        }
    }

    /// Short label for logs
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::Transport(_) => "transport",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::UpstreamStatus { .. } => "upstream_status",
            ProxyError::Parse(_) => "parse",
            ProxyError::Decode(_) => "decode",
            ProxyError::Callback(_) => "callback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_error_display() {
        let err = ProxyError::UpstreamStatus {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Request failed, upstream status code: 500"
        );

        let err = ProxyError::Timeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "Request timed out after 3s");

        let err = ProxyError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn test_proxy_error_categories() {
        assert_eq!(
            ProxyError::Transport("x".to_string()).category(),
            "transport"
        );
        assert_eq!(
            ProxyError::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
        assert_eq!(
            ProxyError::UpstreamStatus {
                status: 502,
                body: String::new()
            }
            .category(),
            "upstream_status"
        );
        assert_eq!(
            ProxyError::Parse(ParseError::UnexpectedEnd { offset: 0 }).category(),
            "parse"
        );
        assert_eq!(ProxyError::Decode("x".to_string()).category(), "decode");
        assert_eq!(
            ProxyError::Callback("x".to_string()).category(),
            "callback"
        );
    }

    #[test]
    fn test_retryable_statuses() {
        let status = |status| ProxyError::UpstreamStatus {
            status,
            body: String::new(),
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(ProxyError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ProxyError::Callback("bad frame".to_string()).is_retryable());
    }
}
