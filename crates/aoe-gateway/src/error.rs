//! Error types for the gateway

use thiserror::Error;

/// Main error type for gateway operations outside the streaming core
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An adapter could not build an upstream request from the caller's input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A provider adapter is not configured (missing URL or credentials)
    #[error("Provider '{0}' is not configured")]
    ProviderDisabled(&'static str),

    /// HTTP server errors (bind, serve)
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
