//! Provider adapters
//!
//! Each adapter turns a caller request into a [`RequestDescriptor`] and
//! shapes the reply. Transport, parsing and envelopes are left to the core.

mod bard;
mod palm;
mod spark;

pub use bard::{BardAskImage, BardAskImageRequest, ImageUpload};
pub use palm::{PalmChat, PalmChatRequest, PalmExample, PalmMessage, PalmText, PalmTextRequest};
pub use spark::{SparkChat, SparkChatRequest, SparkMessage};

use url::Url;

use crate::error::{GatewayError, Result};
use crate::proxy::{Envelope, RequestDescriptor, StreamCallback};

/// Provider-specific request building and reply shaping
pub trait ProviderAdapter: Send + Sync {
    /// Caller-facing request shape
    type Request;

    /// Provider tag used in logs
    fn name(&self) -> &'static str;

    /// Build the upstream call. `headers` are the caller's headers; the
    /// core sanitizes them before forwarding.
    fn build_request(
        &self,
        request: &Self::Request,
        headers: &[(String, String)],
    ) -> Result<RequestDescriptor>;

    /// Shape a one-shot result. The default passes it through.
    fn parse_reply(&self, envelope: Envelope) -> Envelope {
        envelope
    }
}

/// Adapters whose replies are streamed
pub trait StreamingAdapter: ProviderAdapter {
    /// Fresh callback for one streamed call
    fn stream_callback(&self) -> Box<dyn StreamCallback>;
}

/// Parse a configured endpoint, treating an empty value as "not configured"
fn endpoint(raw: &str, provider: &'static str) -> Result<Url> {
    if raw.trim().is_empty() {
        return Err(GatewayError::ProviderDisabled(provider));
    }
    Url::parse(raw)
        .map_err(|e| GatewayError::Config(format!("Invalid {provider} endpoint '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_empty_is_disabled() {
        assert!(matches!(
            endpoint("  ", "spark"),
            Err(GatewayError::ProviderDisabled("spark"))
        ));
    }

    #[test]
    fn test_endpoint_invalid_is_config_error() {
        assert!(matches!(
            endpoint("not a url", "bard"),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_endpoint_valid() {
        let url = endpoint("https://spark.example.com/v2/chat", "spark").unwrap();
        assert_eq!(url.host_str(), Some("spark.example.com"));
    }
}
