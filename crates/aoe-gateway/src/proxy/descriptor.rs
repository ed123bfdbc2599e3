//! Immutable description of one upstream call

use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use super::envelope::Envelope;
use super::error::ProxyError;
use super::headers::{self, HeaderPairs};

/// Maximum number of characters of the body kept in log lines
pub const BODY_PREVIEW_CHARS: usize = 200;

/// Placeholder logged instead of multipart bodies
pub const MULTIPART_PREVIEW: &str = "image";

/// A file sent as one part of a multipart form body
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    /// Form field name
    pub field: String,
    /// File name reported to the upstream
    pub file_name: String,
    /// MIME type of the part, if known
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Everything the transport needs to perform one upstream call.
///
/// Built once by an adapter through [`RequestDescriptor::builder`] and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    provider: String,
    url: Url,
    method: Method,
    headers: HeaderPairs,
    body: Option<Value>,
    timeout: Option<Duration>,
    query: Vec<(String, String)>,
    files: Vec<FileAttachment>,
}

impl RequestDescriptor {
    pub fn builder(
        provider: impl Into<String>,
        method: Method,
        url: Url,
    ) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder {
            inner: RequestDescriptor {
                provider: provider.into(),
                url,
                method,
                headers: Vec::new(),
                body: None,
                timeout: None,
                query: Vec::new(),
                files: Vec::new(),
            },
        }
    }

    /// Provider tag, used only in diagnostics
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Headers as supplied by the adapter, before sanitizing
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Headers that may be forwarded upstream
    pub fn sanitized_headers(&self) -> HeaderPairs {
        headers::sanitize(&self.headers)
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Per-call timeout override
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn files(&self) -> &[FileAttachment] {
        &self.files
    }

    /// Whether the body goes out as multipart form data
    pub fn is_multipart(&self) -> bool {
        !self.files.is_empty() || headers::is_multipart(&self.headers)
    }

    /// Body as it appears in log lines: the JSON text cut to
    /// [`BODY_PREVIEW_CHARS`] characters, or [`MULTIPART_PREVIEW`] for
    /// multipart bodies.
    pub fn body_preview(&self) -> String {
        if self.is_multipart() {
            return MULTIPART_PREVIEW.to_string();
        }
        let text = match &self.body {
            None => return String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
        };
        truncate_chars(&text, BODY_PREVIEW_CHARS)
    }
}

/// Keep at most `max` characters of `text`
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Per-call diagnostics: what was sent, under which request id
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub request_id: Uuid,
    pub provider: String,
    pub url: String,
    pub method: String,
    /// Headers as actually forwarded
    pub headers: HeaderPairs,
    pub body: String,
}

impl CallSummary {
    pub fn new(descriptor: &RequestDescriptor, forwarded: &[(String, String)]) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            provider: descriptor.provider.clone(),
            url: descriptor.url.to_string(),
            method: descriptor.method.to_string(),
            headers: forwarded.to_vec(),
            body: descriptor.body_preview(),
        }
    }

    pub fn log_start(&self) {
        info!(
            request_id = %self.request_id,
            provider = %self.provider,
            url = %self.url,
            method = %self.method,
            headers = ?self.headers,
            body = %self.body,
            "Upstream call"
        );
    }

    pub fn log_failure(&self, err: &ProxyError, envelope: &Envelope) {
        error!(
            request_id = %self.request_id,
            provider = %self.provider,
            url = %self.url,
            method = %self.method,
            headers = ?self.headers,
            body = %self.body,
            error_type = err.category(),
            response = %envelope.to_json(),
            "[{}] upstream call failed: {}",
            self.provider,
            err
        );
    }
}

/// Consuming builder for [`RequestDescriptor`]
#[derive(Debug)]
pub struct RequestDescriptorBuilder {
    inner: RequestDescriptor,
}

impl RequestDescriptorBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.inner
            .headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.inner.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = Some(timeout);
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.query.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, file: FileAttachment) -> Self {
        self.inner.files.push(file);
        self
    }

    pub fn build(self) -> RequestDescriptor {
        self.inner
    }
}
