//! Outbound HTTP to provider endpoints
//!
//! Two entry points:
//! - [`TransportClient::send`] / [`TransportClient::request`] for one-shot calls
//! - [`TransportClient::open_stream`] for streamed replies, yielding text
//!   fragments as they arrive

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::{GatewayError, Result};

use super::descriptor::{CallSummary, RequestDescriptor, truncate_chars};
use super::envelope::{Envelope, Payload};
use super::error::ProxyError;
use super::headers::{self, HeaderPairs};

/// Decoded text fragments of a streamed upstream body
pub type FragmentStream = BoxStream<'static, std::result::Result<String, ProxyError>>;

/// Maximum characters of an error body kept in an `UpstreamStatus` error
const ERROR_BODY_CHARS: usize = 200;

/// HTTP client shared by every adapter
#[derive(Debug, Clone)]
pub struct TransportClient {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl TransportClient {
    /// Build the shared client from configuration.
    ///
    /// No client-wide timeout is set: streaming calls enforce their deadline
    /// per read, one-shot calls per request.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, config.timeout()))
    }

    pub fn with_client(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn timeout_for(&self, descriptor: &RequestDescriptor) -> Duration {
        descriptor.timeout().unwrap_or(self.default_timeout)
    }

    /// One-shot call returning the decoded body.
    ///
    /// Bodies that are not JSON come back as [`Payload::Raw`]. The upstream
    /// status is not checked; provider error bodies are returned as data.
    pub async fn send(
        &self,
        descriptor: &RequestDescriptor,
    ) -> std::result::Result<Payload, ProxyError> {
        let headers = one_shot_headers(descriptor);
        let summary = CallSummary::new(descriptor, &headers);
        self.send_logged(descriptor, &headers, &summary).await
    }

    /// One-shot call folded into an envelope. Never fails: errors become the
    /// envelope message with `success` left at its default.
    pub async fn request(&self, descriptor: &RequestDescriptor) -> Envelope {
        let headers = one_shot_headers(descriptor);
        let summary = CallSummary::new(descriptor, &headers);
        match self.send_logged(descriptor, &headers, &summary).await {
            Ok(data) => Envelope::new().with_data(data),
            Err(err) => {
                let envelope = Envelope::new().with_message(err.to_string());
                summary.log_failure(&err, &envelope);
                envelope
            }
        }
    }

    async fn send_logged(
        &self,
        descriptor: &RequestDescriptor,
        headers: &[(String, String)],
        summary: &CallSummary,
    ) -> std::result::Result<Payload, ProxyError> {
        let timeout = self.timeout_for(descriptor);
        summary.log_start();

        let response = self
            .prepare(descriptor, headers)?
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProxyError::from_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                request_id = %summary.request_id,
                provider = %summary.provider,
                status = status.as_u16(),
                "Upstream returned non-success status"
            );
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::from_reqwest(e, timeout))?;

        Ok(decode_body(body))
    }

    /// Open a streamed call.
    ///
    /// Fails fast with a retryable [`ProxyError::UpstreamStatus`] when the
    /// upstream answers with a non-success status. Otherwise the returned
    /// stream yields text fragments as they arrive, with each read bounded by
    /// the call timeout. There is no internal retry.
    pub async fn open_stream(
        &self,
        descriptor: &RequestDescriptor,
    ) -> std::result::Result<FragmentStream, ProxyError> {
        let summary = CallSummary::new(descriptor, &stream_headers(descriptor));
        self.open_stream_logged(descriptor, &summary).await
    }

    pub(crate) async fn open_stream_logged(
        &self,
        descriptor: &RequestDescriptor,
        summary: &CallSummary,
    ) -> std::result::Result<FragmentStream, ProxyError> {
        let timeout = self.timeout_for(descriptor);
        summary.log_start();

        let request = self.prepare(descriptor, &summary.headers)?.send();
        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ProxyError::Timeout(timeout))?
            .map_err(|e| ProxyError::from_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout(timeout, response.text())
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_default();
            return Err(ProxyError::UpstreamStatus {
                status: status.as_u16(),
                body: truncate_chars(&body, ERROR_BODY_CHARS),
            });
        }

        let bytes = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| ProxyError::from_reqwest(e, timeout)));

        Ok(text_fragments(bytes, timeout))
    }

    fn prepare(
        &self,
        descriptor: &RequestDescriptor,
        headers: &[(String, String)],
    ) -> std::result::Result<reqwest::RequestBuilder, ProxyError> {
        let mut builder = self
            .client
            .request(descriptor.method().clone(), descriptor.url().clone())
            .headers(to_header_map(headers));

        if !descriptor.query().is_empty() {
            builder = builder.query(descriptor.query());
        }

        if descriptor.is_multipart() {
            builder = builder.multipart(multipart_form(descriptor)?);
        } else if let Some(body) = descriptor.body() {
            builder = builder.json(body);
        }

        Ok(builder)
    }
}

/// Sanitized headers for one-shot calls. Multipart bodies get their content
/// type (with boundary) from the HTTP client.
fn one_shot_headers(descriptor: &RequestDescriptor) -> HeaderPairs {
    let mut headers = descriptor.sanitized_headers();
    if descriptor.is_multipart() {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
    }
    headers
}

/// Sanitized headers for streamed calls, with the JSON content type forced
pub fn stream_headers(descriptor: &RequestDescriptor) -> HeaderPairs {
    let mut headers = one_shot_headers(descriptor);
    if !descriptor.is_multipart() {
        headers::set_header(&mut headers, "Content-Type", "application/json");
    }
    headers
}

fn to_header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => debug!("Skipping invalid header: {name}"),
        }
    }
    map
}

/// Multipart form: scalar body members as text fields, then file parts
fn multipart_form(descriptor: &RequestDescriptor) -> std::result::Result<Form, ProxyError> {
    let mut form = Form::new();

    if let Some(Value::Object(fields)) = descriptor.body() {
        for (name, value) in fields {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            form = form.text(name.clone(), text);
        }
    }

    for file in descriptor.files() {
        let mut part = Part::bytes(file.bytes.to_vec()).file_name(file.file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type).map_err(|e| {
                ProxyError::Transport(format!(
                    "Invalid content type '{content_type}' for part '{}': {e}",
                    file.field
                ))
            })?;
        }
        form = form.part(file.field.clone(), part);
    }

    Ok(form)
}

/// Decode a one-shot body as JSON, falling back to the raw bytes
pub fn decode_body(body: Bytes) -> Payload {
    match serde_json::from_slice::<Value>(&body) {
        Ok(value) => Payload::Json(value),
        Err(e) => {
            debug!(
                error = %ProxyError::Decode(e.to_string()),
                bytes = body.len(),
                "Upstream body is not JSON, returning raw bytes"
            );
            Payload::Raw(body)
        }
    }
}

/// Turn a byte stream into text fragments.
///
/// Each read is bounded by `read_timeout`. A multi-byte character split
/// across reads is carried over to the next fragment. The stream ends after
/// the first error.
pub fn text_fragments<S>(bytes: S, read_timeout: Duration) -> FragmentStream
where
    S: Stream<Item = std::result::Result<Bytes, ProxyError>> + Send + 'static,
{
    async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = Utf8Decoder::new();
        loop {
            match tokio::time::timeout(read_timeout, bytes.next()).await {
                Err(_) => {
                    yield Err(ProxyError::Timeout(read_timeout));
                    break;
                }
                Ok(None) => {
                    let tail = decoder.finish();
                    if !tail.is_empty() {
                        yield Ok(tail);
                    }
                    break;
                }
                Ok(Some(Err(err))) => {
                    yield Err(err);
                    break;
                }
                Ok(Some(Ok(chunk))) => {
                    let text = decoder.decode(&chunk);
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                }
            }
        }
    }
    .boxed()
}

/// Incremental UTF-8 decoder. Invalid sequences become U+FFFD; an incomplete
/// trailing sequence waits for the next chunk.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: keep it for later
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use reqwest::Method;
    use url::Url;

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor::builder(
            "test",
            Method::POST,
            Url::parse("http://localhost/x").unwrap(),
        )
        .header("content-type", "text/plain")
        .header("User-Agent", "curl")
        .header("Authorization", "Bearer t")
        .build()
    }

    #[test]
    fn test_stream_headers_force_json_content_type() {
        let headers = stream_headers(&descriptor());
        assert_eq!(
            headers,
            vec![
                ("Authorization".to_string(), "Bearer t".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ]
        );
    }

    #[test]
    fn test_one_shot_headers_keep_caller_content_type() {
        let headers = one_shot_headers(&descriptor());
        assert!(headers.contains(&("content-type".to_string(), "text/plain".to_string())));
        assert!(!headers.iter().any(|(n, _)| n == "User-Agent"));
    }

    #[test]
    fn test_to_header_map_skips_invalid() {
        let map = to_header_map(&[
            ("x-ok".to_string(), "1".to_string()),
            ("bad header".to_string(), "2".to_string()),
            ("x-bad-value".to_string(), "line\nbreak".to_string()),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("x-ok").unwrap(), "1");
    }

    #[test]
    fn test_decode_body_json_and_raw() {
        let json = decode_body(Bytes::from_static(br#"{"a": 1}"#));
        assert_eq!(json.as_json().unwrap()["a"], 1);

        let png = Bytes::from_static(b"\x89PNG\r\n\x1a\n");
        assert_eq!(decode_body(png.clone()), Payload::Raw(png));
    }

    #[test]
    fn test_utf8_decoder_carries_split_characters() {
        let text = "añ☺😀";
        let bytes = text.as_bytes();
        for split in 1..bytes.len() {
            let mut decoder = Utf8Decoder::new();
            let mut out = decoder.decode(&bytes[..split]);
            out.push_str(&decoder.decode(&bytes[split..]));
            out.push_str(&decoder.finish());
            assert_eq!(out, text, "split at {split}");
        }
    }

    #[test]
    fn test_utf8_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        // Dangling lead byte at end of stream
        assert_eq!(decoder.decode(b"c\xe2"), "c");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_text_fragments_decode_across_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"{\"t\": \"\xe2\x98")),
            Ok(Bytes::from_static(b"\xba\"}")),
        ];
        let fragments: Vec<_> = text_fragments(stream::iter(chunks), Duration::from_secs(1))
            .collect()
            .await;

        let texts: Vec<String> = fragments.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(texts, vec!["{\"t\": \"".to_string(), "☺\"}".to_string()]);
    }

    #[tokio::test]
    async fn test_text_fragments_read_timeout() {
        let first = stream::iter(vec![Ok(Bytes::from_static(b"[1,"))]);
        let stalled = first.chain(stream::pending());
        let fragments: Vec<_> = text_fragments(stalled, Duration::from_millis(50))
            .collect()
            .await;

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].as_ref().unwrap(), "[1,");
        assert!(matches!(fragments[1], Err(ProxyError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_text_fragments_stop_after_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"a")),
            Err(ProxyError::Transport("reset".to_string())),
            Ok(Bytes::from_static(b"b")),
        ];
        let fragments: Vec<_> = text_fragments(stream::iter(chunks), Duration::from_secs(1))
            .collect()
            .await;

        assert_eq!(fragments.len(), 2);
        assert!(matches!(fragments[1], Err(ProxyError::Transport(_))));
    }
}
