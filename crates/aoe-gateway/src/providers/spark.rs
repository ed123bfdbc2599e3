//! Xunfei Spark chat adapter (streaming)
//!
//! The upstream streams concatenated frame objects:
//!
//! ```text
//! {"header": {"code": 0, "message": "Success", "sid": "...", "status": 1},
//!  "payload": {"choices": {"status": 1, "seq": 0, "text": [{"content": "Hel", "role": "assistant"}]}}}
//! ```
//!
//! A non-zero header `code` is a provider error. Each `content` is forwarded
//! to the caller as soon as its frame's payload completes.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ProviderAdapter, StreamingAdapter, endpoint};
use crate::config::SparkConfig;
use crate::error::{GatewayError, Result};
use crate::proxy::{
    Assembled, JsonEvent, OutputSink, ProxyError, RequestDescriptor, StreamCallback,
    ValueAssembler,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST /v1/spark/chat`
#[derive(Debug, Clone, Deserialize)]
pub struct SparkChatRequest {
    pub messages: Vec<SparkMessage>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_k: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SparkChat {
    config: SparkConfig,
}

impl SparkChat {
    pub fn new(config: &SparkConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl ProviderAdapter for SparkChat {
    type Request = SparkChatRequest;

    fn name(&self) -> &'static str {
        "spark"
    }

    fn build_request(
        &self,
        request: &SparkChatRequest,
        headers: &[(String, String)],
    ) -> Result<RequestDescriptor> {
        let url = endpoint(&self.config.url, self.name())?;

        if request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }

        let mut chat = json!({ "domain": self.config.domain });
        if let Some(temperature) = request.temperature {
            chat["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            chat["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_k) = request.top_k {
            chat["top_k"] = json!(top_k);
        }

        let body = json!({
            "header": {
                "app_id": self.config.app_id,
                "uid": request.uid.as_deref().unwrap_or_default(),
            },
            "parameter": { "chat": chat },
            "payload": { "message": { "text": request.messages } },
        });

        Ok(RequestDescriptor::builder(self.name(), Method::POST, url)
            .headers(headers.iter().cloned())
            .body(body)
            .build())
    }
}

impl StreamingAdapter for SparkChat {
    fn stream_callback(&self) -> Box<dyn StreamCallback> {
        Box::new(SparkFrames::default())
    }
}

/// Reassembles frame members and writes reply text to the sink
#[derive(Default)]
pub(crate) struct SparkFrames {
    assembler: ValueAssembler,
}

impl SparkFrames {
    fn check_header(header: &Value) -> std::result::Result<(), ProxyError> {
        let code = header.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code == 0 {
            return Ok(());
        }
        let message = header
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let sid = header.get("sid").and_then(Value::as_str).unwrap_or("-");
        Err(ProxyError::Callback(format!(
            "spark code {code}: {message} (sid {sid})"
        )))
    }

    fn write_payload(payload: &Value, sink: &mut OutputSink) {
        let Some(texts) = payload.pointer("/choices/text").and_then(Value::as_array) else {
            return;
        };
        for content in texts
            .iter()
            .filter_map(|t| t.get("content").and_then(Value::as_str))
        {
            sink.write(content);
        }
    }
}

impl StreamCallback for SparkFrames {
    fn on_event(
        &mut self,
        event: JsonEvent,
        sink: &mut OutputSink,
    ) -> std::result::Result<(), ProxyError> {
        match self.assembler.push(event) {
            Some(Assembled::Pair(key, value)) => match key.as_str() {
                "header" => Self::check_header(&value),
                "payload" => {
                    Self::write_payload(&value, sink);
                    Ok(())
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Envelope, NormalizedStream};
    use futures::StreamExt;
    use futures::stream;

    fn config() -> SparkConfig {
        SparkConfig {
            url: "http://spark.local/v2/chat".to_string(),
            app_id: "app-1".to_string(),
            ..SparkConfig::default()
        }
    }

    fn frame(code: i64, content: &str) -> String {
        let message = if code == 0 { "Success" } else { "bad app id" };
        json!({
            "header": {"code": code, "message": message, "sid": "s1", "status": 1},
            "payload": {"choices": {"status": 1, "seq": 0, "text": [{"content": content, "role": "assistant"}]}}
        })
        .to_string()
    }

    async fn run(pieces: Vec<String>) -> Vec<Envelope> {
        let fragments = stream::iter(pieces.into_iter().map(Ok).collect::<Vec<_>>());
        NormalizedStream::new(fragments, SparkChat::new(&config()).stream_callback())
            .collect()
            .await
    }

    #[test]
    fn test_build_request_body() {
        let request: SparkChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "uid": "u1",
            "temperature": 0.5
        }))
        .unwrap();
        let descriptor = SparkChat::new(&config()).build_request(&request, &[]).unwrap();

        assert_eq!(descriptor.url().as_str(), "http://spark.local/v2/chat");
        assert_eq!(
            descriptor.body().unwrap(),
            &json!({
                "header": {"app_id": "app-1", "uid": "u1"},
                "parameter": {"chat": {"domain": "generalv2", "temperature": 0.5}},
                "payload": {"message": {"text": [{"role": "user", "content": "Hi"}]}}
            })
        );
    }

    #[test]
    fn test_build_request_rejects_empty_messages() {
        let request: SparkChatRequest = serde_json::from_value(json!({"messages": []})).unwrap();
        assert!(SparkChat::new(&config()).build_request(&request, &[]).is_err());
    }

    #[test]
    fn test_unconfigured_is_disabled() {
        let request: SparkChatRequest =
            serde_json::from_value(json!({"messages": [{"role": "user", "content": "Hi"}]}))
                .unwrap();
        assert!(matches!(
            SparkChat::new(&SparkConfig::default()).build_request(&request, &[]),
            Err(GatewayError::ProviderDisabled("spark"))
        ));
    }

    #[tokio::test]
    async fn test_frames_become_chunks() {
        let out = run(vec![frame(0, "Hel"), frame(0, "lo")]).await;
        assert_eq!(out, vec![Envelope::chunk("Hel"), Envelope::chunk("lo")]);
    }

    #[tokio::test]
    async fn test_frame_split_across_fragments() {
        let whole = format!("{}{}", frame(0, "Hello"), frame(0, " there"));
        let (a, b) = whole.split_at(whole.len() / 2 + 3);
        let out = run(vec![a.to_string(), b.to_string()]).await;

        let text: String = out.iter().map(|e| e.message.as_str()).collect();
        assert!(out.iter().all(|e| e.success));
        assert_eq!(text, "Hello there");
    }

    #[tokio::test]
    async fn test_error_code_ends_stream() {
        let out = run(vec![frame(0, "partial"), frame(10005, "")]).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Envelope::chunk("partial"));
        assert!(!out[1].success);
        assert_eq!(
            out[1].message,
            "Provider error: spark code 10005: bad app id (sid s1)"
        );
    }
}
