//! Google PaLM `generateMessage` / `generateText` adapters (one-shot)

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::ProviderAdapter;
use crate::config::PalmConfig;
use crate::error::{GatewayError, Result};
use crate::proxy::{Envelope, RequestDescriptor};

const API_VERSION: &str = "v1beta2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PalmMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PalmExample {
    pub input: PalmMessage,
    pub output: PalmMessage,
}

/// Body of `POST /v1/palm/chat`
#[derive(Debug, Clone, Deserialize)]
pub struct PalmChatRequest {
    pub messages: Vec<PalmMessage>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub examples: Vec<PalmExample>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub candidate_count: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
}

/// Body of `POST /v1/palm/text`
#[derive(Debug, Clone, Deserialize)]
pub struct PalmTextRequest {
    pub prompt: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub candidate_count: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
}

#[derive(Serialize)]
struct MessagePrompt<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    examples: &'a [PalmExample],
    messages: &'a [PalmMessage],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateMessage<'a> {
    prompt: MessagePrompt<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateText<'a> {
    prompt: TextPrompt<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

/// Shared endpoint settings for both PaLM adapters
#[derive(Debug, Clone)]
struct PalmEndpoint {
    base_url: String,
    api_key: Option<String>,
}

impl PalmEndpoint {
    fn descriptor(
        &self,
        provider: &'static str,
        model: &str,
        method: &str,
        body: Value,
        headers: &[(String, String)],
    ) -> Result<RequestDescriptor> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GatewayError::ProviderDisabled("palm"))?;

        let raw = format!(
            "{}/{API_VERSION}/models/{model}:{method}",
            self.base_url.trim_end_matches('/')
        );
        let url = Url::parse(&raw)
            .map_err(|e| GatewayError::Config(format!("Invalid PaLM endpoint '{raw}': {e}")))?;

        Ok(RequestDescriptor::builder(provider, Method::POST, url)
            .headers(headers.iter().cloned())
            .query("key", api_key)
            .body(body)
            .build())
    }
}

/// Error message carried by a PaLM error body, if any
fn palm_error(data: &Value) -> Option<String> {
    let error = data.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Some(match error.get("status").and_then(Value::as_str) {
        Some(status) => format!("{status}: {message}"),
        None => message.to_string(),
    })
}

/// Mark provider error bodies as failures; transport errors pass through
fn shape_reply(envelope: Envelope, blocked: impl Fn(&Value) -> Option<String>) -> Envelope {
    let Some(data) = envelope.data.as_json() else {
        return envelope;
    };
    match palm_error(data).or_else(|| blocked(data)) {
        Some(message) => envelope.with_success(false).with_message(message),
        None => envelope,
    }
}

/// Content filters that replaced every candidate
fn blocked_reason(data: &Value) -> Option<String> {
    if data.get("candidates").is_some() {
        return None;
    }
    let reasons: Vec<&str> = data
        .get("filters")?
        .as_array()?
        .iter()
        .filter_map(|f| f.get("reason").and_then(Value::as_str))
        .collect();
    if reasons.is_empty() {
        return None;
    }
    Some(format!("Blocked by content filter: {}", reasons.join(", ")))
}

/// `models/{chat_model}:generateMessage`
#[derive(Debug, Clone)]
pub struct PalmChat {
    endpoint: PalmEndpoint,
    model: String,
}

impl PalmChat {
    /// Adapter with the API key read from the configured environment variable
    pub fn from_config(config: &PalmConfig) -> Self {
        Self::new(config, config.api_key())
    }

    pub fn new(config: &PalmConfig, api_key: Option<String>) -> Self {
        Self {
            endpoint: PalmEndpoint {
                base_url: config.base_url.clone(),
                api_key,
            },
            model: config.chat_model.clone(),
        }
    }
}

impl ProviderAdapter for PalmChat {
    type Request = PalmChatRequest;

    fn name(&self) -> &'static str {
        "palm"
    }

    fn build_request(
        &self,
        request: &PalmChatRequest,
        headers: &[(String, String)],
    ) -> Result<RequestDescriptor> {
        if request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }

        let body = serde_json::to_value(GenerateMessage {
            prompt: MessagePrompt {
                context: request.context.as_deref(),
                examples: &request.examples,
                messages: &request.messages,
            },
            temperature: request.temperature,
            candidate_count: request.candidate_count,
            top_p: request.top_p,
            top_k: request.top_k,
        })?;

        self.endpoint
            .descriptor(self.name(), &self.model, "generateMessage", body, headers)
    }

    fn parse_reply(&self, envelope: Envelope) -> Envelope {
        shape_reply(envelope, |_| None)
    }
}

/// `models/{text_model}:generateText`
#[derive(Debug, Clone)]
pub struct PalmText {
    endpoint: PalmEndpoint,
    model: String,
}

impl PalmText {
    pub fn from_config(config: &PalmConfig) -> Self {
        Self::new(config, config.api_key())
    }

    pub fn new(config: &PalmConfig, api_key: Option<String>) -> Self {
        Self {
            endpoint: PalmEndpoint {
                base_url: config.base_url.clone(),
                api_key,
            },
            model: config.text_model.clone(),
        }
    }
}

impl ProviderAdapter for PalmText {
    type Request = PalmTextRequest;

    fn name(&self) -> &'static str {
        "palm"
    }

    fn build_request(
        &self,
        request: &PalmTextRequest,
        headers: &[(String, String)],
    ) -> Result<RequestDescriptor> {
        if request.prompt.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }

        let body = serde_json::to_value(GenerateText {
            prompt: TextPrompt {
                text: &request.prompt,
            },
            temperature: request.temperature,
            candidate_count: request.candidate_count,
            max_output_tokens: request.max_output_tokens,
            top_p: request.top_p,
            top_k: request.top_k,
        })?;

        self.endpoint
            .descriptor(self.name(), &self.model, "generateText", body, headers)
    }

    fn parse_reply(&self, envelope: Envelope) -> Envelope {
        shape_reply(envelope, blocked_reason)
    }
}
