//! The `{success, msg, data}` result shape returned to every caller

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Opaque payload carried by an [`Envelope`]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// No payload; serialized as `null`
    #[default]
    Empty,
    /// Upstream body decoded as JSON
    Json(Value),
    /// Upstream body that was not valid JSON, kept verbatim
    Raw(Bytes),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Empty => serializer.serialize_none(),
            Payload::Json(value) => value.serialize(serializer),
            // Raw bodies go out as text when they are text, bytes otherwise
            Payload::Raw(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => serializer.serialize_str(text),
                Err(_) => serializer.collect_seq(bytes.iter()),
            },
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Payload::Empty,
            Some(value) => Payload::Json(value),
        })
    }
}

/// Standard result wrapper. Used both for one-shot results and as the unit of
/// every streamed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(rename = "msg", default)]
    pub message: String,
    #[serde(default)]
    pub data: Payload,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            success: true,
            message: String::new(),
            data: Payload::Empty,
        }
    }
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful stream chunk carrying captured output
    pub fn chunk(message: impl Into<String>) -> Self {
        Self::new().with_message(message)
    }

    /// Terminal stream envelope
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new().with_success(false).with_message(message)
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    pub fn with_json(self, value: Value) -> Self {
        self.with_data(Payload::Json(value))
    }

    /// JSON text of the envelope, as framed into SSE events and log lines
    pub fn to_json(&self) -> String {
        // Serializing a Value tree or a str cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"msg":"envelope serialization failed","data":null}"#.to_string()
        })
    }
}
