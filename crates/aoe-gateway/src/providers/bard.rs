//! Bard ask-about-image adapter: question plus image, sent as multipart

use bytes::Bytes;
use reqwest::Method;
use serde_json::json;

use super::{ProviderAdapter, endpoint};
use crate::config::BardConfig;
use crate::error::{GatewayError, Result};
use crate::proxy::{FileAttachment, RequestDescriptor};

/// Uploaded image as received from the caller
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Fields of `POST /v1/bard/ask_about_image`
#[derive(Debug, Clone)]
pub struct BardAskImageRequest {
    pub question: String,
    pub image: ImageUpload,
}

#[derive(Debug, Clone)]
pub struct BardAskImage {
    url: String,
}

impl BardAskImage {
    pub fn new(config: &BardConfig) -> Self {
        Self {
            url: config.url.clone(),
        }
    }
}

impl ProviderAdapter for BardAskImage {
    type Request = BardAskImageRequest;

    fn name(&self) -> &'static str {
        "bard"
    }

    fn build_request(
        &self,
        request: &BardAskImageRequest,
        headers: &[(String, String)],
    ) -> Result<RequestDescriptor> {
        let url = endpoint(&self.url, self.name())?;

        if request.question.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        if request.image.bytes.is_empty() {
            return Err(GatewayError::InvalidRequest("image is empty".to_string()));
        }

        Ok(RequestDescriptor::builder(self.name(), Method::POST, url)
            .headers(headers.iter().cloned())
            .body(json!({ "question": request.question }))
            .file(FileAttachment {
                field: "image".to_string(),
                file_name: request.image.file_name.clone(),
                content_type: request.image.content_type.clone(),
                bytes: request.image.bytes.clone(),
            })
            .build())
    }
}
