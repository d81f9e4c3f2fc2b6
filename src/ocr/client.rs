use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::OcrError;
use crate::run::{DocumentRef, FileKind};

/// Capability seam for text extraction. The workflow run only ever sees this
/// trait; production wires in [`OcrClient`], tests wire in mocks.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, doc: &DocumentRef) -> Result<String, OcrError>;
}

#[derive(Debug, Serialize)]
struct DetectTextRequest<'a> {
    bucket: &'a str,
    key: &'a str,
    kind: FileKind,
}

#[derive(Debug, Deserialize)]
struct DetectTextResponse {
    text: String,
}

/// HTTP client for the text-detection service.
pub struct OcrClient {
    client: Client,
    base_url: String,
}

impl OcrClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self { client, base_url }
    }
}

#[async_trait]
impl TextExtractor for OcrClient {
    async fn extract_text(&self, doc: &DocumentRef) -> Result<String, OcrError> {
        let response = self
            .client
            .post(format!("{}/v1/detect-text", self.base_url))
            .json(&DetectTextRequest {
                bucket: &doc.bucket,
                key: &doc.key,
                kind: doc.kind,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(OcrError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<DetectTextResponse>().await?;
        Ok(body.text)
    }
}
