use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::error::InferenceError;
use super::types::{InferenceRequest, InferenceResponse, Message};

const API_URL: &str = "https://api.anthropic.com/v1/messages";

// Sampling parameters for extraction calls.
const MAX_TOKENS: u32 = 300;
const TEMPERATURE: f32 = 0.7;
const TOP_P: f32 = 0.9;

/// Capability seam for LLM inference: one prompt in, raw model text out.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn infer(&self, prompt: &str) -> Result<String, InferenceError>;
}

pub struct InferenceClient {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
}

impl InferenceClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self {
            api_key,
            model,
            client,
            base_url,
        }
    }

    pub async fn send(&self, req: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(InferenceError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(InferenceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<InferenceResponse>().await?;
        Ok(body)
    }
}

#[async_trait]
impl ModelInvoker for InferenceClient {
    async fn infer(&self, prompt: &str) -> Result<String, InferenceError> {
        let req = InferenceRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            messages: vec![Message {
                role: "user".into(),
                content: prompt.to_string(),
            }],
        };
        let response = self.send(&req).await?;
        Ok(response
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> InferenceClient {
        InferenceClient::with_base_url(
            "sk-test".into(),
            "claude-sonnet-4-5-20250929".into(),
            format!("{}/v1/messages", server.uri()),
        )
    }

    #[tokio::test]
    async fn infer_returns_first_content_block_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "content": [{"type": "text", "text": "- 2 apples, count"}],
                "model": "claude-sonnet-4-5-20250929",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 8}
            })))
            .mount(&server)
            .await;

        let output = client_for(&server).infer("extract this").await.unwrap();
        assert_eq!(output, "- 2 apples, count");
    }

    #[tokio::test]
    async fn http_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let err = client_for(&server).infer("extract this").await.unwrap_err();
        match err {
            InferenceError::RateLimited { retry_after_ms } => assert_eq!(retry_after_ms, 2000),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_500_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let err = client_for(&server).infer("extract this").await.unwrap_err();
        match err {
            InferenceError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "internal");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }
}
