use serde_json::{Value, json};

use crate::errors::ProviderError;

use super::{InferenceRequest, InferenceResponse, ProviderHttpClient, Usage, VisionProvider};
use crate::types::ModelId;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: ProviderHttpClient,
    key: String,
    model: ModelId,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(key: String, model: ModelId, timeout_secs: u64) -> Result<Self, ProviderError> {
        let http = ProviderHttpClient::new(timeout_secs)?;
        Ok(Self {
            http,
            key,
            model,
            endpoint: MESSAGES_URL.to_string(),
        })
    }

    /// Point the provider at a different Messages API endpoint (proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub(crate) fn request_body(req: &InferenceRequest) -> Value {
        let mut body = json!({
            "model": req.model.as_str(),
            "max_tokens": req.max_tokens,
            "messages": req.messages,
        });
        if let Some(temp) = req.temperature {
            body["temperature"] = json!(temp);
        }
        body
    }

    pub(crate) fn parse_response(response_json: &Value) -> Result<InferenceResponse, ProviderError> {
        let content_arr = response_json["content"].as_array().ok_or_else(|| {
            ProviderError::InvalidResponse(
                "Unexpected API response: missing 'content' array".to_string(),
            )
        })?;

        let text = content_arr
            .iter()
            .filter(|block| block.get("type").and_then(|v| v.as_str()) == Some("text"))
            .filter_map(|block| block.get("text").and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join("\n");

        let stop_reason = response_json
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .unwrap_or("end_turn")
            .to_string();

        let usage = Usage::from_json(
            response_json.get("usage"),
            "input_tokens",
            "output_tokens",
        );

        Ok(InferenceResponse {
            text,
            stop_reason,
            usage,
        })
    }
}

#[async_trait::async_trait]
impl VisionProvider for AnthropicProvider {
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let body = Self::request_body(req);

        let res = self
            .http
            .client()
            .post(&self.endpoint)
            .header("x-api-key", &self.key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let err_text = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: "anthropic".to_string(),
                status: status.as_u16(),
                message: err_text,
            });
        }

        let response_json: Value = res.json().await?;
        Self::parse_response(&response_json)
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &ModelId {
        &self.model
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        if self.key.is_empty() {
            return Err(ProviderError::Config(
                "Anthropic API key is empty".to_string(),
            ));
        }
        Ok(())
    }
}
