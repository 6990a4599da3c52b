use serde_json::{Value, json};

use crate::api::{ContentBlock, Message};
use crate::errors::ProviderError;

use super::{InferenceRequest, InferenceResponse, ProviderHttpClient, Usage, VisionProvider};
use crate::types::ModelId;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIProvider {
    http: ProviderHttpClient,
    key: String,
    model: ModelId,
    endpoint: String,
}

impl OpenAIProvider {
    pub fn new(key: String, model: ModelId, timeout_secs: u64) -> Result<Self, ProviderError> {
        let http = ProviderHttpClient::new(timeout_secs)?;
        Ok(Self {
            http,
            key,
            model,
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
        })
    }

    /// Any OpenAI-compatible chat completions endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn convert_to_openai_message(msg: &Message) -> Value {
        let content = msg
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({
                    "type": "text",
                    "text": text
                }),
                ContentBlock::Image { source } => json!({
                    "type": "image_url",
                    "image_url": { "url": source.data_url() }
                }),
            })
            .collect::<Vec<_>>();

        json!({
            "role": msg.role,
            "content": content
        })
    }

    pub(crate) fn request_body(req: &InferenceRequest) -> Value {
        let mut body = json!({
            "model": req.model.as_str(),
            "max_tokens": req.max_tokens,
            "messages": req
                .messages
                .iter()
                .map(Self::convert_to_openai_message)
                .collect::<Vec<_>>(),
        });
        if let Some(temp) = req.temperature {
            body["temperature"] = json!(temp);
        }
        body
    }

    pub(crate) fn parse_response(response_json: &Value) -> Result<InferenceResponse, ProviderError> {
        let choice = response_json
            .get("choices")
            .and_then(|arr| arr.as_array())
            .and_then(|arr| arr.first())
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        let text = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let stop_reason = choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .unwrap_or("stop")
            .to_string();

        let usage = Usage::from_json(
            response_json.get("usage"),
            "prompt_tokens",
            "completion_tokens",
        );

        Ok(InferenceResponse {
            text,
            stop_reason,
            usage,
        })
    }
}

#[async_trait::async_trait]
impl VisionProvider for OpenAIProvider {
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let body = Self::request_body(req);

        let res = self
            .http
            .client()
            .post(&self.endpoint)
            .bearer_auth(&self.key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let err_text = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: "openai".to_string(),
                status: status.as_u16(),
                message: err_text,
            });
        }

        let response_json: Value = res.json().await?;
        Self::parse_response(&response_json)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &ModelId {
        &self.model
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        if self.key.is_empty() {
            return Err(ProviderError::Config("OpenAI API key is empty".to_string()));
        }
        Ok(())
    }
}
