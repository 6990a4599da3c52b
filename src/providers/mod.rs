use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use std::time::Duration;

pub mod anthropic;
pub mod openai;

use crate::api::Message;
use crate::config::{ProviderKind, ValidatorConfig};
use crate::errors::ProviderError;
use crate::retry::RetryingProvider;
use crate::types::ModelId;
use reqwest::Client;

pub(crate) struct ProviderHttpClient {
    client: Client,
}

impl ProviderHttpClient {
    pub fn new(timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Provider-neutral request for one vision call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: ModelId,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Text the model produced plus what the call cost.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub text: String,
    pub stop_reason: String,
    pub usage: Usage,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }

    pub(crate) fn from_json(value: Option<&serde_json::Value>, input: &str, output: &str) -> Self {
        let read = |key: &str| {
            value
                .and_then(|u| u.get(key))
                .and_then(|v| v.as_u64())
                .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
        };
        Self::new(read(input), read(output))
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage::new(
            self.input_tokens.saturating_add(rhs.input_tokens),
            self.output_tokens.saturating_add(rhs.output_tokens),
        )
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

/// Trait for vision-capable LLM providers
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    /// Run one request and return the model's text
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse, ProviderError>;

    /// Get the name of this provider
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &ModelId;

    /// Validate that this provider is properly configured
    fn validate_config(&self) -> Result<(), ProviderError>;
}

/// Build the provider named by `config`, wrapped in a retry decorator when
/// the retry policy allows more than one attempt.
pub fn create_provider(config: &ValidatorConfig) -> Result<Box<dyn VisionProvider>, ProviderError> {
    if config.api_key.trim().is_empty() {
        return Err(ProviderError::MissingApiKey(config.provider.to_string()));
    }

    let provider: Box<dyn VisionProvider> = match config.provider {
        ProviderKind::Anthropic => Box::new(anthropic::AnthropicProvider::new(
            config.api_key.clone(),
            config.model.clone(),
            config.timeout_secs,
        )?),
        ProviderKind::OpenAI => Box::new(openai::OpenAIProvider::new(
            config.api_key.clone(),
            config.model.clone(),
            config.timeout_secs,
        )?),
    };
    provider.validate_config()?;

    if config.retry.is_enabled() {
        return Ok(Box::new(RetryingProvider::new(provider, config.retry)));
    }
    Ok(provider)
}
