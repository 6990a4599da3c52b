//! One vision request in, one structured revision out.
//!
//! Models wrap their JSON in prose or markdown fences often enough that the
//! gateway searches the reply for the first object carrying the expected
//! keys instead of requiring a bare JSON body.

use log::{debug, warn};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::errors::GatewayError;
use crate::providers::{InferenceRequest, Usage, VisionProvider};
use crate::request::VisionRequest;
use crate::types::ModelId;

const OBSERVATION_KEY: &str = "updated_observation";
const THOUGHT_KEY: &str = "updated_thought";
const REASONING_KEYS: [&str; 2] = ["validation_reasoning", "reasoning"];

/// Revised text for one step as returned by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRevision {
    pub observation: String,
    pub thought: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    Parsed(StepRevision),
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    pub revision: StepRevision,
    pub usage: Usage,
}

pub struct ModelGateway {
    provider: Box<dyn VisionProvider>,
    max_tokens: u32,
    temperature: f32,
}

impl ModelGateway {
    pub fn new(provider: Box<dyn VisionProvider>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            provider,
            max_tokens,
            temperature,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &ModelId {
        self.provider.model()
    }

    /// Send one request. No retries happen here.
    pub async fn call(&self, request: &VisionRequest) -> Result<GatewayReply, GatewayError> {
        let inference = InferenceRequest {
            model: self.provider.model().clone(),
            messages: vec![request.to_message()],
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
        };

        debug!(
            "[{}] {} request to {}/{} (image: {})",
            request.step,
            request.mode,
            self.provider.name(),
            self.provider.model(),
            request.image.is_some()
        );

        let response = self.provider.infer(&inference).await?;
        if response.stop_reason == "max_tokens" || response.stop_reason == "length" {
            warn!(
                "[{}] response stopped at the output token limit ({})",
                request.step, self.max_tokens
            );
        }

        match parse_reply(&response.text) {
            ParsedResponse::Parsed(revision) => Ok(GatewayReply {
                revision,
                usage: response.usage,
            }),
            ParsedResponse::Malformed(raw) => Err(GatewayError::Malformed {
                raw,
                usage: response.usage,
            }),
        }
    }
}

/// Best-effort extraction of the revision object from free-form model text.
///
/// Tried in order: the whole text, each fenced code block, then the first
/// JSON object that decodes at any `{`, ignoring whatever follows it.
pub fn parse_reply(text: &str) -> ParsedResponse {
    let trimmed = text.trim();

    if let Some(revision) = revision_from_str(trimmed) {
        return ParsedResponse::Parsed(revision);
    }

    for caps in fence_regex().captures_iter(trimmed) {
        if let Some(revision) = caps.get(1).and_then(|m| revision_from_str(m.as_str())) {
            return ParsedResponse::Parsed(revision);
        }
    }

    for (start, _) in trimmed.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&trimmed[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            if let Some(revision) = revision_from_map(&map) {
                return ParsedResponse::Parsed(revision);
            }
        }
    }

    ParsedResponse::Malformed(text.to_string())
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid fence regex"))
}

fn revision_from_str(candidate: &str) -> Option<StepRevision> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => revision_from_map(&map),
        _ => None,
    }
}

fn revision_from_map(map: &Map<String, Value>) -> Option<StepRevision> {
    let observation = map.get(OBSERVATION_KEY)?.as_str()?.to_string();
    let thought = map.get(THOUGHT_KEY)?.as_str()?.to_string();
    let reasoning = REASONING_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
        .unwrap_or_default()
        .to_string();
    Some(StepRevision {
        observation,
        thought,
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::providers::InferenceResponse;
    use crate::step::StepMode;
    use crate::types::StepKey;

    fn revision(obs: &str, thought: &str, reasoning: &str) -> StepRevision {
        StepRevision {
            observation: obs.to_string(),
            thought: thought.to_string(),
            reasoning: reasoning.to_string(),
        }
    }

    #[test]
    fn parses_bare_json() {
        let text = r#"{"updated_observation": "o", "updated_thought": "t", "validation_reasoning": "r"}"#;
        assert_eq!(parse_reply(text), ParsedResponse::Parsed(revision("o", "t", "r")));
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Sure, here is the result:\n```json\n{\"updated_observation\": \"o\", \"updated_thought\": \"t\"}\n```\nLet me know.";
        assert_eq!(parse_reply(text), ParsedResponse::Parsed(revision("o", "t", "")));
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let text = "I compared the screenshot carefully. {\"updated_observation\": \"The {menu} is open\", \"updated_thought\": \"t\", \"reasoning\": \"Changed X\"} Hope this helps {not json}";
        assert_eq!(
            parse_reply(text),
            ParsedResponse::Parsed(revision("The {menu} is open", "t", "Changed X"))
        );
    }

    #[test]
    fn skips_objects_without_required_keys() {
        let text = r#"Note: {"confidence": 0.9} Result: {"updated_observation": "o", "updated_thought": "t"}"#;
        assert_eq!(parse_reply(text), ParsedResponse::Parsed(revision("o", "t", "")));
    }

    #[test]
    fn malformed_when_keys_missing_or_not_strings() {
        assert!(matches!(
            parse_reply(r#"{"updated_observation": "o"}"#),
            ParsedResponse::Malformed(_)
        ));
        assert!(matches!(
            parse_reply(r#"{"updated_observation": 1, "updated_thought": "t"}"#),
            ParsedResponse::Malformed(_)
        ));
        assert!(matches!(
            parse_reply("I cannot see the image."),
            ParsedResponse::Malformed(ref raw) if raw == "I cannot see the image."
        ));
        assert!(matches!(
            parse_reply(r#"{"updated_observation": "cut off mid"#),
            ParsedResponse::Malformed(_)
        ));
    }

    struct CannedProvider {
        model: ModelId,
        reply: Result<String, u16>,
    }

    #[async_trait::async_trait]
    impl VisionProvider for CannedProvider {
        async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
            assert_eq!(req.temperature, Some(0.0));
            assert_eq!(req.max_tokens, 256);
            match &self.reply {
                Ok(text) => Ok(InferenceResponse {
                    text: text.clone(),
                    stop_reason: "end_turn".to_string(),
                    usage: Usage::new(100, 20),
                }),
                Err(status) => Err(ProviderError::Api {
                    provider: "canned".to_string(),
                    status: *status,
                    message: "rate limited".to_string(),
                }),
            }
        }

        fn name(&self) -> &str {
            "canned"
        }

        fn model(&self) -> &ModelId {
            &self.model
        }

        fn validate_config(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn gateway(reply: Result<&str, u16>) -> ModelGateway {
        ModelGateway::new(
            Box::new(CannedProvider {
                model: ModelId::new("canned-model"),
                reply: reply.map(str::to_string),
            }),
            256,
            0.0,
        )
    }

    fn request() -> VisionRequest {
        VisionRequest {
            step: StepKey::new(1),
            mode: StepMode::Validate,
            prompt: "check".to_string(),
            image: None,
        }
    }

    #[tokio::test]
    async fn call_returns_revision_and_usage() {
        let gw = gateway(Ok(r#"{"updated_observation": "o", "updated_thought": "t"}"#));
        let reply = gw.call(&request()).await.expect("reply");
        assert_eq!(reply.revision.observation, "o");
        assert_eq!(reply.usage, Usage::new(100, 20));
        assert_eq!(gw.model().as_str(), "canned-model");
    }

    #[tokio::test]
    async fn malformed_reply_still_reports_tokens() {
        let gw = gateway(Ok("no json here"));
        let err = gw.call(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Malformed { .. }));
        assert_eq!(err.usage(), Usage::new(100, 20));
    }

    #[tokio::test]
    async fn provider_errors_carry_status() {
        let gw = gateway(Err(429));
        let err = gw.call(&request()).await.unwrap_err();
        match err {
            GatewayError::Provider(inner) => assert_eq!(inner.status(), Some(429)),
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
