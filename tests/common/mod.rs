#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stepcheck::providers::{InferenceRequest, InferenceResponse, Usage, VisionProvider};
use stepcheck::{
    ContentBlock, FsTaskStore, ModelId, ProviderError, StorePaths, ValidatorConfig,
    ValidatorService,
};

/// Tag used for requests that carry no image.
pub const TEXT_ONLY: &str = "text-only";

#[derive(Debug, Clone)]
pub enum Script {
    Reply { text: String, delay_ms: u64 },
    Fail(u16),
}

impl Script {
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply {
            text: text.into(),
            delay_ms: 0,
        }
    }

    pub fn delayed(text: impl Into<String>, delay_ms: u64) -> Self {
        Self::Reply {
            text: text.into(),
            delay_ms,
        }
    }
}

#[derive(Debug, Default)]
pub struct CallStats {
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub tags: std::sync::Mutex<Vec<String>>,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl CallStats {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

/// Answers by screenshot content: the image bytes written by
/// [`write_screenshot`] are `step-N`, which selects the script entry.
/// Unscripted tags get a canned revision naming the tag.
pub struct ScriptedProvider {
    model: ModelId,
    scripts: HashMap<String, Script>,
    stats: Arc<CallStats>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            model: ModelId::new("mock-vision"),
            scripts: HashMap::new(),
            stats: Arc::new(CallStats::default()),
        }
    }

    pub fn script(mut self, tag: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(tag.into(), script);
        self
    }

    pub fn stats(&self) -> Arc<CallStats> {
        Arc::clone(&self.stats)
    }
}

pub fn revision_json(observation: &str, thought: &str) -> String {
    serde_json::json!({
        "updated_observation": observation,
        "updated_thought": thought,
        "validation_reasoning": "checked against screenshot",
    })
    .to_string()
}

fn request_tag(req: &InferenceRequest) -> String {
    req.messages
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|block| match block {
            ContentBlock::Image { source } => STANDARD
                .decode(&source.data)
                .ok()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            ContentBlock::Text { .. } => None,
        })
        .unwrap_or_else(|| TEXT_ONLY.to_string())
}

#[async_trait]
impl VisionProvider for ScriptedProvider {
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let tag = request_tag(req);
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        self.stats.tags.lock().unwrap().push(tag.clone());
        self.stats
            .prompts
            .lock()
            .unwrap()
            .push(req.messages.iter().map(|m| m.text()).collect());

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);

        let script = self.scripts.get(&tag).cloned().unwrap_or_else(|| {
            Script::delayed(
                revision_json(&format!("observed {tag}"), &format!("thought {tag}")),
                5,
            )
        });

        let outcome = match script {
            Script::Reply { text, delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(InferenceResponse {
                    text,
                    stop_reason: "end_turn".to_string(),
                    usage: Usage::new(100, 25),
                })
            }
            Script::Fail(status) => Err(ProviderError::Api {
                provider: "mock".to_string(),
                status,
                message: "scripted failure".to_string(),
            }),
        };

        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &ModelId {
        &self.model
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

pub fn config(root: &Path, concurrency: usize) -> ValidatorConfig {
    ValidatorConfig {
        api_key: "test-key".to_string(),
        concurrency,
        paths: StorePaths::rooted_at(root),
        ..ValidatorConfig::default()
    }
}

pub fn service(
    config: ValidatorConfig,
    provider: ScriptedProvider,
) -> ValidatorService<FsTaskStore> {
    let store = FsTaskStore::new(config.paths.clone());
    ValidatorService::new(config, Box::new(provider), store)
}

pub fn write_task(root: &Path, task: &str, doc: &serde_json::Value) {
    let dir = root.join(task);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("observation_thought.json"),
        serde_json::to_string_pretty(doc).unwrap(),
    )
    .unwrap();
}

pub fn write_screenshot(root: &Path, task: &str, step: u32) {
    let dir = root.join(task).join("screenshots");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{step}.png")), format!("step-{step}")).unwrap();
}
