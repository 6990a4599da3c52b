//! Turns a step and its neighbours into a provider-neutral vision request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};

use crate::api::{ContentBlock, Message};
use crate::errors::StepError;
use crate::step::{NeighborContext, Step, StepMode, StepText};
use crate::types::StepKey;

const RESPONSE_KEYS: &str = r#"Respond with a single JSON object:
{
    "updated_observation": "...",
    "updated_thought": "...",
    "validation_reasoning": "..."
}"#;

/// Raw screenshot bytes as handed over by the task store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl Screenshot {
    pub fn new(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    pub fn media_type(&self) -> &'static str {
        media_type_for(&self.path)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// MIME type from the file extension; unknown extensions are sent as PNG.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionRequest {
    pub step: StepKey,
    pub mode: StepMode,
    pub prompt: String,
    pub image: Option<EncodedImage>,
}

impl VisionRequest {
    /// Image first, instructions second.
    pub fn to_message(&self) -> Message {
        let mut content = Vec::with_capacity(2);
        if let Some(image) = &self.image {
            content.push(ContentBlock::base64_image(&image.media_type, &image.data));
        }
        content.push(ContentBlock::text(&self.prompt));
        Message::user(content)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    neighbor_chars: Option<usize>,
}

impl RequestBuilder {
    pub fn new(neighbor_chars: Option<usize>) -> Self {
        Self { neighbor_chars }
    }

    pub fn build(
        &self,
        step: &Step,
        neighbors: &NeighborContext,
        mode: StepMode,
        screenshot: Option<&Screenshot>,
    ) -> Result<VisionRequest, StepError> {
        let Some(screenshot) = screenshot else {
            return Err(match mode {
                StepMode::Generate => StepError::NothingToProcess { step: step.key() },
                StepMode::Validate => StepError::MissingScreenshot {
                    step: step.key(),
                    detail: "no screenshot available for this step".to_string(),
                },
            });
        };

        let prompt = match mode {
            StepMode::Validate => self.validation_prompt(&step.text, neighbors, true),
            StepMode::Generate => self.generation_prompt(neighbors),
        };

        Ok(VisionRequest {
            step: step.key(),
            mode,
            prompt,
            image: Some(EncodedImage {
                media_type: screenshot.media_type().to_string(),
                data: screenshot.to_base64(),
            }),
        })
    }

    /// Validate-mode request for a step whose screenshot could not be found.
    pub fn build_text_only(
        &self,
        step: &Step,
        neighbors: &NeighborContext,
    ) -> Result<VisionRequest, StepError> {
        if step.text.is_blank() {
            return Err(StepError::NothingToProcess { step: step.key() });
        }
        Ok(VisionRequest {
            step: step.key(),
            mode: StepMode::Validate,
            prompt: self.validation_prompt(&step.text, neighbors, false),
            image: None,
        })
    }

    fn validation_prompt(&self, text: &StepText, neighbors: &NeighborContext, has_image: bool) -> String {
        let source = if has_image {
            "The screenshot is the single source of truth: every statement must match what is visible in it."
        } else {
            "No screenshot is available for this step. Only fix statements that are internally inconsistent or contradicted by the adjacent steps, and say in the reasoning that the text could not be checked against an image."
        };

        format!(
            "You are an expert screenshot analyst reviewing the observation and thought recorded for one step of a UI automation task.\n\
             {source}\n\n\
             **Original Observation:**\n{observation}\n\n\
             **Original Thought:**\n{thought}\n\
             {context}\n\
             **Your Task:**\n\
             1. Compare the original observation and thought with the screenshot.\n\
             2. Correct only what is factually wrong: names, values, numbers, element states.\n\
             3. Keep the structure and wording of everything that is accurate so old and new versions diff cleanly.\n\
             4. If the original is accurate, return it exactly as-is.\n\
             5. In validation_reasoning list each change as 'Changed X from Y to Z', or state that no changes were needed.\n\n\
             {RESPONSE_KEYS}\n",
            observation = text.observation,
            thought = text.thought,
            context = self.context_section(neighbors),
        )
    }

    fn generation_prompt(&self, neighbors: &NeighborContext) -> String {
        format!(
            "You are an expert screenshot analyst writing the observation and thought for one step of a UI automation task. No text exists for this step yet.\n\
             The screenshot is the single source of truth: describe only what is visible in it.\n\
             {context}\n\
             **Your Task:**\n\
             1. Write an observation describing the screen state in enough detail to understand it.\n\
             2. Write a thought explaining the reasoning and the next logical action based on what is visible.\n\
             3. Keep tense and task framing consistent with the adjacent steps, and do not contradict them.\n\
             4. In validation_reasoning state that the text was generated from the screenshot.\n\n\
             {RESPONSE_KEYS}\n",
            context = self.context_section(neighbors),
        )
    }

    fn context_section(&self, neighbors: &NeighborContext) -> String {
        if neighbors.is_empty() {
            return String::new();
        }
        let mut section = String::from(
            "\n**Adjacent Steps (context for continuity only; they are not being reviewed and must not be rewritten):**\n",
        );
        if let Some(prev) = &neighbors.previous {
            section.push_str(&self.neighbor_block("Previous step", prev));
        }
        if let Some(next) = &neighbors.next {
            section.push_str(&self.neighbor_block("Next step", next));
        }
        section
    }

    fn neighbor_block(&self, label: &str, text: &StepText) -> String {
        format!(
            "{label}:\nObservation: {}\nThought: {}\n",
            self.clip(&text.observation),
            self.clip(&text.thought)
        )
    }

    fn clip(&self, text: &str) -> String {
        match self.neighbor_chars {
            Some(limit) if text.chars().count() > limit => {
                let clipped: String = text.chars().take(limit).collect();
                format!("{clipped}...")
            }
            _ => text.to_string(),
        }
    }
}
