use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

use crate::types::StepKey;

/// Observation/thought pair, the per-step shape of both the task input file
/// and the corrected-text output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepText {
    pub observation: String,
    pub thought: String,
}

impl StepText {
    pub fn new(observation: impl Into<String>, thought: impl Into<String>) -> Self {
        Self {
            observation: observation.into(),
            thought: thought.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.observation.trim().is_empty() && self.thought.trim().is_empty()
    }
}

/// One recorded step of a task trace. Loaded once and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub step_number: u32,
    pub text: StepText,
    pub screenshot_ref: Option<PathBuf>,
}

impl Step {
    pub fn new(step_number: u32, text: StepText) -> Self {
        Self {
            step_number,
            text,
            screenshot_ref: None,
        }
    }

    pub fn with_screenshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.screenshot_ref = Some(path.into());
        self
    }

    pub fn key(&self) -> StepKey {
        StepKey::new(self.step_number)
    }

    pub fn mode(&self) -> StepMode {
        StepMode::classify(&self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    /// Existing text is compared against the screenshot and corrected.
    Validate,
    /// No text exists; it is written from the screenshot.
    Generate,
}

impl StepMode {
    pub fn classify(text: &StepText) -> Self {
        if text.is_blank() {
            Self::Generate
        } else {
            Self::Validate
        }
    }
}

impl fmt::Display for StepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validate => f.write_str("validate"),
            Self::Generate => f.write_str("generate"),
        }
    }
}

/// Text of the steps adjacent to the one being processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborContext {
    pub previous: Option<StepText>,
    pub next: Option<StepText>,
}

impl NeighborContext {
    /// Neighbours of `steps[index]` by position; `steps` must be sorted.
    pub fn around(steps: &[Step], index: usize) -> Self {
        let previous = index
            .checked_sub(1)
            .and_then(|i| steps.get(i))
            .map(|s| s.text.clone());
        let next = steps.get(index + 1).map(|s| s.text.clone());
        Self { previous, next }
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_none() && self.next.is_none()
    }
}

/// Parse a task document: a JSON object keyed by `step_<n>`. Keys without the
/// `step_` prefix are ignored; a prefixed key that is not canonical is an
/// error, which keeps step numbers unique. Steps come back sorted by number.
pub fn parse_task_document(content: &str) -> Result<Vec<Step>, serde_json::Error> {
    let doc: Map<String, Value> = serde_json::from_str(content)?;
    let mut steps = Vec::new();
    for (key, value) in doc {
        if !key.starts_with(StepKey::PREFIX) {
            continue;
        }
        let step_key = key
            .parse::<StepKey>()
            .map_err(<serde_json::Error as serde::de::Error>::custom)?;
        let text: StepText = serde_json::from_value(value)?;
        steps.push(Step::new(step_key.number(), text));
    }
    steps.sort_by_key(|s| s.step_number);
    Ok(steps)
}
