use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::StepError;
use crate::gateway::StepRevision;
use crate::providers::Usage;
use crate::step::{Step, StepMode, StepText};
use crate::types::{StepKey, TaskId};

/// Audit record for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_number: u32,
    pub mode: StepMode,
    pub original_observation: String,
    pub updated_observation: String,
    pub original_thought: String,
    pub updated_thought: String,
    pub reasoning: String,
    pub tokens_used: Usage,
    pub success: bool,
    pub error: Option<String>,
}

impl StepResult {
    pub fn succeeded(step: &Step, mode: StepMode, revision: StepRevision, usage: Usage) -> Self {
        Self {
            step_number: step.step_number,
            mode,
            original_observation: step.text.observation.clone(),
            updated_observation: revision.observation,
            original_thought: step.text.thought.clone(),
            updated_thought: revision.thought,
            reasoning: revision.reasoning,
            tokens_used: usage,
            success: true,
            error: None,
        }
    }

    /// Failed step: the original text is carried over unchanged.
    pub fn failed(step: &Step, mode: StepMode, error: &StepError) -> Self {
        let cause = error.to_string();
        Self {
            step_number: step.step_number,
            mode,
            original_observation: step.text.observation.clone(),
            updated_observation: step.text.observation.clone(),
            original_thought: step.text.thought.clone(),
            updated_thought: step.text.thought.clone(),
            reasoning: format!("Step not updated: {cause}"),
            tokens_used: error.usage(),
            success: false,
            error: Some(cause),
        }
    }

    /// Text accepted without a screenshot to check it against.
    pub fn unverified(step: &Step) -> Self {
        Self {
            step_number: step.step_number,
            mode: StepMode::Validate,
            original_observation: step.text.observation.clone(),
            updated_observation: step.text.observation.clone(),
            original_thought: step.text.thought.clone(),
            updated_thought: step.text.thought.clone(),
            reasoning: "Screenshot not available; existing text kept without verification"
                .to_string(),
            tokens_used: Usage::default(),
            success: true,
            error: None,
        }
    }

    pub fn key(&self) -> StepKey {
        StepKey::new(self.step_number)
    }

    pub fn updated_text(&self) -> StepText {
        StepText::new(&self.updated_observation, &self.updated_thought)
    }

    pub fn is_changed(&self) -> bool {
        self.original_observation != self.updated_observation
            || self.original_thought != self.updated_thought
    }
}

/// Full audit record of one run across all steps of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_steps: usize,
    pub successful_validations: usize,
    pub failed_validations: usize,
    pub total_tokens_used: Usage,
    pub steps: BTreeMap<StepKey, StepResult>,
}

impl TaskResult {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.values().filter(|r| !r.success)
    }

    pub fn is_complete(&self) -> bool {
        self.successful_validations == self.total_steps
    }
}

/// Corrected observation/thought per step, in the task input's own shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrectedTextMap(BTreeMap<StepKey, StepText>);

impl CorrectedTextMap {
    pub fn get(&self, key: StepKey) -> Option<&StepText> {
        self.0.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StepKey, &StepText)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read the map back as task input, in step order.
    pub fn to_steps(&self) -> Vec<Step> {
        self.0
            .iter()
            .map(|(key, text)| Step::new(key.number(), text.clone()))
            .collect()
    }
}

/// Merge per-step results into the corrected-text map and the audit record.
pub fn assemble(
    task_id: TaskId,
    run_id: Uuid,
    results: BTreeMap<StepKey, StepResult>,
) -> (CorrectedTextMap, TaskResult) {
    let corrected = CorrectedTextMap(
        results
            .iter()
            .map(|(key, result)| (*key, result.updated_text()))
            .collect(),
    );

    let successful = results.values().filter(|r| r.success).count();
    let total_tokens = results
        .values()
        .fold(Usage::default(), |acc, r| acc + r.tokens_used);

    let task = TaskResult {
        task_id,
        run_id,
        timestamp: Utc::now(),
        total_steps: results.len(),
        successful_validations: successful,
        failed_validations: results.len() - successful,
        total_tokens_used: total_tokens,
        steps: results,
    };

    (corrected, task)
}
