use log::{debug, info, warn};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::{MissingScreenshotPolicy, ValidatorConfig};
use crate::errors::{StepError, TaskError};
use crate::gateway::{ModelGateway, StepRevision};
use crate::providers::VisionProvider;
use crate::report::{CorrectedTextMap, StepResult, TaskResult, assemble};
use crate::request::{RequestBuilder, VisionRequest};
use crate::scheduler;
use crate::step::{NeighborContext, Step, StepMode};
use crate::store::TaskStore;
use crate::trace;
use crate::types::TaskId;

/// Stages one run moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Loaded,
    Classified,
    Dispatched,
    Aggregated,
    Reported,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::Classified => "classified",
            Self::Dispatched => "dispatched",
            Self::Aggregated => "aggregated",
            Self::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// Everything one task run produced.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub corrected: CorrectedTextMap,
    pub report: TaskResult,
    pub corrected_path: PathBuf,
    pub report_path: PathBuf,
}

struct StepPlan<'a> {
    step: &'a Step,
    mode: StepMode,
    neighbors: NeighborContext,
}

enum Prepared {
    Request(VisionRequest),
    Unverified,
}

/// Validates existing step text or generates missing text, one task at a time.
pub struct ValidatorService<S: TaskStore> {
    config: ValidatorConfig,
    gateway: ModelGateway,
    builder: RequestBuilder,
    store: S,
}

impl<S: TaskStore> ValidatorService<S> {
    pub fn new(config: ValidatorConfig, provider: Box<dyn VisionProvider>, store: S) -> Self {
        let gateway = ModelGateway::new(provider, config.max_tokens, config.temperature);
        let builder = RequestBuilder::new(config.neighbor_chars);
        info!(
            "Validator service initialized ({}/{}, concurrency {})",
            gateway.provider_name(),
            gateway.model(),
            config.concurrency
        );
        Self {
            config,
            gateway,
            builder,
            store,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load, process and persist one task. Only a task that cannot be loaded
    /// or whose outputs cannot be written is an error; failed steps are
    /// reported inside the outcome.
    pub async fn validate_task(&self, task_id: &TaskId) -> Result<TaskOutcome, TaskError> {
        info!("Starting validation for {task_id}");
        let steps = self.store.load_task_steps(task_id)?;
        debug!("[{task_id}] {}", RunStage::Loaded);
        if steps.is_empty() {
            warn!("[{task_id}] task has no steps");
        }

        let (corrected, report) = self.process_steps(task_id, &steps).await;

        // The report goes first so corrected text never exists without its audit record.
        let report_path = self.store.persist_report(task_id, &report)?;
        let corrected_path = self.store.persist_corrected_text(task_id, &corrected)?;

        if let Some(dir) = &self.config.trace_dir {
            let results: Vec<&StepResult> = report.steps.values().collect();
            if let Err(e) = trace::append_step_traces(
                dir,
                task_id,
                report.run_id,
                self.gateway.model().as_str(),
                &results,
            ) {
                warn!("[{task_id}] could not write trace: {e}");
            }
        }

        debug!("[{task_id}] {}", RunStage::Reported);
        info!(
            "Completed {task_id}: {}/{} successful",
            report.successful_validations, report.total_steps
        );

        Ok(TaskOutcome {
            corrected,
            report,
            corrected_path,
            report_path,
        })
    }

    /// Run every task the store knows about, one after another.
    pub async fn validate_all(
        &self,
    ) -> Result<Vec<(TaskId, Result<TaskOutcome, TaskError>)>, TaskError> {
        let tasks = self.store.list_tasks()?;
        info!("Found {} tasks to validate", tasks.len());

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task_id in tasks {
            let outcome = self.validate_task(&task_id).await;
            if let Err(e) = &outcome {
                warn!("Error validating {task_id}: {e}");
            }
            outcomes.push((task_id, outcome));
        }
        Ok(outcomes)
    }

    /// Classify, dispatch and aggregate already-loaded steps without
    /// persisting anything. Output is ordered by step number.
    pub async fn process_steps(
        &self,
        task_id: &TaskId,
        steps: &[Step],
    ) -> (CorrectedTextMap, TaskResult) {
        let run_id = Uuid::new_v4();

        let mut ordered = steps.to_vec();
        ordered.sort_by_key(|s| s.step_number);

        let plans: Vec<_> = ordered
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let plan = StepPlan {
                    step,
                    mode: step.mode(),
                    neighbors: NeighborContext::around(&ordered, index),
                };
                (step.key(), plan)
            })
            .collect();

        let generate = plans
            .iter()
            .filter(|(_, p)| p.mode == StepMode::Generate)
            .count();
        info!(
            "[{task_id}] {} steps {}: {} validate, {generate} generate",
            plans.len(),
            RunStage::Classified,
            plans.len() - generate
        );

        debug!(
            "[{task_id}] {} with concurrency {}",
            RunStage::Dispatched,
            self.config.concurrency
        );
        let results = scheduler::run_all(plans, self.config.concurrency, |plan| {
            self.process_step(task_id, plan)
        })
        .await;

        debug!("[{task_id}] {}", RunStage::Aggregated);
        assemble(task_id.clone(), run_id, results)
    }

    async fn process_step(&self, task_id: &TaskId, plan: StepPlan<'_>) -> StepResult {
        let StepPlan {
            step,
            mode,
            neighbors,
        } = plan;
        let key = step.key();

        let request = match self.prepare_request(task_id, step, mode, &neighbors).await {
            Ok(Prepared::Request(request)) => request,
            Ok(Prepared::Unverified) => {
                warn!("[{task_id} - {key}] screenshot missing; keeping text unverified");
                return StepResult::unverified(step);
            }
            Err(err) => {
                warn!("[{task_id} - {key}] {err}");
                return StepResult::failed(step, mode, &err);
            }
        };

        info!("[{task_id} - {key}] {mode} step sent to model");
        let reply = match self.gateway.call(&request).await {
            Ok(reply) => reply,
            Err(err) => {
                let err = StepError::from(err);
                warn!("[{task_id} - {key}] {err}");
                return StepResult::failed(step, mode, &err);
            }
        };

        if is_blank_revision(mode, &reply.revision) {
            let err = StepError::EmptyRevision {
                step: key,
                usage: reply.usage,
            };
            warn!("[{task_id} - {key}] {err}");
            return StepResult::failed(step, mode, &err);
        }

        StepResult::succeeded(step, mode, reply.revision, reply.usage)
    }

    async fn prepare_request(
        &self,
        task_id: &TaskId,
        step: &Step,
        mode: StepMode,
        neighbors: &NeighborContext,
    ) -> Result<Prepared, StepError> {
        let missing = match self.store.resolve_screenshot(task_id, step).await {
            Ok(screenshot) => {
                return self
                    .builder
                    .build(step, neighbors, mode, Some(&screenshot))
                    .map(Prepared::Request);
            }
            Err(missing) => missing,
        };

        match (mode, self.config.missing_screenshot) {
            (StepMode::Generate, _) => Err(StepError::NothingToProcess { step: step.key() }),
            (StepMode::Validate, MissingScreenshotPolicy::Fail) => Err(missing),
            (StepMode::Validate, MissingScreenshotPolicy::TextOnly) => self
                .builder
                .build_text_only(step, neighbors)
                .map(Prepared::Request),
            (StepMode::Validate, MissingScreenshotPolicy::AcceptUnverified) => {
                Ok(Prepared::Unverified)
            }
        }
    }
}

/// Generated text needs both fields; a validated step must keep at least one.
fn is_blank_revision(mode: StepMode, revision: &StepRevision) -> bool {
    let observation = revision.observation.trim().is_empty();
    let thought = revision.thought.trim().is_empty();
    match mode {
        StepMode::Generate => observation || thought,
        StepMode::Validate => observation && thought,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision(observation: &str, thought: &str) -> StepRevision {
        StepRevision {
            observation: observation.to_string(),
            thought: thought.to_string(),
            reasoning: String::new(),
        }
    }

    #[test]
    fn blank_revision_rules_per_mode() {
        assert!(is_blank_revision(StepMode::Generate, &revision("", "")));
        assert!(is_blank_revision(StepMode::Generate, &revision("A form", " ")));
        assert!(!is_blank_revision(StepMode::Generate, &revision("A form", "Fill it")));

        assert!(is_blank_revision(StepMode::Validate, &revision(" ", "")));
        assert!(!is_blank_revision(StepMode::Validate, &revision("A form", "")));
    }

    #[test]
    fn stage_names() {
        let stages = [
            RunStage::Loaded,
            RunStage::Classified,
            RunStage::Dispatched,
            RunStage::Aggregated,
            RunStage::Reported,
        ];
        let names: Vec<String> = stages.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec!["loaded", "classified", "dispatched", "aggregated", "reported"]
        );
    }
}
