//! Where task steps come from and where results go.

use async_trait::async_trait;
use log::{info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StorePaths;
use crate::errors::{StepError, TaskError};
use crate::report::{CorrectedTextMap, TaskResult};
use crate::request::Screenshot;
use crate::step::{Step, parse_task_document};
use crate::types::TaskId;

pub const INPUT_FILE: &str = "observation_thought.json";
pub const CORRECTED_FILE: &str = "validated_observation_thought.json";
pub const REPORT_FILE: &str = "validation_report.json";
const SCREENSHOT_DIR: &str = "screenshots";
const TASK_PREFIX: &str = "task_";

/// Boundary to task loading, screenshot lookup and output persistence.
///
/// Screenshot reads happen inside scheduled step work, so they are async and
/// must not block sibling steps.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Ordered steps of the task, with `screenshot_ref` set where one exists.
    fn load_task_steps(&self, task_id: &TaskId) -> Result<Vec<Step>, TaskError>;

    async fn resolve_screenshot(
        &self,
        task_id: &TaskId,
        step: &Step,
    ) -> Result<Screenshot, StepError>;

    fn persist_corrected_text(
        &self,
        task_id: &TaskId,
        corrected: &CorrectedTextMap,
    ) -> Result<PathBuf, TaskError>;

    fn persist_report(&self, task_id: &TaskId, report: &TaskResult) -> Result<PathBuf, TaskError>;

    /// Every task this store can load, sorted.
    fn list_tasks(&self) -> Result<Vec<TaskId>, TaskError>;
}

/// Directory-per-task layout under the input data directory, with fallbacks
/// to the older flat `Json/` and `Screenshots/` layout.
#[derive(Debug, Clone)]
pub struct FsTaskStore {
    paths: StorePaths,
}

impl FsTaskStore {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn task_dir(&self, task_id: &TaskId) -> PathBuf {
        self.paths.input_data_dir.join(task_id.as_str())
    }

    fn input_candidates(&self, task_id: &TaskId) -> [PathBuf; 2] {
        [
            self.task_dir(task_id).join(INPUT_FILE),
            self.paths
                .legacy_json_dir
                .join(format!("{}.json", task_id.as_str())),
        ]
    }

    fn screenshot_candidates(&self, task_id: &TaskId, step_number: u32) -> [PathBuf; 2] {
        let file = format!("{step_number}.png");
        [
            self.task_dir(task_id).join(SCREENSHOT_DIR).join(&file),
            self.paths
                .legacy_screenshots_dir
                .join(task_id.as_str())
                .join(&file),
        ]
    }

    fn write_json(&self, task_id: &TaskId, name: &str, value: &impl serde::Serialize) -> Result<PathBuf, TaskError> {
        let dir = self.task_dir(task_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        let content = serde_json::to_string_pretty(value)?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

#[async_trait]
impl TaskStore for FsTaskStore {
    fn load_task_steps(&self, task_id: &TaskId) -> Result<Vec<Step>, TaskError> {
        let [primary, legacy] = self.input_candidates(task_id);
        let path = if primary.exists() {
            primary
        } else if legacy.exists() {
            warn!("Using legacy JSON path: {}", legacy.display());
            legacy
        } else {
            return Err(TaskError::NotFound {
                task_id: task_id.clone(),
                tried: vec![primary, legacy],
            });
        };

        let content = fs::read_to_string(&path)?;
        let steps = parse_task_document(&content).map_err(|source| TaskError::InvalidTask {
            path: path.clone(),
            source,
        })?;

        let steps: Vec<Step> = steps
            .into_iter()
            .map(|step| {
                let found = self
                    .screenshot_candidates(task_id, step.step_number)
                    .into_iter()
                    .find(|p| p.is_file());
                match found {
                    Some(shot) => step.with_screenshot(shot),
                    None => step,
                }
            })
            .collect();

        info!(
            "Loaded {task_id} with {} steps from {}",
            steps.len(),
            path.display()
        );
        Ok(steps)
    }

    async fn resolve_screenshot(
        &self,
        task_id: &TaskId,
        step: &Step,
    ) -> Result<Screenshot, StepError> {
        let Some(path) = &step.screenshot_ref else {
            let [expected, _] = self.screenshot_candidates(task_id, step.step_number);
            return Err(StepError::MissingScreenshot {
                step: step.key(),
                detail: format!("not found at {}", expected.display()),
            });
        };
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StepError::MissingScreenshot {
                step: step.key(),
                detail: format!("cannot read {}: {e}", path.display()),
            })?;
        Ok(Screenshot::new(path.clone(), bytes))
    }

    fn persist_corrected_text(
        &self,
        task_id: &TaskId,
        corrected: &CorrectedTextMap,
    ) -> Result<PathBuf, TaskError> {
        let path = self.write_json(task_id, CORRECTED_FILE, corrected)?;
        info!("Saved validated output to {}", path.display());
        Ok(path)
    }

    fn persist_report(&self, task_id: &TaskId, report: &TaskResult) -> Result<PathBuf, TaskError> {
        let path = self.write_json(task_id, REPORT_FILE, report)?;
        info!("Saved detailed report to {}", path.display());
        Ok(path)
    }

    fn list_tasks(&self) -> Result<Vec<TaskId>, TaskError> {
        let mut tasks = BTreeSet::new();

        if self.paths.input_data_dir.is_dir() {
            for entry in WalkDir::new(&self.paths.input_data_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_dir())
            {
                let name = entry.file_name().to_string_lossy();
                if name.starts_with(TASK_PREFIX) && entry.path().join(INPUT_FILE).is_file() {
                    tasks.insert(TaskId::new(name.into_owned()));
                }
            }
        }

        let pattern = self.paths.legacy_json_dir.join(format!("{TASK_PREFIX}*.json"));
        for path in glob::glob(&pattern.to_string_lossy())?.filter_map(Result::ok) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tasks.insert(TaskId::new(stem));
            }
        }

        Ok(tasks.into_iter().collect())
    }
}

/// Convenience for callers that only need to read a task file directly.
pub fn load_steps_from_file(path: &Path) -> Result<Vec<Step>, TaskError> {
    let content = fs::read_to_string(path)?;
    parse_task_document(&content).map_err(|source| TaskError::InvalidTask {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Usage;
    use crate::report::{StepResult, assemble};
    use crate::step::{StepMode, StepText};
    use crate::types::StepKey;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn store(tmp: &TempDir) -> FsTaskStore {
        FsTaskStore::new(StorePaths::rooted_at(tmp.path()))
    }

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn loads_task_and_attaches_screenshots() {
        let tmp = TempDir::new().unwrap();
        let task = tmp.path().join("task_7");
        write(
            &task.join(INPUT_FILE),
            br#"{"step_1": {"observation": "a", "thought": "b"}, "step_2": {"observation": "", "thought": ""}}"#,
        );
        write(&task.join("screenshots/1.png"), b"png-1");

        let steps = store(&tmp).load_task_steps(&TaskId::new("task_7")).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].screenshot_ref, Some(task.join("screenshots/1.png")));
        assert!(steps[1].screenshot_ref.is_none());
    }

    #[tokio::test]
    async fn falls_back_to_legacy_layout() {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join("Json/task_3.json"),
            br#"{"step_1": {"observation": "x", "thought": "y"}}"#,
        );
        write(&tmp.path().join("Screenshots/task_3/1.png"), b"legacy");

        let store = store(&tmp);
        let task_id = TaskId::new("task_3");
        let steps = store.load_task_steps(&task_id).unwrap();
        let shot = store.resolve_screenshot(&task_id, &steps[0]).await.unwrap();
        assert_eq!(shot.bytes, b"legacy");
    }

    #[test]
    fn missing_task_lists_both_locations() {
        let tmp = TempDir::new().unwrap();
        let err = store(&tmp)
            .load_task_steps(&TaskId::new("task_404"))
            .unwrap_err();
        match err {
            TaskError::NotFound { tried, .. } => assert_eq!(tried.len(), 2),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn invalid_task_json_is_reported_with_path() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("task_1").join(INPUT_FILE), b"{ not json");
        let err = store(&tmp).load_task_steps(&TaskId::new("task_1")).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTask { .. }));
    }

    #[tokio::test]
    async fn resolve_screenshot_without_ref_is_missing() {
        let tmp = TempDir::new().unwrap();
        let step = Step::new(4, StepText::new("o", "t"));
        let err = store(&tmp)
            .resolve_screenshot(&TaskId::new("task_1"), &step)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Screenshot missing for step_4"));
    }

    #[test]
    fn persists_outputs_next_to_input() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let task_id = TaskId::new("task_2");
        let step = Step::new(1, StepText::new("o", "t"));
        let mut results = BTreeMap::new();
        results.insert(
            StepKey::new(1),
            StepResult::failed(
                &step,
                StepMode::Validate,
                &StepError::MissingScreenshot {
                    step: step.key(),
                    detail: "gone".to_string(),
                },
            ),
        );
        let (corrected, report) = assemble(task_id.clone(), Uuid::nil(), results);

        let corrected_path = store.persist_corrected_text(&task_id, &corrected).unwrap();
        let report_path = store.persist_report(&task_id, &report).unwrap();
        assert_eq!(corrected_path, tmp.path().join("task_2").join(CORRECTED_FILE));

        let reloaded = load_steps_from_file(&corrected_path).unwrap();
        assert_eq!(reloaded[0].text, StepText::new("o", "t"));

        let report_json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(report_json["steps"]["step_1"]["success"], false);
        assert_eq!(report_json["total_tokens_used"], serde_json::json!(Usage::default()));
    }

    #[test]
    fn lists_tasks_from_both_layouts() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("task_2").join(INPUT_FILE), b"{}");
        write(&tmp.path().join("task_9/notes.txt"), b"no input here");
        write(&tmp.path().join("other/observation_thought.json"), b"{}");
        write(&tmp.path().join("Json/task_1.json"), b"{}");
        write(&tmp.path().join("Json/task_2.json"), b"{}");

        let tasks = store(&tmp).list_tasks().unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["task_1", "task_2"]);
    }
}
