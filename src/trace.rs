use anyhow::Result;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::report::StepResult;
use crate::types::TaskId;

/// Append one JSONL record per step result to `<dir>/<task_id>.jsonl`.
pub fn append_step_traces(
    dir: &Path,
    task_id: &TaskId,
    run_id: Uuid,
    model: &str,
    results: &[&StepResult],
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let trace_file = task_trace_path(dir, task_id);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&trace_file)?;

    let timestamp = chrono::Utc::now().to_rfc3339();
    for result in results {
        let record = json!({
            "timestamp": timestamp,
            "task_id": task_id,
            "run_id": run_id,
            "model": model,
            "step": result,
        });
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
    }

    Ok(trace_file)
}

pub fn task_trace_path(dir: &Path, task_id: &TaskId) -> PathBuf {
    dir.join(format!("{}.jsonl", task_id.as_str()))
}
