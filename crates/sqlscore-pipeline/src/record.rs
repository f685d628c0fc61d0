use std::collections::BTreeMap;
use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use sqlscore_core::{ExecutionReport, TaskSummary, RECORD_VERSION};

use crate::aggregate::{Aggregate, DifficultyBreakdown, MetricSummary, RunSummary};
use crate::errors::{PipelineError, PipelineResult};
use crate::evaluate::ExampleRecord;
use crate::settings::EvalSettings;

pub const EVALUATION_FILE: &str = "evaluation.json";
pub const REPORT_FILE: &str = "report.md";
pub const TASKS_FILE: &str = "tasks.json";

/// Persisted run record consumed by downstream reporting.
#[derive(Debug, Serialize)]
pub struct RunRecord<'a> {
    pub record_version: &'static str,
    pub evaluated_at: String,
    pub settings: &'a EvalSettings,
    pub backend: Option<&'a str>,
    pub summary: &'a RunSummary,
    pub metrics: &'a BTreeMap<String, MetricSummary>,
    pub difficulty_breakdown: &'a BTreeMap<String, DifficultyBreakdown>,
    pub results: &'a [ExampleRecord],
}

impl<'a> RunRecord<'a> {
    pub fn new(
        settings: &'a EvalSettings,
        backend: Option<&'a str>,
        aggregate: &'a Aggregate,
        results: &'a [ExampleRecord],
    ) -> Self {
        Self {
            record_version: RECORD_VERSION,
            evaluated_at: Utc::now().to_rfc3339(),
            settings,
            backend,
            summary: &aggregate.summary,
            metrics: &aggregate.metrics,
            difficulty_breakdown: &aggregate.difficulty_breakdown,
            results,
        }
    }
}

/// Scheduler outcome for every pipeline task.
#[derive(Debug, Serialize)]
pub struct TaskLog {
    pub graph: String,
    pub order: Vec<String>,
    pub succeeded: usize,
    pub failed: usize,
    pub total_duration_ms: f64,
    pub tasks: Vec<TaskSummary>,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub task: String,
    pub cause: String,
}

impl TaskLog {
    pub fn from_report(report: &ExecutionReport) -> Self {
        Self {
            graph: report.graph_name.clone(),
            order: report.order.clone(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            total_duration_ms: report.total_duration.as_secs_f64() * 1000.0,
            tasks: report.summaries(),
            failures: report
                .failures()
                .into_iter()
                .map(|(task, cause)| FailureEntry {
                    task: task.to_string(),
                    cause: cause.to_string(),
                })
                .collect(),
        }
    }
}

/// Paths written by the `save_results` task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedOutputs {
    pub evaluation_path: PathBuf,
    pub report_path: PathBuf,
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    ensure_parent(path)?;
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .map_err(|err| PipelineError::io(path, err))?;
    serde_json::to_writer_pretty(file, value).map_err(PipelineError::from)
}

pub fn write_text(path: &Path, content: &str) -> PipelineResult<()> {
    ensure_parent(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .map_err(|err| PipelineError::io(path, err))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .map_err(|err| PipelineError::io(path, err))
}

fn ensure_parent(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
    }
    Ok(())
}
