use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, TaskError};
use crate::graph::{TaskGraph, TaskNode};

/// Type-erased payload produced by a task and shared with its dependents.
pub type TaskOutput = Arc<dyn Any + Send + Sync>;

/// Named inputs visible to a task: global inputs plus dependency outputs.
#[derive(Clone, Default)]
pub struct TaskInputs {
    values: HashMap<String, TaskOutput>,
}

impl TaskInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Arc::new(value));
    }

    pub fn insert_shared(&mut self, name: impl Into<String>, value: TaskOutput) {
        self.values.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Borrow an input as `T`.
    pub fn get<T: 'static>(&self, name: &str) -> std::result::Result<&T, TaskError> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| TaskError::MissingInput(name.to_string()))?;
        value
            .as_ref()
            .downcast_ref::<T>()
            .ok_or_else(|| TaskError::InputType {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for TaskInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("TaskInputs").field("names", &names).finish()
    }
}

/// Why a task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    /// The executable returned an error.
    Execution { message: String },
    /// The executable panicked.
    Panicked { message: String },
    /// A dependency failed, so the executable was never invoked.
    DependencyFailed { dependency: String },
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution { message } => write!(f, "{message}"),
            Self::Panicked { message } => write!(f, "task panicked: {message}"),
            Self::DependencyFailed { dependency } => {
                write!(f, "dependency '{dependency}' failed")
            }
        }
    }
}

/// Outcome of one task in one run.
#[derive(Clone)]
pub struct TaskResult {
    pub task_name: String,
    pub success: bool,
    pub output: Option<TaskOutput>,
    pub error: Option<TaskFailure>,
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    fn succeeded(task_name: &str, output: TaskOutput, duration: Duration) -> Self {
        Self {
            task_name: task_name.to_string(),
            success: true,
            output: Some(output),
            error: None,
            duration,
            finished_at: Utc::now(),
        }
    }

    fn failed(task_name: &str, failure: TaskFailure, duration: Duration) -> Self {
        Self {
            task_name: task_name.to_string(),
            success: false,
            output: None,
            error: Some(failure),
            duration,
            finished_at: Utc::now(),
        }
    }

    /// Borrow the produced payload as `T`.
    pub fn output<T: 'static>(&self) -> Option<&T> {
        self.output
            .as_ref()
            .and_then(|output| output.as_ref().downcast_ref::<T>())
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_name: self.task_name.clone(),
            success: self.success,
            error: self.error.clone(),
            duration_ms: self.duration.as_secs_f64() * 1000.0,
            timestamp: self.finished_at.to_rfc3339(),
        }
    }
}

impl fmt::Debug for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("task_name", &self.task_name)
            .field("success", &self.success)
            .field("has_output", &self.output.is_some())
            .field("error", &self.error)
            .field("duration", &self.duration)
            .field("finished_at", &self.finished_at)
            .finish()
    }
}

/// Serializable view of a [`TaskResult`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    pub duration_ms: f64,
    pub timestamp: String,
}

/// Every task result of one run, plus the order they ran in.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub graph_name: String,
    pub order: Vec<String>,
    pub results: BTreeMap<String, TaskResult>,
    pub total_duration: Duration,
}

impl ExecutionReport {
    pub fn result(&self, name: &str) -> Option<&TaskResult> {
        self.results.get(name)
    }

    pub fn output<T: 'static>(&self, name: &str) -> Option<&T> {
        self.result(name).and_then(TaskResult::output::<T>)
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|result| result.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Failed tasks with their causes, in execution order.
    pub fn failures(&self) -> Vec<(&str, &TaskFailure)> {
        self.order
            .iter()
            .filter_map(|name| {
                let result = self.results.get(name)?;
                result.error.as_ref().map(|error| (name.as_str(), error))
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<TaskSummary> {
        self.order
            .iter()
            .filter_map(|name| self.results.get(name))
            .map(TaskResult::summary)
            .collect()
    }
}

impl TaskGraph {
    /// Run every task once, in topological order.
    ///
    /// Structural problems (unknown dependency, cycle) are returned before any
    /// task runs. After that nothing is raised: task errors, panics and failed
    /// dependencies all end up as failed [`TaskResult`]s and the remaining
    /// tasks still run.
    pub fn execute(&self, initial_inputs: &TaskInputs) -> Result<ExecutionReport> {
        let order = self.execution_order()?;
        let total = order.len();
        let started = Instant::now();

        tracing::info!(
            event = "graph_started",
            graph = %self.name(),
            tasks = total,
            order = %order.join(" -> "),
        );

        let mut results: BTreeMap<String, TaskResult> = BTreeMap::new();
        for (position, name) in order.iter().enumerate() {
            let Some(node) = self.node(name) else {
                continue;
            };
            tracing::info!(
                event = "task_started",
                task = %name,
                step = position + 1,
                total,
                description = node.description().unwrap_or_default(),
            );

            let result = match failed_dependency(node, &results) {
                Some(dependency) => {
                    tracing::error!(
                        event = "task_skipped",
                        task = %name,
                        dependency = %dependency,
                    );
                    TaskResult::failed(
                        name,
                        TaskFailure::DependencyFailed { dependency },
                        Duration::ZERO,
                    )
                }
                None => run_task(node, initial_inputs, &results),
            };

            if result.success {
                tracing::info!(
                    event = "task_finished",
                    task = %name,
                    duration_ms = result.duration.as_millis() as u64,
                );
            } else if let Some(error) = &result.error {
                tracing::error!(event = "task_failed", task = %name, error = %error);
            }
            results.insert(name.clone(), result);
        }

        let report = ExecutionReport {
            graph_name: self.name().to_string(),
            order,
            results,
            total_duration: started.elapsed(),
        };
        tracing::info!(
            event = "graph_finished",
            graph = %self.name(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            duration_ms = report.total_duration.as_millis() as u64,
        );
        Ok(report)
    }
}

fn failed_dependency(node: &TaskNode, results: &BTreeMap<String, TaskResult>) -> Option<String> {
    node.dependencies()
        .iter()
        .find(|dependency| {
            results
                .get(dependency.as_str())
                .is_none_or(|result| !result.success)
        })
        .cloned()
}

fn run_task(
    node: &TaskNode,
    initial_inputs: &TaskInputs,
    results: &BTreeMap<String, TaskResult>,
) -> TaskResult {
    let mut inputs = initial_inputs.clone();
    for dependency in node.dependencies() {
        if let Some(output) = results
            .get(dependency.as_str())
            .and_then(|result| result.output.clone())
        {
            inputs.insert_shared(dependency.clone(), output);
        }
    }

    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (node.executable)(&inputs)));
    let duration = start.elapsed();

    match outcome {
        Ok(Ok(output)) => TaskResult::succeeded(&node.name, output, duration),
        Ok(Err(err)) => TaskResult::failed(
            &node.name,
            TaskFailure::Execution {
                message: err.to_string(),
            },
            duration,
        ),
        Err(payload) => TaskResult::failed(
            &node.name,
            TaskFailure::Panicked {
                message: panic_message(payload.as_ref()),
            },
            duration,
        ),
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
