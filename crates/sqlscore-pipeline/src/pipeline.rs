use std::path::PathBuf;
use std::sync::Arc;

use sqlscore_core::{ExecutionHandle, ExecutionReport, TaskGraph, TaskInfo, TaskInputs, TaskNode};
use sqlscore_metrics::MetricSuite;

use crate::aggregate::{aggregate, Aggregate};
use crate::dataset::{load_dataset, DatasetEntry};
use crate::errors::{PipelineError, PipelineResult};
use crate::evaluate::{evaluate_examples, EvaluationOutcome};
use crate::predictor::{RecordedPredictions, SqlPredictor};
use crate::record::{
    write_json, write_text, RunRecord, SavedOutputs, TaskLog, EVALUATION_FILE, REPORT_FILE,
    TASKS_FILE,
};
use crate::report::render_report;
use crate::settings::EvalSettings;

pub const GRAPH_NAME: &str = "text_to_sql_evaluation";

pub const LOAD_DATASET: &str = "load_dataset";
pub const LOAD_PREDICTIONS: &str = "load_predictions";
pub const INITIALIZE_METRICS: &str = "initialize_metrics";
pub const EVALUATE_EXAMPLES: &str = "evaluate_examples";
pub const AGGREGATE_RESULTS: &str = "aggregate_results";
pub const RENDER_REPORT: &str = "render_report";
pub const SAVE_RESULTS: &str = "save_results";

pub const SETTINGS_INPUT: &str = "settings";
pub const RUN_DIR_INPUT: &str = "run_dir";
pub const HANDLE_INPUT: &str = "execution_handle";
pub const PREDICTOR_INPUT: &str = "predictor";

/// Examples listed per section of the markdown report.
const REPORT_EXAMPLES: usize = 10;

/// Global input holding the optional data-source handle.
pub type SharedHandle = Option<Arc<dyn ExecutionHandle>>;
/// Payload of the `load_predictions` task.
pub type SharedPredictor = Arc<dyn SqlPredictor>;

/// Global inputs of one pipeline run.
pub struct PipelineInputs {
    pub settings: EvalSettings,
    pub run_dir: PathBuf,
    pub execution_handle: SharedHandle,
    /// Replaces the recorded-prediction replay when set.
    pub predictor: Option<SharedPredictor>,
}

impl PipelineInputs {
    pub fn new(settings: EvalSettings, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            run_dir: run_dir.into(),
            execution_handle: None,
            predictor: None,
        }
    }

    pub fn with_handle(mut self, handle: Arc<dyn ExecutionHandle>) -> Self {
        self.execution_handle = Some(handle);
        self
    }

    pub fn with_predictor(mut self, predictor: SharedPredictor) -> Self {
        self.predictor = Some(predictor);
        self
    }

    fn into_task_inputs(self) -> TaskInputs {
        let mut inputs = TaskInputs::new()
            .with(SETTINGS_INPUT, self.settings)
            .with(RUN_DIR_INPUT, self.run_dir)
            .with(HANDLE_INPUT, self.execution_handle);
        if let Some(predictor) = self.predictor {
            inputs.insert(PREDICTOR_INPUT, predictor);
        }
        inputs
    }
}

/// The evaluation pipeline: a fixed task graph run once per invocation.
#[derive(Debug, Clone)]
pub struct EvaluationPipeline {
    graph: TaskGraph,
}

impl EvaluationPipeline {
    pub fn new() -> PipelineResult<Self> {
        let graph = TaskGraph::from_nodes(GRAPH_NAME, pipeline_tasks())?;
        graph.validate()?;
        Ok(Self { graph })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Tasks in execution order with their descriptions and edges.
    pub fn plan(&self) -> PipelineResult<Vec<TaskInfo>> {
        let order = self.graph.execution_order()?;
        order
            .iter()
            .map(|name| self.graph.task_info(name, None).map_err(PipelineError::from))
            .collect()
    }

    /// Execute every task and write `tasks.json` next to the other outputs.
    ///
    /// Task failures do not surface as errors; inspect the returned report.
    pub fn run(&self, inputs: PipelineInputs) -> PipelineResult<PipelineRun> {
        let run_dir = inputs.run_dir.clone();
        let report = self.graph.execute(&inputs.into_task_inputs())?;

        for (task, cause) in report.failures() {
            tracing::warn!(event = "pipeline_task_failed", task, cause = %cause);
        }

        let tasks_path = run_dir.join(TASKS_FILE);
        write_json(&tasks_path, &TaskLog::from_report(&report))?;

        Ok(PipelineRun { report, tasks_path })
    }
}

/// Result of [`EvaluationPipeline::run`].
#[derive(Debug)]
pub struct PipelineRun {
    pub report: ExecutionReport,
    pub tasks_path: PathBuf,
}

impl PipelineRun {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }

    pub fn outcome(&self) -> Option<&EvaluationOutcome> {
        self.report.output(EVALUATE_EXAMPLES)
    }

    pub fn aggregate(&self) -> Option<&Aggregate> {
        self.report.output(AGGREGATE_RESULTS)
    }

    pub fn report_text(&self) -> Option<&str> {
        self.report.output::<String>(RENDER_REPORT).map(String::as_str)
    }

    pub fn saved(&self) -> Option<&SavedOutputs> {
        self.report.output(SAVE_RESULTS)
    }
}

fn pipeline_tasks() -> Vec<TaskNode> {
    vec![
        TaskNode::new(LOAD_DATASET, |inputs: &TaskInputs| {
            let settings = inputs.get::<EvalSettings>(SETTINGS_INPUT)?;
            Ok::<_, PipelineError>(load_dataset(&settings.dataset_path)?)
        })
        .describe("Read benchmark questions and reference queries"),
        TaskNode::new(LOAD_PREDICTIONS, |inputs: &TaskInputs| {
            if let Ok(predictor) = inputs.get::<SharedPredictor>(PREDICTOR_INPUT) {
                return Ok::<_, PipelineError>(Arc::clone(predictor));
            }
            let settings = inputs.get::<EvalSettings>(SETTINGS_INPUT)?;
            let entries = inputs.get::<Vec<DatasetEntry>>(LOAD_DATASET)?;
            let mut recorded = RecordedPredictions::from_dataset(entries);
            if let Some(path) = &settings.predictions_path {
                recorded = recorded.merge(RecordedPredictions::load(path)?);
            }
            Ok(Arc::new(recorded) as SharedPredictor)
        })
        .depends_on([LOAD_DATASET])
        .describe("Resolve the predictor that supplies candidate SQL"),
        TaskNode::new(INITIALIZE_METRICS, |inputs: &TaskInputs| {
            let settings = inputs.get::<EvalSettings>(SETTINGS_INPUT)?;
            let handle = inputs.get::<SharedHandle>(HANDLE_INPUT)?;
            if settings.needs_database() && handle.is_none() {
                tracing::warn!(
                    event = "execution_handle_missing",
                    "execution accuracy is enabled but no database is configured"
                );
            }
            let suite = MetricSuite::from_kinds(&settings.metrics, settings.execution_options());
            tracing::info!(event = "metrics_initialized", metrics = ?suite.names());
            Ok::<_, PipelineError>(suite)
        })
        .describe("Build the enabled metrics"),
        TaskNode::new(EVALUATE_EXAMPLES, |inputs: &TaskInputs| {
            let settings = inputs.get::<EvalSettings>(SETTINGS_INPUT)?;
            let handle = inputs.get::<SharedHandle>(HANDLE_INPUT)?;
            let entries = inputs.get::<Vec<DatasetEntry>>(LOAD_DATASET)?;
            let predictor = inputs.get::<SharedPredictor>(LOAD_PREDICTIONS)?;
            let suite = inputs.get::<MetricSuite>(INITIALIZE_METRICS)?;
            Ok::<_, PipelineError>(evaluate_examples(
                entries,
                predictor.as_ref(),
                suite,
                handle.clone(),
                settings.max_workers,
            ))
        })
        .depends_on([LOAD_DATASET, LOAD_PREDICTIONS, INITIALIZE_METRICS])
        .describe("Predict and score every question"),
        TaskNode::new(AGGREGATE_RESULTS, |inputs: &TaskInputs| {
            let outcome = inputs.get::<EvaluationOutcome>(EVALUATE_EXAMPLES)?;
            let suite = inputs.get::<MetricSuite>(INITIALIZE_METRICS)?;
            let result = aggregate(outcome, &suite.names());
            for (name, stats) in &result.metrics {
                tracing::info!(
                    event = "metric_aggregated",
                    metric = %name,
                    average_score = stats.average_score,
                    accuracy = stats.accuracy,
                    evaluated = stats.total_evaluated,
                );
            }
            Ok::<_, PipelineError>(result)
        })
        .depends_on([EVALUATE_EXAMPLES, INITIALIZE_METRICS])
        .describe("Summarize scores overall and per difficulty"),
        TaskNode::new(RENDER_REPORT, |inputs: &TaskInputs| {
            let outcome = inputs.get::<EvaluationOutcome>(EVALUATE_EXAMPLES)?;
            let result = inputs.get::<Aggregate>(AGGREGATE_RESULTS)?;
            Ok::<_, PipelineError>(render_report(result, outcome, REPORT_EXAMPLES))
        })
        .depends_on([AGGREGATE_RESULTS, EVALUATE_EXAMPLES])
        .describe("Render the markdown summary"),
        TaskNode::new(SAVE_RESULTS, |inputs: &TaskInputs| {
            let settings = inputs.get::<EvalSettings>(SETTINGS_INPUT)?;
            let run_dir = inputs.get::<PathBuf>(RUN_DIR_INPUT)?;
            let handle = inputs.get::<SharedHandle>(HANDLE_INPUT)?;
            let outcome = inputs.get::<EvaluationOutcome>(EVALUATE_EXAMPLES)?;
            let result = inputs.get::<Aggregate>(AGGREGATE_RESULTS)?;
            let report = inputs.get::<String>(RENDER_REPORT)?;

            let backend = handle.as_ref().map(|handle| handle.backend());
            let record = RunRecord::new(settings, backend, result, &outcome.records);
            let saved = SavedOutputs {
                evaluation_path: run_dir.join(EVALUATION_FILE),
                report_path: run_dir.join(REPORT_FILE),
            };
            write_json(&saved.evaluation_path, &record)?;
            write_text(&saved.report_path, report)?;
            tracing::info!(
                event = "results_saved",
                evaluation = %saved.evaluation_path.display(),
                report = %saved.report_path.display(),
            );
            Ok::<_, PipelineError>(saved)
        })
        .depends_on([EVALUATE_EXAMPLES, AGGREGATE_RESULTS, RENDER_REPORT])
        .describe("Write evaluation.json and report.md"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_follows_declaration_order() {
        let pipeline = EvaluationPipeline::new().unwrap();
        let plan = pipeline.plan().unwrap();
        let names: Vec<_> = plan.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                LOAD_DATASET,
                LOAD_PREDICTIONS,
                INITIALIZE_METRICS,
                EVALUATE_EXAMPLES,
                AGGREGATE_RESULTS,
                RENDER_REPORT,
                SAVE_RESULTS,
            ]
        );
        assert_eq!(plan[3].dependencies.len(), 3);
        assert_eq!(plan[0].dependents, vec![LOAD_PREDICTIONS, EVALUATE_EXAMPLES]);
        assert!(plan.iter().all(|info| info.description.is_some() && !info.executed));
    }
}
