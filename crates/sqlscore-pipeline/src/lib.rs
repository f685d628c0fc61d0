//! The evaluation pipeline: dataset and prediction loading, per-example
//! scoring on a bounded worker pool, aggregation and run artifacts, wired
//! together as a task graph.

pub mod aggregate;
pub mod dataset;
pub mod errors;
pub mod evaluate;
pub mod pipeline;
pub mod predictor;
pub mod record;
pub mod report;
pub mod settings;

pub use aggregate::{aggregate, Aggregate, DifficultyBreakdown, DifficultyMetric, MetricSummary, RunSummary};
pub use dataset::{load_dataset, parse_dataset, DatasetEntry};
pub use errors::{PipelineError, PipelineResult};
pub use evaluate::{evaluate_examples, evaluate_one, AgentStats, EvaluationOutcome, ExampleRecord, MetricRecord};
pub use pipeline::{EvaluationPipeline, PipelineInputs, PipelineRun, SharedHandle, SharedPredictor};
pub use predictor::{RecordedPredictions, SqlPredictor};
pub use record::{write_json, RunRecord, SavedOutputs, TaskLog, EVALUATION_FILE, REPORT_FILE, TASKS_FILE};
pub use report::render_report;
pub use settings::{EvalSettings, DATABASE_URL_ENV, DEFAULT_SETTINGS_FILE};
