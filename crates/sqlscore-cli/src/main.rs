mod registry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use registry::{init_logging, start_run, RunContext};
use sqlscore_core::{redact_database_url, ExecutionError, ExecutionHandle};
use sqlscore_metrics::{EvaluationContext, ExecutionOptions, MetricKind, MetricSuite};
use sqlscore_pipeline::{
    EvalSettings, EvaluationPipeline, PipelineError, PipelineInputs, DATABASE_URL_ENV,
};
use sqlscore_postgres::{open_handle, PostgresOptions};
use thiserror::Error;
use tokio::runtime::Runtime;
use uuid::Uuid;

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("database error: {0}")]
    Database(#[from] ExecutionError),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),
    #[error("{0} pipeline task(s) failed; see tasks.json in the run directory")]
    RunFailed(usize),
}

#[derive(Parser, Debug)]
#[command(name = "sqlscore", version, about = "Text-to-SQL evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate recorded predictions against a benchmark dataset.
    Run(RunArgs),
    /// Score one predicted statement against a reference statement.
    Compare(CompareArgs),
    /// Print the pipeline tasks in execution order.
    Plan(PlanArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Settings file (defaults to ./sqlscore.toml when present).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Benchmark questions (JSON).
    #[arg(long, value_name = "PATH")]
    dataset: Option<PathBuf>,
    /// Recorded predictions (JSON), keyed by question id.
    #[arg(long, value_name = "PATH")]
    predictions: Option<PathBuf>,
    /// Database connection string used for execution accuracy.
    #[arg(long, value_name = "CONNECTION_STRING")]
    db_url: Option<String>,
    /// Root directory for run artifacts.
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,
    /// Worker threads for per-question evaluation.
    #[arg(long)]
    workers: Option<usize>,
    /// Per-statement timeout in milliseconds.
    #[arg(long)]
    statement_timeout_ms: Option<u64>,
    /// Retries for transient database failures.
    #[arg(long)]
    retries: Option<u32>,
    /// Metrics to compute (comma separated).
    #[arg(long, value_delimiter = ',')]
    metrics: Vec<MetricKind>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Reference (ground truth) statement.
    #[arg(long)]
    reference: String,
    /// Candidate statement.
    #[arg(long)]
    predicted: String,
    /// Database connection string (falls back to DATABASE_URL); execution
    /// accuracy is skipped without one.
    #[arg(long, value_name = "CONNECTION_STRING")]
    db_url: Option<String>,
    /// Per-statement timeout in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    statement_timeout_ms: u64,
    /// Decimal places kept when comparing non-integral numbers.
    #[arg(long, default_value_t = 10)]
    float_precision: u32,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Print the plan as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run_evaluation(args),
        Command::Compare(args) => run_compare(args),
        Command::Plan(args) => run_plan(args),
    }
}

fn run_evaluation(args: RunArgs) -> Result<(), CliError> {
    let mut settings = EvalSettings::discover(args.config.as_deref())?;
    apply_overrides(&mut settings, args);
    settings.validate()?;

    let database_url = settings.resolve_database_url();
    if let Some(url) = &database_url {
        detect_engine(url)?;
    }

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        connection: database_url.as_deref().map(redact_database_url),
        settings: settings.clone(),
    };
    let run_paths = start_run(&run_ctx)?;
    init_logging(Some(&run_paths.logs_path))?;

    tracing::info!(
        event = "run_started",
        run_id = %run_id,
        run_dir = %run_paths.run_root.display(),
        config = %run_paths.config_path.display(),
        dataset = %settings.dataset_path.display(),
    );
    let timer = Instant::now();

    let runtime = Runtime::new()?;
    let mut inputs = PipelineInputs::new(settings.clone(), run_paths.run_root.clone());
    match &database_url {
        Some(url) if settings.needs_database() => {
            if let Some(handle) = connect_or_degrade(url, postgres_options(&settings), &runtime) {
                inputs = inputs.with_handle(handle);
            }
        }
        Some(_) => {}
        None if settings.needs_database() => {
            tracing::warn!(
                event = "database_not_configured",
                "no connection string; execution accuracy will report every example as unscored"
            );
        }
        None => {}
    }

    let pipeline = EvaluationPipeline::new()?;
    let run = pipeline.run(inputs)?;

    if let Some(report) = run.report_text() {
        println!("{report}");
    }

    let failed = run.report.failed();
    tracing::info!(
        event = "run_finished",
        status = if failed == 0 { "success" } else { "partial" },
        failed_tasks = failed,
        duration_ms = timer.elapsed().as_millis() as u64,
    );

    if failed > 0 {
        return Err(CliError::RunFailed(failed));
    }
    Ok(())
}

fn run_compare(args: CompareArgs) -> Result<(), CliError> {
    init_logging(None)?;
    if args.reference.trim().is_empty() || args.predicted.trim().is_empty() {
        return Err(CliError::InvalidConfig(
            "both --reference and --predicted must be non-empty".to_string(),
        ));
    }

    let mut kinds = vec![MetricKind::ExactMatch, MetricKind::ComponentMatching];
    let runtime = Runtime::new()?;
    let mut context = EvaluationContext::new("cli", args.reference, args.predicted);

    let database_url = args
        .db_url
        .or_else(|| std::env::var(DATABASE_URL_ENV).ok())
        .filter(|url| !url.trim().is_empty());
    if let Some(url) = database_url.as_deref() {
        detect_engine(url)?;
        let options = PostgresOptions {
            statement_timeout: Duration::from_millis(args.statement_timeout_ms),
            ..PostgresOptions::default()
        };
        let handle: Arc<dyn ExecutionHandle> = open_handle(url, options, runtime.handle().clone())?;
        context = context.with_handle(handle);
        kinds.push(MetricKind::ExecutionAccuracy);
    } else {
        tracing::info!(event = "execution_skipped", "no connection string; skipping execution accuracy");
    }

    let suite = MetricSuite::from_kinds(
        &kinds,
        ExecutionOptions {
            float_precision: args.float_precision,
            ..ExecutionOptions::default()
        },
    );
    let results = suite.evaluate(&context);
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn run_plan(args: PlanArgs) -> Result<(), CliError> {
    let pipeline = EvaluationPipeline::new()?;
    let plan = pipeline.plan()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{} ({} tasks)", pipeline.graph().name(), plan.len());
    for (position, task) in plan.iter().enumerate() {
        println!(
            "{:>2}. {:<20} {}",
            position + 1,
            task.name,
            task.description.as_deref().unwrap_or_default()
        );
        if !task.dependencies.is_empty() {
            println!("      depends on: {}", task.dependencies.join(", "));
        }
    }
    Ok(())
}

/// Command-line flags win over the settings file.
fn apply_overrides(settings: &mut EvalSettings, args: RunArgs) {
    let RunArgs {
        config: _,
        dataset,
        predictions,
        db_url,
        out_dir,
        workers,
        statement_timeout_ms,
        retries,
        metrics,
    } = args;

    if let Some(dataset) = dataset {
        settings.dataset_path = dataset;
    }
    if predictions.is_some() {
        settings.predictions_path = predictions;
    }
    if db_url.is_some() {
        settings.database_url = db_url;
    }
    if let Some(out_dir) = out_dir {
        settings.output_dir = out_dir;
    }
    if let Some(workers) = workers {
        settings.max_workers = workers;
    }
    if let Some(timeout) = statement_timeout_ms {
        settings.statement_timeout_ms = timeout;
    }
    if let Some(retries) = retries {
        settings.execution_retries = retries;
    }
    if !metrics.is_empty() {
        settings.metrics = metrics;
    }
}

/// An unreachable database leaves execution accuracy unscored; the other
/// metrics still run.
fn connect_or_degrade(
    url: &str,
    options: PostgresOptions,
    runtime: &Runtime,
) -> Option<Arc<dyn ExecutionHandle>> {
    match open_handle(url, options, runtime.handle().clone()) {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(
                event = "db_unavailable",
                connection = %redact_database_url(url).display,
                error = %err,
                "execution accuracy will report every example as unscored"
            );
            None
        }
    }
}

fn postgres_options(settings: &EvalSettings) -> PostgresOptions {
    PostgresOptions {
        statement_timeout: settings.statement_timeout(),
        max_connections: settings.max_connections,
        ..PostgresOptions::default()
    }
}

fn detect_engine(conn: &str) -> Result<&'static str, CliError> {
    if conn.starts_with("postgres://") || conn.starts_with("postgresql://") {
        Ok("postgres")
    } else {
        Err(CliError::UnsupportedEngine(redact_database_url(conn).display))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings_file() {
        let mut settings = EvalSettings::from_toml("max_workers = 2\nexecution_retries = 1").unwrap();
        apply_overrides(
            &mut settings,
            RunArgs {
                dataset: Some(PathBuf::from("q.json")),
                workers: Some(6),
                metrics: vec![MetricKind::ExactMatch],
                ..RunArgs::default()
            },
        );

        assert_eq!(settings.dataset_path, PathBuf::from("q.json"));
        assert_eq!(settings.max_workers, 6);
        assert_eq!(settings.execution_retries, 1);
        assert_eq!(settings.metrics, vec![MetricKind::ExactMatch]);
        assert!(!settings.needs_database());
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "sqlscore",
            "run",
            "--dataset",
            "questions.json",
            "--workers",
            "4",
            "--metrics",
            "exact-match,execution_accuracy",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.workers, Some(4));
        assert_eq!(
            args.metrics,
            vec![MetricKind::ExactMatch, MetricKind::ExecutionAccuracy]
        );
    }

    #[test]
    fn unreachable_database_degrades_instead_of_failing() {
        let runtime = Runtime::new().unwrap();
        let options = PostgresOptions {
            acquire_timeout: Duration::from_millis(300),
            ..PostgresOptions::default()
        };
        let handle = connect_or_degrade("postgres://eval:pw@127.0.0.1:1/sih", options, &runtime);
        assert!(handle.is_none());
    }

    #[test]
    fn only_postgres_urls_are_supported() {
        assert_eq!(detect_engine("postgresql://localhost/db").unwrap(), "postgres");
        let err = detect_engine("mysql://root:pw@localhost/db").unwrap_err();
        assert!(!err.to_string().contains("pw@"));
    }
}
