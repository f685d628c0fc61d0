use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;

use sqlscore_core::{panic_message, ExecutionHandle};
use sqlscore_metrics::{ErrorOrigin, EvaluationContext, MetricResult, MetricSuite};

use crate::dataset::DatasetEntry;
use crate::predictor::SqlPredictor;

/// Persisted form of one metric result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub score: f64,
    pub is_correct: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_origin: Option<ErrorOrigin>,
    pub details: JsonValue,
}

impl From<MetricResult> for MetricRecord {
    fn from(result: MetricResult) -> Self {
        Self {
            score: result.score,
            is_correct: result.is_correct,
            error: result.error_message,
            error_origin: result.error_origin,
            details: result.details,
        }
    }
}

/// Everything recorded for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExampleRecord {
    pub question_id: String,
    pub difficulty: String,
    pub question: String,
    pub reference_sql: String,
    pub predicted_sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_error: Option<String>,
    pub agent_success: bool,
    pub prediction_ms: f64,
    pub metrics: BTreeMap<String, MetricRecord>,
}

/// Counters shared by all workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentStats {
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub total_time: Duration,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64() * 1000.0)
}

/// Output of the per-example evaluation step, in dataset order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationOutcome {
    pub records: Vec<ExampleRecord>,
    pub stats: AgentStats,
    pub workers: usize,
}

impl EvaluationOutcome {
    pub fn total(&self) -> usize {
        self.records.len()
    }
}

#[derive(Default)]
struct Shared {
    stats: AgentStats,
    records: Vec<(usize, ExampleRecord)>,
}

/// Predict and score every entry, fanned out over at most `max_workers`
/// threads.
///
/// Workers only share the counters and the result list, both behind one
/// lock taken once per finished example.
pub fn evaluate_examples(
    entries: &[DatasetEntry],
    predictor: &dyn SqlPredictor,
    suite: &MetricSuite,
    handle: Option<Arc<dyn ExecutionHandle>>,
    max_workers: usize,
) -> EvaluationOutcome {
    let workers = max_workers.clamp(1, entries.len().max(1));
    let shared = Mutex::new(Shared::default());
    let started = Instant::now();

    tracing::info!(
        event = "evaluation_started",
        questions = entries.len(),
        workers,
        predictor = predictor.name(),
        metrics = ?suite.names(),
    );

    let run_worker = |worker: usize| {
        for (index, entry) in entries.iter().enumerate().skip(worker).step_by(workers) {
            let record = evaluate_one(entry, predictor, suite, handle.as_ref());
            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if record.agent_success {
                guard.stats.success_count += 1;
            } else {
                guard.stats.failure_count += 1;
            }
            guard.stats.total_time += Duration::from_secs_f64(record.prediction_ms / 1000.0);
            guard.records.push((index, record));
            let done = guard.records.len();
            drop(guard);

            if done % 10 == 0 {
                tracing::info!(event = "evaluation_progress", done, total = entries.len());
            }
        }
    };

    if workers == 1 {
        run_worker(0);
    } else {
        std::thread::scope(|scope| {
            for worker in 0..workers {
                let run_worker = &run_worker;
                scope.spawn(move || run_worker(worker));
            }
        });
    }

    let Shared { stats, mut records } = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
    records.sort_by_key(|(index, _)| *index);

    tracing::info!(
        event = "evaluation_finished",
        questions = entries.len(),
        agent_success = stats.success_count,
        agent_failure = stats.failure_count,
        duration_ms = started.elapsed().as_millis() as u64,
    );

    EvaluationOutcome {
        records: records.into_iter().map(|(_, record)| record).collect(),
        stats,
        workers,
    }
}

/// Predict and score one entry. Never panics: predictor panics become a
/// prediction error and metrics isolate their own failures.
pub fn evaluate_one(
    entry: &DatasetEntry,
    predictor: &dyn SqlPredictor,
    suite: &MetricSuite,
    handle: Option<&Arc<dyn ExecutionHandle>>,
) -> ExampleRecord {
    let started = Instant::now();
    let predicted = match panic::catch_unwind(AssertUnwindSafe(|| predictor.predict(entry))) {
        Ok(Ok(sql)) => Ok(sql),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(format!("predictor panicked: {}", panic_message(payload.as_ref()))),
    };
    let prediction_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (predicted_sql, prediction_error) = match predicted {
        Ok(sql) => (sql, None),
        Err(message) => {
            tracing::warn!(
                event = "prediction_failed",
                question_id = %entry.id,
                error = %message,
            );
            (String::new(), Some(message))
        }
    };
    let agent_success = !predicted_sql.trim().is_empty();

    let mut context =
        EvaluationContext::new(entry.id.clone(), entry.reference_sql.clone(), predicted_sql.clone())
            .with_question(entry.question.clone());
    if let Some(handle) = handle {
        context = context.with_handle(Arc::clone(handle));
    }

    let metrics = suite
        .evaluate(&context)
        .into_iter()
        .map(|(name, result)| (name, MetricRecord::from(result)))
        .collect();

    ExampleRecord {
        question_id: entry.id.clone(),
        difficulty: entry.difficulty.clone(),
        question: entry.question.clone(),
        reference_sql: entry.reference_sql.clone(),
        predicted_sql,
        prediction_error,
        agent_success,
        prediction_ms,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{PipelineError, PipelineResult};
    use crate::predictor::RecordedPredictions;
    use sqlscore_metrics::{ExecutionOptions, MetricKind};

    fn entries(count: usize) -> Vec<DatasetEntry> {
        (0..count)
            .map(|idx| DatasetEntry {
                id: format!("q{idx}"),
                question: format!("question {idx}"),
                reference_sql: format!("SELECT {idx}"),
                difficulty: if idx % 2 == 0 { "easy" } else { "hard" }.to_string(),
                predicted_sql: None,
            })
            .collect()
    }

    fn text_suite() -> MetricSuite {
        MetricSuite::from_kinds(
            &[MetricKind::ExactMatch, MetricKind::ComponentMatching],
            ExecutionOptions::default(),
        )
    }

    #[test]
    fn parallel_run_matches_sequential_run() {
        let entries = entries(23);
        let mut predictions = RecordedPredictions::new();
        for entry in &entries {
            predictions.insert(entry.id.clone(), entry.reference_sql.clone());
        }
        let suite = text_suite();

        let sequential = evaluate_examples(&entries, &predictions, &suite, None, 1);
        let parallel = evaluate_examples(&entries, &predictions, &suite, None, 4);

        assert_eq!(parallel.workers, 4);
        assert_eq!(parallel.stats.success_count, 23);
        assert_eq!(parallel.stats.failure_count, 0);
        let ids: Vec<_> = parallel.records.iter().map(|r| r.question_id.as_str()).collect();
        let expected: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, expected);
        for (left, right) in sequential.records.iter().zip(&parallel.records) {
            assert_eq!(left.metrics["exact_match"].score, right.metrics["exact_match"].score);
        }
    }

    #[test]
    fn worker_count_never_exceeds_entries() {
        let entries = entries(2);
        let outcome =
            evaluate_examples(&entries, &RecordedPredictions::new(), &text_suite(), None, 8);
        assert_eq!(outcome.workers, 2);
        assert_eq!(outcome.stats.failure_count, 2);
    }

    struct Panicking;

    impl SqlPredictor for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn predict(&self, entry: &DatasetEntry) -> PipelineResult<String> {
            if entry.id == "q1" {
                panic!("model crashed");
            }
            Err(PipelineError::Prediction("timeout".to_string()))
        }
    }

    #[test]
    fn predictor_failures_are_recorded_per_example() {
        let entries = entries(3);
        let outcome = evaluate_examples(&entries, &Panicking, &text_suite(), None, 2);

        assert_eq!(outcome.stats.failure_count, 3);
        let crashed = &outcome.records[1];
        assert!(!crashed.agent_success);
        assert_eq!(crashed.predicted_sql, "");
        assert_eq!(
            crashed.prediction_error.as_deref(),
            Some("predictor panicked: model crashed")
        );
        assert_eq!(
            outcome.records[0].prediction_error.as_deref(),
            Some("prediction failed: timeout")
        );
        assert_eq!(crashed.metrics["exact_match"].score, 0.0);
    }
}
