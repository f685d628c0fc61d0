use std::sync::Arc;

use serde_json::json;
use sqlscore_core::{ExecutionError, ExecutionErrorKind, InMemoryHandle, Value};
use sqlscore_metrics::{
    ErrorOrigin, EvaluationContext, ExecutionAccuracy, ExecutionOptions, Metric, MetricKind,
    MetricSuite,
};

const REFERENCE: &str = "SELECT id, nome FROM pessoas ORDER BY id";
const REORDERED: &str = "SELECT id, nome FROM pessoas ORDER BY id DESC";
const BAD_COLUMN: &str = "SELECT idade_x FROM pessoas";

fn handle() -> Arc<InMemoryHandle> {
    Arc::new(
        InMemoryHandle::new()
            .with_rows(
                REFERENCE,
                vec![
                    vec![Value::Int(1), Value::from("a")],
                    vec![Value::Int(2), Value::from("b")],
                ],
            )
            .with_rows(
                REORDERED,
                vec![
                    vec![Value::Int(2), Value::from("b ")],
                    vec![Value::Float(1.0), Value::from("a")],
                ],
            )
            .with_error(
                BAD_COLUMN,
                ExecutionError::with_sqlstate("42703", "column \"idade_x\" does not exist"),
            ),
    )
}

fn context(reference: &str, predicted: &str, handle: Arc<InMemoryHandle>) -> EvaluationContext {
    EvaluationContext::new("q1", reference, predicted).with_handle(handle)
}

#[test]
fn row_order_does_not_matter() {
    let result = ExecutionAccuracy::default().evaluate(&context(REFERENCE, REORDERED, handle()));
    assert_eq!(result.score, 1.0);
    assert!(result.is_correct);
    assert!(result.error_message.is_none());
}

#[test]
fn failing_prediction_scores_zero_with_captured_error() {
    let handle = handle();
    let result = ExecutionAccuracy::default().evaluate(&context(REFERENCE, BAD_COLUMN, handle.clone()));

    assert_eq!(result.score, 0.0);
    assert!(!result.is_correct);
    assert_eq!(result.error_origin, Some(ErrorOrigin::Prediction));
    assert!(result
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("idade_x")));
    assert_eq!(
        result.details["predicted_error"]["kind"],
        json!("undefined_column")
    );
    // Both statements were executed.
    assert_eq!(handle.calls().len(), 2);
}

#[test]
fn failing_reference_is_reported_separately() {
    let result = ExecutionAccuracy::default().evaluate(&context(BAD_COLUMN, REFERENCE, handle()));
    assert_eq!(result.score, 0.0);
    assert!(result.is_reference_failure());
    assert!(result
        .error_message
        .as_deref()
        .is_some_and(|message| message.starts_with("reference query failed")));
}

#[test]
fn missing_handle_is_a_metric_error() {
    let result = ExecutionAccuracy::default().evaluate(&EvaluationContext::new("q1", REFERENCE, REFERENCE));
    assert_eq!(result.score, 0.0);
    assert_eq!(result.error_origin, Some(ErrorOrigin::Metric));
}

struct FlakyHandle {
    failures_left: std::sync::Mutex<u32>,
}

impl sqlscore_core::ExecutionHandle for FlakyHandle {
    fn execute(&self, _sql: &str) -> Result<Vec<sqlscore_core::Row>, ExecutionError> {
        let mut left = self.failures_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Err(ExecutionError::new(ExecutionErrorKind::Connection, "connection reset"));
        }
        Ok(vec![vec![Value::Int(7)]])
    }
}

#[test]
fn transient_failures_are_retried() {
    let options = ExecutionOptions {
        retries: 2,
        ..ExecutionOptions::default()
    };
    let handle = Arc::new(FlakyHandle {
        failures_left: std::sync::Mutex::new(2),
    });
    let ctx = EvaluationContext::new("q1", "SELECT 7", "SELECT 7").with_handle(handle);
    let result = ExecutionAccuracy::new(options).evaluate(&ctx);
    assert_eq!(result.score, 1.0);
}

#[test]
fn suite_runs_every_metric_and_continues_after_failures() {
    let suite = MetricSuite::from_kinds(&MetricKind::ALL, ExecutionOptions::default());
    let handle = handle();

    let failing = suite.evaluate(&context(REFERENCE, BAD_COLUMN, handle.clone()));
    let passing = suite.evaluate(&context(REFERENCE, REORDERED, handle));

    assert_eq!(failing.len(), 3);
    assert_eq!(failing["execution_accuracy"].score, 0.0);
    assert_eq!(passing["execution_accuracy"].score, 1.0);
    assert_eq!(passing["exact_match"].score, 0.0);
}
