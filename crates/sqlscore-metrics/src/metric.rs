use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Map;

use sqlscore_core::panic_message;

use crate::component::ComponentMatching;
use crate::errors::MetricError;
use crate::exact_match::ExactMatch;
use crate::execution_accuracy::{ExecutionAccuracy, ExecutionOptions};
use crate::model::{ErrorOrigin, EvaluationContext, MetricKind, MetricResult};

/// A SQL-equivalence metric.
///
/// Implementations provide [`Metric::score`]; callers use
/// [`Metric::evaluate`], which never fails.
pub trait Metric: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, context: &EvaluationContext) -> Result<MetricResult, MetricError>;

    /// Score one example, turning errors and panics into a zero score.
    fn evaluate(&self, context: &EvaluationContext) -> MetricResult {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.score(context)));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => MetricResult::failed(self.name(), err.origin(), err.to_string(), Map::new()),
            Err(payload) => MetricResult::failed(
                self.name(),
                ErrorOrigin::Metric,
                format!("metric panicked: {}", panic_message(payload.as_ref())),
                Map::new(),
            ),
        };

        if let Some(error) = &result.error_message {
            tracing::debug!(
                event = "metric_failed",
                metric = self.name(),
                question_id = %context.question_id,
                error = %error,
            );
        }
        tracing::trace!(
            event = "metric_evaluated",
            metric = self.name(),
            question_id = %context.question_id,
            score = result.score,
            duration_ms = started.elapsed().as_millis() as u64,
        );
        result
    }
}

/// An ordered set of metrics applied together to each example.
#[derive(Clone, Default)]
pub struct MetricSuite {
    metrics: Vec<Arc<dyn Metric>>,
}

impl MetricSuite {
    pub fn new(metrics: Vec<Arc<dyn Metric>>) -> Self {
        Self { metrics }
    }

    /// Build the shipped metrics for `kinds`, in the given order.
    pub fn from_kinds(kinds: &[MetricKind], execution: ExecutionOptions) -> Self {
        let metrics = kinds
            .iter()
            .map(|kind| -> Arc<dyn Metric> {
                match kind {
                    MetricKind::ExactMatch => Arc::new(ExactMatch),
                    MetricKind::ComponentMatching => Arc::new(ComponentMatching::default()),
                    MetricKind::ExecutionAccuracy => {
                        Arc::new(ExecutionAccuracy::new(execution.clone()))
                    }
                }
            })
            .collect();
        Self { metrics }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.metrics.iter().map(|metric| metric.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Run every metric on one example, keyed by metric name.
    pub fn evaluate(&self, context: &EvaluationContext) -> BTreeMap<String, MetricResult> {
        self.metrics
            .iter()
            .map(|metric| (metric.name().to_string(), metric.evaluate(context)))
            .collect()
    }
}

impl std::fmt::Debug for MetricSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSuite")
            .field("metrics", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exploding;

    impl Metric for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn score(&self, _context: &EvaluationContext) -> Result<MetricResult, MetricError> {
            panic!("parser bug")
        }
    }

    #[test]
    fn panics_become_zero_scores() {
        let result = Exploding.evaluate(&EvaluationContext::new("q1", "SELECT 1", "SELECT 1"));
        assert_eq!(result.score, 0.0);
        assert!(!result.is_correct);
        assert_eq!(result.error_origin, Some(ErrorOrigin::Metric));
        assert_eq!(result.error_message.as_deref(), Some("metric panicked: parser bug"));
    }

    #[test]
    fn suite_keys_results_by_metric_name() {
        let suite = MetricSuite::from_kinds(
            &[MetricKind::ExactMatch, MetricKind::ComponentMatching],
            ExecutionOptions::default(),
        );
        let results = suite.evaluate(&EvaluationContext::new("q1", "SELECT a FROM t", "select a from t"));
        assert_eq!(suite.names(), vec!["exact_match", "component_matching"]);
        assert_eq!(results["exact_match"].score, 1.0);
        assert_eq!(results["component_matching"].score, 1.0);
    }
}
