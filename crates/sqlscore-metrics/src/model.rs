use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use sqlscore_core::ExecutionHandle;

use crate::errors::MetricError;

/// Everything a metric sees for one example.
#[derive(Clone, Default)]
pub struct EvaluationContext {
    pub question_id: String,
    /// Informational only; no metric reads it.
    pub question: String,
    pub reference_sql: String,
    pub predicted_sql: String,
    pub execution_handle: Option<Arc<dyn ExecutionHandle>>,
}

impl EvaluationContext {
    pub fn new(
        question_id: impl Into<String>,
        reference_sql: impl Into<String>,
        predicted_sql: impl Into<String>,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            reference_sql: reference_sql.into(),
            predicted_sql: predicted_sql.into(),
            ..Self::default()
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    pub fn with_handle(mut self, handle: Arc<dyn ExecutionHandle>) -> Self {
        self.execution_handle = Some(handle);
        self
    }
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("question_id", &self.question_id)
            .field("reference_sql", &self.reference_sql)
            .field("predicted_sql", &self.predicted_sql)
            .field(
                "execution_handle",
                &self.execution_handle.as_ref().map(|handle| handle.backend().to_string()),
            )
            .finish()
    }
}

/// Which side of a comparison produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// The reference statement is broken; the example itself is suspect.
    Reference,
    /// The candidate statement failed; an ordinary wrong answer.
    Prediction,
    /// The metric could not run (missing handle, internal failure).
    Metric,
}

/// Score of one metric on one example. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric_name: String,
    pub score: f64,
    pub is_correct: bool,
    #[serde(default)]
    pub details: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_origin: Option<ErrorOrigin>,
}

impl MetricResult {
    /// A completed comparison. `score` is clamped to `[0, 1]`.
    pub fn scored(metric_name: &str, score: f64, is_correct: bool, details: Map<String, JsonValue>) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            metric_name: metric_name.to_string(),
            score,
            is_correct,
            details: JsonValue::Object(details),
            error_message: None,
            error_origin: None,
        }
    }

    /// A zero score caused by an error.
    pub fn failed(
        metric_name: &str,
        origin: ErrorOrigin,
        message: impl Into<String>,
        details: Map<String, JsonValue>,
    ) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            score: 0.0,
            is_correct: false,
            details: JsonValue::Object(details),
            error_message: Some(message.into()),
            error_origin: Some(origin),
        }
    }

    pub fn is_reference_failure(&self) -> bool {
        self.error_origin == Some(ErrorOrigin::Reference)
    }
}

/// The metrics shipped with sqlscore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ExactMatch,
    ComponentMatching,
    ExecutionAccuracy,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::ExactMatch,
        MetricKind::ComponentMatching,
        MetricKind::ExecutionAccuracy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::ComponentMatching => "component_matching",
            Self::ExecutionAccuracy => "execution_accuracy",
        }
    }

    pub fn requires_execution(self) -> bool {
        matches!(self, Self::ExecutionAccuracy)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| MetricError::UnknownMetric(value.to_string()))
    }
}
