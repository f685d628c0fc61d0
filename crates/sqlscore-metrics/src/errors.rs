use thiserror::Error;

use sqlscore_core::ExecutionError;

use crate::model::ErrorOrigin;

/// Errors a metric may report while scoring one example.
///
/// They never escape [`crate::Metric::evaluate`]; each becomes a zero-score
/// [`crate::MetricResult`] carrying the message.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("reference SQL is empty")]
    EmptyReference,
    #[error("predicted SQL is empty")]
    EmptyPrediction,
    #[error("metric '{0}' requires an execution handle")]
    MissingHandle(&'static str),
    #[error("reference query failed: {0}")]
    Reference(ExecutionError),
    #[error("predicted query failed: {0}")]
    Prediction(ExecutionError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
}

impl MetricError {
    /// Which side of the comparison the failure belongs to.
    pub fn origin(&self) -> ErrorOrigin {
        match self {
            Self::EmptyReference | Self::Reference(_) => ErrorOrigin::Reference,
            Self::EmptyPrediction | Self::Prediction(_) => ErrorOrigin::Prediction,
            Self::MissingHandle(_) | Self::Json(_) | Self::UnknownMetric(_) => ErrorOrigin::Metric,
        }
    }
}
