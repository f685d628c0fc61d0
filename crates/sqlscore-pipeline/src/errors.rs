use std::path::PathBuf;

use thiserror::Error;

use sqlscore_core::{GraphError, TaskError};

/// Errors raised while preparing or running an evaluation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("json serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid settings file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),
    #[error("no prediction recorded for question '{0}'")]
    MissingPrediction(String),
    #[error("prediction failed: {0}")]
    Prediction(String),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

impl From<PipelineError> for TaskError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Task(inner) => inner,
            other => TaskError::Failed(other.to_string()),
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
