//! Core contracts for sqlscore.
//!
//! This crate holds the dependency-ordered task scheduler, the data-source
//! contract consumed by execution-based scoring, and small helpers shared by
//! the pipeline and the CLI.

pub mod error;
pub mod execution;
pub mod graph;
pub mod redaction;
pub mod scheduler;

pub use error::{GraphError, Result, TaskError};
pub use execution::{
    ExecutionError, ExecutionErrorKind, ExecutionHandle, InMemoryHandle, Row, Value,
};
pub use graph::{Executable, TaskGraph, TaskInfo, TaskNode};
pub use redaction::{redact_database_url, RedactedUrl};
pub use scheduler::{
    panic_message, ExecutionReport, TaskFailure, TaskInputs, TaskOutput, TaskResult, TaskSummary,
};

/// Version tag written into persisted run records.
pub const RECORD_VERSION: &str = "0.1";
