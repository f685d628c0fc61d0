use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single decoded column value returned by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision number in its canonical decimal text.
    Numeric(String),
    Text(String),
    /// ISO-8601 date (`YYYY-MM-DD`).
    Date(String),
    Time(String),
    Timestamp(String),
    TimestampTz(String),
    Uuid(String),
    /// Calendar interval kept in its three PostgreSQL fields.
    Interval {
        months: i32,
        days: i32,
        microseconds: i64,
    },
    /// One-dimensional array; `NULL` elements are [`Value::Null`].
    Array(Vec<Value>),
    /// Any other type, rendered as text by the backend.
    Other(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Numeric(text)
            | Self::Text(text)
            | Self::Date(text)
            | Self::Time(text)
            | Self::Timestamp(text)
            | Self::TimestampTz(text)
            | Self::Uuid(text)
            | Self::Other(text) => f.write_str(text),
            Self::Interval {
                months,
                days,
                microseconds,
            } => write!(f, "{months} mons {days} days {microseconds} us"),
            Self::Array(items) => {
                f.write_str("{")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One result row, columns in select-list order.
pub type Row = Vec<Value>;

/// Broad classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Timeout,
    Syntax,
    UndefinedTable,
    UndefinedColumn,
    UndefinedFunction,
    Connection,
    Other,
}

impl ExecutionErrorKind {
    /// Classify a PostgreSQL SQLSTATE code.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "57014" => Self::Timeout,
            "42601" => Self::Syntax,
            "42P01" => Self::UndefinedTable,
            "42703" => Self::UndefinedColumn,
            "42883" => Self::UndefinedFunction,
            code if code.starts_with("08") => Self::Connection,
            _ => Self::Other,
        }
    }

    /// Only connection problems are retried.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Connection)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Syntax => "syntax",
            Self::UndefinedTable => "undefined_table",
            Self::UndefinedColumn => "undefined_column",
            Self::UndefinedFunction => "undefined_function",
            Self::Connection => "connection",
            Self::Other => "other",
        }
    }
}

/// Failure reported by an [`ExecutionHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind_label} error: {message}", kind_label = .kind.as_str())]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlstate: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sqlstate: None,
        }
    }

    pub fn with_sqlstate(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: ExecutionErrorKind::from_sqlstate(&code),
            message: message.into(),
            sqlstate: Some(code),
        }
    }
}

/// A live data source able to run one read-only statement.
///
/// Implementations enforce their own statement timeout; a timed-out
/// statement surfaces as an [`ExecutionErrorKind::Timeout`] error.
pub trait ExecutionHandle: Send + Sync {
    fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError>;

    /// Short backend label used in logs.
    fn backend(&self) -> &str {
        "unknown"
    }
}

/// Fixed statement-to-outcome table. Unknown statements fail as syntax
/// errors. Statements are matched after trimming.
#[derive(Debug, Default)]
pub struct InMemoryHandle {
    outcomes: HashMap<String, Result<Vec<Row>, ExecutionError>>,
    calls: Mutex<Vec<String>>,
}

impl InMemoryHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, sql: &str, rows: Vec<Row>) -> Self {
        self.outcomes.insert(sql.trim().to_string(), Ok(rows));
        self
    }

    pub fn with_error(mut self, sql: &str, error: ExecutionError) -> Self {
        self.outcomes.insert(sql.trim().to_string(), Err(error));
        self
    }

    /// Statements executed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl ExecutionHandle for InMemoryHandle {
    fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        let key = sql.trim();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.to_string());
        }
        self.outcomes.get(key).cloned().unwrap_or_else(|| {
            Err(ExecutionError::new(
                ExecutionErrorKind::Syntax,
                format!("no fixture for statement: {key}"),
            ))
        })
    }

    fn backend(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sqlstate_codes() {
        assert_eq!(
            ExecutionErrorKind::from_sqlstate("42703"),
            ExecutionErrorKind::UndefinedColumn
        );
        assert_eq!(
            ExecutionErrorKind::from_sqlstate("08006"),
            ExecutionErrorKind::Connection
        );
        assert_eq!(
            ExecutionErrorKind::from_sqlstate("22012"),
            ExecutionErrorKind::Other
        );
        assert!(ExecutionErrorKind::Connection.is_transient());
        assert!(!ExecutionErrorKind::Syntax.is_transient());
    }

    #[test]
    fn composite_values_render_every_element() {
        let array = Value::Array(vec![Value::Float(1.5), Value::Null, Value::Int(3)]);
        assert_eq!(array.to_string(), "{1.5,NULL,3}");
        let interval = Value::Interval {
            months: 0,
            days: -2,
            microseconds: 0,
        };
        assert_eq!(interval.to_string(), "0 mons -2 days 0 us");
    }

    #[test]
    fn error_display_includes_kind() {
        let error = ExecutionError::with_sqlstate("57014", "canceling statement");
        assert_eq!(error.kind, ExecutionErrorKind::Timeout);
        assert_eq!(error.to_string(), "timeout error: canceling statement");
    }

    #[test]
    fn in_memory_handle_replays_fixtures() {
        let handle = InMemoryHandle::new()
            .with_rows("SELECT 1", vec![vec![Value::Int(1)]])
            .with_error(
                "SELECT nope FROM t",
                ExecutionError::new(ExecutionErrorKind::UndefinedColumn, "column nope"),
            );

        assert_eq!(handle.execute(" SELECT 1 ").unwrap(), vec![vec![Value::Int(1)]]);
        assert!(handle.execute("SELECT nope FROM t").is_err());
        assert_eq!(
            handle.execute("SELECT 2").unwrap_err().kind,
            ExecutionErrorKind::Syntax
        );
        assert_eq!(handle.calls().len(), 3);
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::from(Some(3_i32)), Value::Int(3));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from("x").to_string(), "x");
    }
}
