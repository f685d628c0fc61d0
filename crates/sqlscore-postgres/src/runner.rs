use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use sqlscore_core::{ExecutionError, ExecutionErrorKind, Row};

use crate::decode::decode_row;
use crate::options::PostgresOptions;

/// Asynchronous statement runner implemented by database backends.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Returns the engine identifier (e.g. `postgres`).
    fn engine(&self) -> &'static str;

    /// Run one statement and return its decoded rows.
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>, ExecutionError>;
}

/// Map a driver error to an execution error, keeping the SQLSTATE.
pub fn map_sqlx_error(err: sqlx::Error) -> ExecutionError {
    match &err {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => ExecutionError::with_sqlstate(code.to_string(), db.message()),
            None => ExecutionError::new(ExecutionErrorKind::Other, db.message()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            ExecutionError::new(ExecutionErrorKind::Connection, err.to_string())
        }
        _ => ExecutionError::new(ExecutionErrorKind::Other, err.to_string()),
    }
}

/// Open a connection pool sized for evaluation.
pub async fn connect(url: &str, options: &PostgresOptions) -> Result<PgPool, ExecutionError> {
    PgPoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(options.acquire_timeout)
        .connect(url)
        .await
        .map_err(map_sqlx_error)
}

/// Runs statements in a throwaway transaction with a server-side timeout.
#[derive(Debug, Clone)]
pub struct PostgresRunner {
    pool: PgPool,
    options: PostgresOptions,
}

impl PostgresRunner {
    /// Create a runner using a pre-configured pool.
    pub fn new(pool: PgPool, options: PostgresOptions) -> Self {
        Self { pool, options }
    }

    pub fn options(&self) -> &PostgresOptions {
        &self.options
    }

    async fn run(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        if self.options.read_only {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        let timeout_ms = self.options.statement_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let fetched = sqlx::query(sql).fetch_all(&mut *tx).await;
        if let Err(err) = tx.rollback().await {
            tracing::debug!(error = %err, "rollback after evaluation statement failed");
        }

        let rows = fetched.map_err(map_sqlx_error)?;
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl QueryRunner for PostgresRunner {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.options.client_deadline(), self.run(sql)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ExecutionError::new(
                ExecutionErrorKind::Timeout,
                format!(
                    "statement did not finish within {} ms",
                    self.options.client_deadline().as_millis()
                ),
            )),
        };

        match &outcome {
            Ok(rows) => tracing::debug!(
                event = "statement_executed",
                rows = rows.len(),
                duration_ms = started.elapsed().as_millis() as u64,
            ),
            Err(err) => tracing::debug!(
                event = "statement_failed",
                kind = err.kind.as_str(),
                duration_ms = started.elapsed().as_millis() as u64,
                error = %err,
            ),
        }
        outcome
    }
}
