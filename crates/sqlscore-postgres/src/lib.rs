//! PostgreSQL execution backend for execution-accuracy scoring.

pub mod blocking;
pub mod decode;
pub mod options;
pub mod runner;

use std::sync::Arc;

use tokio::runtime::Handle;

use sqlscore_core::{ExecutionError, ExecutionHandle};

pub use blocking::BlockingHandle;
pub use options::PostgresOptions;
pub use runner::{connect, map_sqlx_error, PostgresRunner, QueryRunner};

/// Connect and wrap the pool as a synchronous execution handle.
///
/// Blocks on `runtime` while connecting; call it outside async code.
pub fn open_handle(
    url: &str,
    options: PostgresOptions,
    runtime: Handle,
) -> Result<Arc<dyn ExecutionHandle>, ExecutionError> {
    let pool = runtime.block_on(connect(url, &options))?;
    tracing::info!(
        event = "database_connected",
        max_connections = options.max_connections,
        statement_timeout_ms = options.statement_timeout.as_millis() as u64,
    );
    Ok(Arc::new(BlockingHandle::new(
        PostgresRunner::new(pool, options),
        runtime,
    )))
}
