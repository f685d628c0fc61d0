use tokio::runtime::Handle;

use sqlscore_core::{ExecutionError, ExecutionHandle, Row};

use crate::runner::QueryRunner;

/// Exposes an async [`QueryRunner`] through the synchronous
/// [`ExecutionHandle`] contract by blocking on a runtime handle.
///
/// `execute` must be called from outside the runtime's worker threads
/// (the main thread or plain worker threads), never from async code.
pub struct BlockingHandle<R> {
    runner: R,
    runtime: Handle,
}

impl<R: QueryRunner> BlockingHandle<R> {
    pub fn new(runner: R, runtime: Handle) -> Self {
        Self { runner, runtime }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}

impl<R: QueryRunner> ExecutionHandle for BlockingHandle<R> {
    fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        self.runtime.block_on(self.runner.fetch_rows(sql))
    }

    fn backend(&self) -> &str {
        self.runner.engine()
    }
}

impl<R> std::fmt::Debug for BlockingHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingHandle").finish_non_exhaustive()
    }
}
