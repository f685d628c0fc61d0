use std::time::Duration;

/// Options for the PostgreSQL execution backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Server-side `statement_timeout` applied to every statement.
    pub statement_timeout: Duration,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Run statements in a read-only transaction.
    pub read_only: bool,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_millis(30_000),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            read_only: true,
        }
    }
}

impl PostgresOptions {
    /// Client-side deadline: the server timeout plus a grace period for the
    /// cancellation to come back.
    pub fn client_deadline(&self) -> Duration {
        self.statement_timeout + Duration::from_secs(5)
    }
}
