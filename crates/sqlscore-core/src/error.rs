use thiserror::Error;

/// Structural errors raised while building or validating a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A task with the same name was already registered.
    #[error("task '{0}' already exists in graph")]
    DuplicateTask(String),
    /// A task names a dependency that is not registered.
    #[error("dependency '{dependency}' not found for task '{task}'")]
    UnknownDependency { task: String, dependency: String },
    /// The graph contains a cycle; `path` starts and ends on the same task.
    #[error("cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
    /// A lookup referenced a task that does not exist.
    #[error("task '{0}' not found")]
    UnknownTask(String),
}

/// Error returned by a task executable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A named input was not provided to the task.
    #[error("missing input '{0}'")]
    MissingInput(String),
    /// A named input exists but holds a different payload type.
    #[error("input '{name}' is not a {expected}")]
    InputType { name: String, expected: &'static str },
    /// The executable reported a failure.
    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Convenience alias for graph-building results.
pub type Result<T> = std::result::Result<T, GraphError>;
