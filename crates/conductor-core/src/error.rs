use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::TaskId;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Top-level error type for the Conductor engine.
///
/// Validation errors are fatal and surface before any task runs. Backend,
/// circuit, and cancellation errors are produced per call and end up as data
/// inside a task result; they only cross a task boundary wrapped in
/// [`ConductorError::TaskFailed`].
#[derive(Debug, Error)]
pub enum ConductorError {
    /// The submitted workflow (or configuration) is invalid.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A transient backend failure (5xx, 429, timeout, transport).
    #[error("Retryable error from backend '{backend}': {source}")]
    RetryableBackend {
        /// Backend that produced the error.
        backend: String,
        /// The raw invoker error.
        #[source]
        source: BackendError,
    },

    /// A backend failure that will not succeed on retry (400, 401, 403, 404).
    #[error("Non-retryable error from backend '{backend}': {source}")]
    NonRetryableBackend {
        /// Backend that produced the error.
        backend: String,
        /// The raw invoker error.
        #[source]
        source: BackendError,
    },

    /// The backend's circuit breaker rejected the call without attempting it.
    #[error("Circuit open for backend '{backend}'")]
    CircuitOpen {
        /// Backend whose circuit is open.
        backend: String,
    },

    /// Every candidate backend was exhausted.
    #[error("All providers failed ({} attempted, {} skipped)", failures.len(), skipped.len())]
    AllProvidersFailed {
        /// Last error from each attempted backend, in the order they were tried.
        failures: Vec<BackendFailure>,
        /// Backends skipped because they were disabled or their circuit was open.
        skipped: Vec<String>,
    },

    /// A specific task failed.
    #[error("Task '{task_id}' failed: {source}")]
    TaskFailed {
        /// The failing task.
        task_id: TaskId,
        /// Underlying cause.
        #[source]
        source: Box<ConductorError>,
    },

    /// The workflow deadline passed or the caller cancelled the run.
    #[error("Cancelled")]
    Cancelled,

    /// An agent implementation reported a failure of its own.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Wrap this error as the failure cause of `task_id`.
    pub fn for_task(self, task_id: impl Into<TaskId>) -> Self {
        ConductorError::TaskFailed {
            task_id: task_id.into(),
            source: Box::new(self),
        }
    }

    /// Returns `true` for cancellation, including a cancelled task.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ConductorError::Cancelled => true,
            ConductorError::TaskFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Problems with a submitted workflow that prevent any execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A dependency cycle. `path` lists the tasks on the cycle, starting and
    /// ending with the same id.
    #[error("Dependency cycle detected: {}", format_path(path))]
    CycleDetected {
        /// Tasks along the back-edge cycle.
        path: Vec<TaskId>,
    },

    /// An edge references a task id that is not part of the workflow.
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The dependent task.
        task: TaskId,
        /// The missing predecessor.
        dependency: TaskId,
    },

    /// Two tasks share the same id.
    #[error("Duplicate task id '{0}'")]
    DuplicateTask(TaskId),

    /// No agent factory is registered for a task's type.
    #[error("Task '{task}' has unregistered task type '{task_type}'")]
    UnknownTaskType {
        /// The task.
        task: TaskId,
        /// Its unregistered type key.
        task_type: String,
    },

    /// Conditional composition was requested without a predicate.
    #[error("Conditional composition requires a readiness predicate")]
    MissingPredicate,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn format_path(path: &[TaskId]) -> String {
    path.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Error returned by a single backend invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendError {
    /// The backend answered with a non-success HTTP status.
    #[error("HTTP {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The call exceeded its per-call timeout.
    #[error("timeout after {timeout_ms}ms")]
    Timeout {
        /// The timeout that was exceeded.
        timeout_ms: u64,
    },

    /// Connection-level failure (reset, refused, DNS).
    #[error("transport error: {0}")]
    Transport(String),
}

impl BackendError {
    /// Shorthand for a status error.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        BackendError::Status {
            code,
            message: message.into(),
        }
    }
}

/// The last error seen from one attempted backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFailure {
    /// Backend name.
    pub backend: String,
    /// Number of calls actually made against this backend.
    pub attempts: u32,
    /// The error from the final attempt.
    pub last_error: BackendError,
    /// How the final error was classified.
    #[serde(default)]
    pub retryable: bool,
}

impl BackendFailure {
    /// The final error as a [`ConductorError::RetryableBackend`] or
    /// [`ConductorError::NonRetryableBackend`].
    pub fn to_error(&self) -> ConductorError {
        let backend = self.backend.clone();
        let source = self.last_error.clone();
        if self.retryable {
            ConductorError::RetryableBackend { backend, source }
        } else {
            ConductorError::NonRetryableBackend { backend, source }
        }
    }
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} attempt(s)): {}",
            self.backend, self.attempts, self.last_error
        )
    }
}
