use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::AddAssign;

use crate::error::{BackendFailure, ConductorError, ConductorResult};

/// Task type used when a task does not name one.
pub const DEFAULT_TASK_TYPE: &str = "default";

/// Caller-chosen identifier of an [`AgentTask`], unique within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&TaskId> for TaskId {
    fn from(id: &TaskId) -> Self {
        id.clone()
    }
}

/// One unit of work submitted to the scheduler.
///
/// Immutable once submitted: the scheduler only ever hands out shared
/// references to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique id within the workflow.
    pub id: TaskId,
    /// Registry key selecting which agent runs this task.
    #[serde(default = "default_task_type")]
    pub task_type: String,
    /// What the agent is asked to do.
    pub description: String,
    /// Free-form context handed through to the agent.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Tasks that must finish before this one becomes ready.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

fn default_task_type() -> String {
    DEFAULT_TASK_TYPE.to_string()
}

impl AgentTask {
    /// Create a task of the default type with no dependencies.
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: default_task_type(),
            description: description.into(),
            context: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set the registry key.
    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Replace the dependency list.
    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Add one context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// An explicit ordering edge: `before` must finish before `after` may start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Predecessor.
    pub before: TaskId,
    /// Successor.
    pub after: TaskId,
}

impl Dependency {
    /// Create an edge `before -> after`.
    pub fn new(before: impl Into<TaskId>, after: impl Into<TaskId>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }
}

/// Provider usage reported by a backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Cost in US dollars, when the backend reports one.
    pub cost_usd: f64,
}

impl Usage {
    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.cost_usd += rhs.cost_usd;
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Self {
        iter.fold(Usage::default(), |mut acc, u| {
            acc += u;
            acc
        })
    }
}

/// Lifecycle state of a task inside one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for predecessors.
    Pending,
    /// All readiness conditions hold; waiting for a worker slot.
    Ready,
    /// Executing on a worker.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Never ran because the composition policy ruled it out.
    Skipped,
    /// Aborted by the workflow deadline or caller cancellation.
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Data-only description of why a task did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// Every backend was exhausted.
    #[error("all providers failed: [{}]", join_failures(failures))]
    AllProvidersFailed {
        /// Last error per attempted backend.
        failures: Vec<BackendFailure>,
        /// Backends skipped as disabled or circuit-open.
        skipped: Vec<String>,
    },
    /// Deadline or caller cancellation.
    #[error("cancelled")]
    Cancelled,
    /// Not executed because of the composition policy.
    #[error("skipped: {reason}")]
    Skipped {
        /// Human-readable reason.
        reason: String,
    },
    /// Any other agent failure.
    #[error("{message}")]
    Agent {
        /// Rendered error message.
        message: String,
    },
}

fn join_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ConductorError> for TaskError {
    fn from(err: ConductorError) -> Self {
        match err {
            ConductorError::AllProvidersFailed { failures, skipped } => {
                TaskError::AllProvidersFailed { failures, skipped }
            }
            ConductorError::Cancelled => TaskError::Cancelled,
            ConductorError::TaskFailed { source, .. } => TaskError::from(*source),
            other => TaskError::Agent {
                message: other.to_string(),
            },
        }
    }
}

/// Outcome of one task. Written once by the worker that ran it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: TaskId,
    /// Terminal status.
    pub status: TaskStatus,
    /// Agent output on success.
    pub output: Option<String>,
    /// Failure description otherwise.
    pub error: Option<TaskError>,
    /// Backend that produced the output, when known.
    #[serde(default)]
    pub backend: Option<String>,
    /// When the worker started the task. `None` if it never ran.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached its terminal state.
    pub finished_at: DateTime<Utc>,
    /// Usage charged to this task.
    #[serde(default)]
    pub usage: Usage,
}

impl TaskResult {
    /// A successful result.
    pub fn succeeded(
        task_id: TaskId,
        output: impl Into<String>,
        usage: Usage,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            status: TaskStatus::Succeeded,
            output: Some(output.into()),
            error: None,
            backend: None,
            started_at: Some(started_at),
            finished_at: Utc::now(),
            usage,
        }
    }

    /// A failed result. Cancellation errors produce a `Cancelled` status.
    pub fn failed(task_id: TaskId, error: TaskError, started_at: Option<DateTime<Utc>>) -> Self {
        let status = if error == TaskError::Cancelled {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        Self {
            task_id,
            status,
            output: None,
            error: Some(error),
            backend: None,
            started_at,
            finished_at: Utc::now(),
            usage: Usage::default(),
        }
    }

    /// A task that never ran because the composition policy ruled it out.
    pub fn skipped(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Skipped,
            output: None,
            error: Some(TaskError::Skipped {
                reason: reason.into(),
            }),
            backend: None,
            started_at: None,
            finished_at: Utc::now(),
            usage: Usage::default(),
        }
    }

    /// A task that never ran because the run was cancelled first.
    pub fn cancelled(task_id: TaskId) -> Self {
        Self::failed(task_id, TaskError::Cancelled, None)
    }

    /// Record which backend served the task.
    pub fn with_backend(mut self, backend: Option<String>) -> Self {
        self.backend = backend;
        self
    }

    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    /// Wall-clock execution time in milliseconds, zero if the task never ran.
    pub fn duration_ms(&self) -> u64 {
        self.started_at
            .map(|s| (self.finished_at - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Convert into a `Result`, wrapping failures as [`ConductorError::TaskFailed`].
    pub fn into_result(self) -> ConductorResult<String> {
        if self.is_success() {
            return Ok(self.output.unwrap_or_default());
        }
        let cause = match self.error {
            Some(TaskError::AllProvidersFailed { failures, skipped }) => {
                ConductorError::AllProvidersFailed { failures, skipped }
            }
            Some(TaskError::Cancelled) => ConductorError::Cancelled,
            Some(other) => ConductorError::Agent(other.to_string()),
            None => ConductorError::Agent(format!("task ended in state {}", self.status)),
        };
        Err(cause.for_task(self.task_id))
    }
}
