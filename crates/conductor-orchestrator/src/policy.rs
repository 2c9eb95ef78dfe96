use conductor_core::{AgentTask, TaskResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a task failure affects the tasks downstream of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionMode {
    /// A task runs only if every predecessor succeeded; otherwise it is
    /// skipped, and so is everything after it.
    Sequential,
    /// Best effort: a task runs once its predecessors have finished, whatever
    /// their outcome. Failures never cancel siblings.
    Parallel,
    /// Like `Sequential`, plus an injected predicate over the predecessor
    /// results must hold.
    Conditional,
}

impl std::fmt::Display for CompositionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositionMode::Sequential => write!(f, "sequential"),
            CompositionMode::Parallel => write!(f, "parallel"),
            CompositionMode::Conditional => write!(f, "conditional"),
        }
    }
}

/// Extra readiness gate for [`CompositionMode::Conditional`].
///
/// Receives the task and the results of its direct predecessors, in
/// submission order. The scheduler never looks inside the decision.
pub trait ReadinessPredicate: Send + Sync {
    /// Whether `task` may start.
    fn is_ready(&self, task: &AgentTask, upstream: &[&TaskResult]) -> bool;
}

impl<F> ReadinessPredicate for F
where
    F: Fn(&AgentTask, &[&TaskResult]) -> bool + Send + Sync,
{
    fn is_ready(&self, task: &AgentTask, upstream: &[&TaskResult]) -> bool {
        self(task, upstream)
    }
}

/// Decides a workflow's overall success from its task results.
pub trait SuccessPolicy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;
    /// Whether the run as a whole succeeded.
    fn determines_success(&self, results: &[TaskResult]) -> bool;
}

/// Every task must succeed. An empty workflow counts as a success.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllSucceeded;

impl SuccessPolicy for AllSucceeded {
    fn name(&self) -> &str {
        "all_succeeded"
    }

    fn determines_success(&self, results: &[TaskResult]) -> bool {
        results.iter().all(TaskResult::is_success)
    }
}

/// At least one task must succeed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnySucceeded;

impl SuccessPolicy for AnySucceeded {
    fn name(&self) -> &str {
        "any_succeeded"
    }

    fn determines_success(&self, results: &[TaskResult]) -> bool {
        results.iter().any(TaskResult::is_success)
    }
}

/// At least `ratio` (0.0 to 1.0) of the tasks must succeed.
#[derive(Debug, Clone, Copy)]
pub struct MinSuccessRatio(pub f64);

impl SuccessPolicy for MinSuccessRatio {
    fn name(&self) -> &str {
        "min_success_ratio"
    }

    fn determines_success(&self, results: &[TaskResult]) -> bool {
        if results.is_empty() {
            return true;
        }
        let ok = results.iter().filter(|r| r.is_success()).count();
        ok as f64 / results.len() as f64 >= self.0
    }
}

/// Caller-supplied rules for one workflow run.
#[derive(Clone)]
pub struct CompositionPolicy {
    /// Continue-or-stop rule applied on task failure.
    pub mode: CompositionMode,
    predicate: Option<Arc<dyn ReadinessPredicate>>,
    success: Arc<dyn SuccessPolicy>,
}

impl CompositionPolicy {
    /// Sequential composition, all tasks must succeed.
    pub fn sequential() -> Self {
        Self {
            mode: CompositionMode::Sequential,
            predicate: None,
            success: Arc::new(AllSucceeded),
        }
    }

    /// Best-effort parallel composition, all tasks must succeed.
    pub fn parallel() -> Self {
        Self {
            mode: CompositionMode::Parallel,
            ..Self::sequential()
        }
    }

    /// Conditional composition gated by `predicate`.
    pub fn conditional<P>(predicate: P) -> Self
    where
        P: ReadinessPredicate + 'static,
    {
        Self {
            mode: CompositionMode::Conditional,
            predicate: Some(Arc::new(predicate)),
            success: Arc::new(AllSucceeded),
        }
    }

    /// Replace the success policy.
    pub fn with_success_policy<S>(mut self, success: S) -> Self
    where
        S: SuccessPolicy + 'static,
    {
        self.success = Arc::new(success);
        self
    }

    /// Readiness predicate, set in conditional mode.
    pub fn predicate(&self) -> Option<&Arc<dyn ReadinessPredicate>> {
        self.predicate.as_ref()
    }

    /// Policy deciding overall success.
    pub fn success_policy(&self) -> &Arc<dyn SuccessPolicy> {
        &self.success
    }

    /// Conditional mode needs a predicate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.mode == CompositionMode::Conditional && self.predicate.is_none() {
            return Err(ValidationError::MissingPredicate);
        }
        Ok(())
    }
}

impl Default for CompositionPolicy {
    fn default() -> Self {
        Self::sequential()
    }
}

impl std::fmt::Debug for CompositionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionPolicy")
            .field("mode", &self.mode)
            .field("predicate", &self.predicate.is_some())
            .field("success", &self.success.name())
            .finish()
    }
}
