use crate::policy::{AllSucceeded, SuccessPolicy};
use chrono::{DateTime, Utc};
use conductor_core::{TaskId, TaskResult, TaskStatus, Usage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Separator placed between task outputs by [`ConcatMerger::default`].
pub const DEFAULT_SEPARATOR: &str = "\n\n---\n\n";

/// Combines the outputs of successful tasks into one presentation string.
///
/// Consensus or conflict detection across agent outputs plugs in here.
pub trait OutputMerger: Send + Sync {
    /// Merge outputs. `results` is in execution order and includes failures.
    fn merge(&self, results: &[TaskResult]) -> String;
}

/// Joins successful outputs with a separator.
#[derive(Debug, Clone)]
pub struct ConcatMerger {
    pub separator: String,
}

impl ConcatMerger {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl Default for ConcatMerger {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl OutputMerger for ConcatMerger {
    fn merge(&self, results: &[TaskResult]) -> String {
        results
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.output.as_deref())
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

/// Combined outcome of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub run_id: Uuid,
    /// Every task's result, in batch order.
    pub results: Vec<TaskResult>,
    /// Usage summed across all tasks.
    pub usage: Usage,
    pub overall_success: bool,
    pub failed_tasks: Vec<TaskId>,
    pub skipped_tasks: Vec<TaskId>,
    pub cancelled_tasks: Vec<TaskId>,
    pub combined_output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// One-line human-readable summary.
    pub summary: String,
}

impl AggregateResult {
    /// Result of a given task.
    pub fn result(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.task_id == id)
    }

    /// Status of a given task.
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.result(id).map(|r| r.status)
    }

    /// Number of tasks that succeeded.
    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}

/// Folds per-task results into an [`AggregateResult`].
#[derive(Clone)]
pub struct ResultAggregator {
    success: Arc<dyn SuccessPolicy>,
    merger: Arc<dyn OutputMerger>,
}

impl ResultAggregator {
    pub fn new(success: Arc<dyn SuccessPolicy>) -> Self {
        Self {
            success,
            merger: Arc::new(ConcatMerger::default()),
        }
    }

    /// Replace the output merger.
    pub fn with_merger(mut self, merger: Arc<dyn OutputMerger>) -> Self {
        self.merger = merger;
        self
    }

    /// Aggregate `results` under a fresh run id. The run window spans the
    /// earliest start and latest finish among the results.
    pub fn aggregate(&self, results: Vec<TaskResult>) -> AggregateResult {
        let started_at = results
            .iter()
            .filter_map(|r| r.started_at)
            .chain(results.iter().map(|r| r.finished_at))
            .min()
            .unwrap_or_else(Utc::now);
        self.aggregate_run(Uuid::new_v4(), started_at, results)
    }

    /// Aggregate the results of run `run_id`, which started at `started_at`.
    pub fn aggregate_run(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        results: Vec<TaskResult>,
    ) -> AggregateResult {
        let finished_at = results
            .iter()
            .map(|r| r.finished_at)
            .max()
            .unwrap_or(started_at)
            .max(started_at);
        let usage: Usage = results.iter().map(|r| r.usage).sum();
        let ids_with = |status: TaskStatus| -> Vec<TaskId> {
            results
                .iter()
                .filter(|r| r.status == status)
                .map(|r| r.task_id.clone())
                .collect()
        };
        let failed_tasks = ids_with(TaskStatus::Failed);
        let skipped_tasks = ids_with(TaskStatus::Skipped);
        let cancelled_tasks = ids_with(TaskStatus::Cancelled);
        let overall_success = self.success.determines_success(&results);
        let combined_output = self.merger.merge(&results);
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let summary = format!(
            "{}/{} tasks succeeded, {} failed, {} skipped, {} cancelled ({} tokens, {}ms, {})",
            succeeded,
            results.len(),
            failed_tasks.len(),
            skipped_tasks.len(),
            cancelled_tasks.len(),
            usage.total_tokens(),
            duration_ms,
            if overall_success { "success" } else { "failure" },
        );

        AggregateResult {
            run_id,
            results,
            usage,
            overall_success,
            failed_tasks,
            skipped_tasks,
            cancelled_tasks,
            combined_output,
            started_at,
            finished_at,
            duration_ms,
            summary,
        }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(Arc::new(AllSucceeded))
    }
}
