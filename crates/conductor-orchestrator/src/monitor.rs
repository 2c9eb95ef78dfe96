use conductor_core::{TaskId, TaskResult, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Coarse status of the agents serving one task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    /// The last finished task of this type failed.
    Error,
}

/// Cumulative counters for one task type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub runs: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

impl AgentMetrics {
    fn record(&mut self, result: &TaskResult) {
        match result.status {
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Skipped => self.skipped += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            _ => {}
        }
        self.duration_ms += result.duration_ms();
        self.tokens_used += result.usage.total_tokens();
        self.cost_usd += result.usage.cost_usd;
    }

    fn merge(&mut self, other: &AgentMetrics) {
        self.runs += other.runs;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.cancelled += other.cancelled;
        self.duration_ms += other.duration_ms;
        self.tokens_used += other.tokens_used;
        self.cost_usd += other.cost_usd;
    }
}

/// Live state for one task type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub task_type: String,
    pub status: WorkerStatus,
    /// Tasks of this type currently on a worker.
    pub in_flight: u32,
    pub last_task: Option<TaskId>,
    pub metrics: AgentMetrics,
}

impl AgentState {
    fn new(task_type: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            status: WorkerStatus::Idle,
            in_flight: 0,
            last_task: None,
            metrics: AgentMetrics::default(),
        }
    }
}

/// Tracks state and metrics for every task type the scheduler has run.
///
/// Process-lifetime: one monitor is shared by all workflow runs of an
/// [`Orchestrator`](crate::Orchestrator).
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mark a task of `task_type` as running.
    pub async fn start_task(&self, task_type: &str, task_id: &TaskId) {
        let mut states = self.states.write().await;
        let state = states
            .entry(task_type.to_string())
            .or_insert_with(|| AgentState::new(task_type));
        state.in_flight += 1;
        state.last_task = Some(task_id.clone());
        state.status = WorkerStatus::Working;
        state.metrics.runs += 1;
    }

    /// Record the terminal result of a task of `task_type`.
    ///
    /// Also used for tasks that never started (skipped, cancelled before
    /// dispatch); those do not touch the in-flight count.
    pub async fn finish_task(&self, task_type: &str, result: &TaskResult) {
        let mut states = self.states.write().await;
        let state = states
            .entry(task_type.to_string())
            .or_insert_with(|| AgentState::new(task_type));
        if result.started_at.is_some() {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        state.metrics.record(result);
        state.status = if state.in_flight > 0 {
            WorkerStatus::Working
        } else if result.status == TaskStatus::Failed {
            WorkerStatus::Error
        } else {
            WorkerStatus::Idle
        };
    }

    /// All task-type states, sorted by task type.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut out: Vec<AgentState> = states.values().cloned().collect();
        out.sort_by(|a, b| a.task_type.cmp(&b.task_type));
        out
    }

    /// State of a specific task type.
    pub async fn get_state(&self, task_type: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(task_type).cloned()
    }

    /// Metrics summed across all task types.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.merge(&state.metrics);
        }
        total
    }

    /// Serialize the current state as JSON for a status endpoint.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_core::{TaskError, Usage};

    fn usage(tokens: u64) -> Usage {
        Usage {
            input_tokens: tokens,
            output_tokens: 0,
            cost_usd: 0.01,
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let monitor = AgentMonitor::new();
        assert!(monitor.snapshot().await.is_empty());
        assert!(monitor.get_state("default").await.is_none());
    }

    #[tokio::test]
    async fn test_start_and_finish_task() {
        let monitor = AgentMonitor::new();
        let id = TaskId::from("t1");

        monitor.start_task("coder", &id).await;
        let state = monitor.get_state("coder").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.in_flight, 1);
        assert_eq!(state.last_task, Some(id.clone()));

        let result = TaskResult::succeeded(id, "done", usage(1500), Utc::now());
        monitor.finish_task("coder", &result).await;
        let state = monitor.get_state("coder").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert_eq!(state.in_flight, 0);
        assert_eq!(state.metrics.runs, 1);
        assert_eq!(state.metrics.succeeded, 1);
        assert_eq!(state.metrics.tokens_used, 1500);
    }

    #[tokio::test]
    async fn test_failure_sets_error_status() {
        let monitor = AgentMonitor::new();
        let id = TaskId::from("t1");
        monitor.start_task("tester", &id).await;
        let result = TaskResult::failed(
            id,
            TaskError::Agent {
                message: "boom".into(),
            },
            Some(Utc::now()),
        );
        monitor.finish_task("tester", &result).await;

        let state = monitor.get_state("tester").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Error);
        assert_eq!(state.metrics.failed, 1);
    }

    #[tokio::test]
    async fn test_skipped_task_does_not_touch_in_flight() {
        let monitor = AgentMonitor::new();
        monitor.start_task("coder", &"a".into()).await;
        monitor
            .finish_task("coder", &TaskResult::skipped("b".into(), "upstream failed"))
            .await;

        let state = monitor.get_state("coder").await.unwrap();
        assert_eq!(state.in_flight, 1);
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.metrics.skipped, 1);
        assert_eq!(state.metrics.runs, 1);
    }

    #[tokio::test]
    async fn test_aggregate_metrics() {
        let monitor = AgentMonitor::new();
        for (task_type, id, tokens) in [("coder", "a", 1000), ("tester", "b", 500)] {
            monitor.start_task(task_type, &id.into()).await;
            let result = TaskResult::succeeded(id.into(), "ok", usage(tokens), Utc::now());
            monitor.finish_task(task_type, &result).await;
        }
        monitor
            .finish_task("tester", &TaskResult::cancelled("c".into()))
            .await;

        let agg = monitor.aggregate_metrics().await;
        assert_eq!(agg.runs, 2);
        assert_eq!(agg.succeeded, 2);
        assert_eq!(agg.cancelled, 1);
        assert_eq!(agg.tokens_used, 1500);
        assert!((agg.cost_usd - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_to_json() {
        let monitor = AgentMonitor::new();
        monitor.start_task("design", &"s".into()).await;
        let json = monitor.to_json().await;
        assert!(json["agents"].is_array());
        assert_eq!(json["agents"][0]["task_type"], "design");
        assert!(json["aggregate"].is_object());
    }
}
