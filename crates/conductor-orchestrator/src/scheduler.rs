use crate::aggregator::{AggregateResult, ConcatMerger, OutputMerger, ResultAggregator};
use crate::graph::WorkflowGraph;
use crate::monitor::AgentMonitor;
use crate::policy::{CompositionMode, CompositionPolicy};
use chrono::Utc;
use conductor_agent::{Agent, AgentContext, AgentRegistry};
use conductor_core::{AgentTask, ConductorError, TaskError, TaskId, TaskResult, TaskStatus};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Worker pool size used when none is configured.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Runs a [`WorkflowGraph`] batch by batch on a bounded worker pool.
///
/// Every task of a batch is spawned into a [`JoinSet`] and waits for a pool
/// slot; the scheduler then waits for the whole batch (barrier) before
/// evaluating the next one, so later tasks always see finished predecessors.
/// Task failures are recorded as data and never abort the run. Dropping the
/// run future aborts its workers.
pub struct WorkflowScheduler {
    registry: Arc<AgentRegistry>,
    monitor: Arc<AgentMonitor>,
    merger: Arc<dyn OutputMerger>,
    pool_size: usize,
}

impl WorkflowScheduler {
    /// Create a scheduler with `pool_size` workers (at least one).
    pub fn new(registry: Arc<AgentRegistry>, pool_size: usize) -> Self {
        Self {
            registry,
            monitor: Arc::new(AgentMonitor::new()),
            merger: Arc::new(ConcatMerger::default()),
            pool_size: pool_size.max(1),
        }
    }

    /// Share an existing monitor.
    pub fn with_monitor(mut self, monitor: Arc<AgentMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Replace the output merger used when aggregating.
    pub fn with_merger(mut self, merger: Arc<dyn OutputMerger>) -> Self {
        self.merger = merger;
        self
    }

    /// Number of workers.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Per-task-type metrics.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// Agents the scheduler resolves tasks against.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Run every task in `graph` under `policy` and aggregate the results.
    ///
    /// Once `cancel` fires, in-flight tasks are aborted and tasks that have
    /// not started are reported as `Cancelled`. A conditional policy without
    /// a predicate behaves like a sequential one; [`Orchestrator`](crate::Orchestrator)
    /// rejects it before getting here.
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        policy: &CompositionPolicy,
        cancel: &CancellationToken,
    ) -> AggregateResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            tasks = graph.len(),
            mode = %policy.mode,
            pool_size = self.pool_size,
            "Workflow run starting"
        );

        let results = self.execute(run_id, graph, policy, cancel).await;

        let aggregate = ResultAggregator::new(policy.success_policy().clone())
            .with_merger(self.merger.clone())
            .aggregate_run(run_id, started_at, results);
        info!(
            %run_id,
            success = aggregate.overall_success,
            duration_ms = aggregate.duration_ms,
            summary = %aggregate.summary,
            "Workflow run complete"
        );
        aggregate
    }

    /// Execute all batches and return the results in batch order.
    async fn execute(
        &self,
        run_id: Uuid,
        graph: &WorkflowGraph,
        policy: &CompositionPolicy,
        cancel: &CancellationToken,
    ) -> Vec<TaskResult> {
        let pool = Arc::new(Semaphore::new(self.pool_size));
        let mut results: HashMap<TaskId, TaskResult> = HashMap::with_capacity(graph.len());
        let mut order: Vec<TaskId> = Vec::with_capacity(graph.len());

        for (index, batch) in graph.topological_batches().into_iter().enumerate() {
            let batch_started = Utc::now();
            let mut dispatched: HashMap<TaskId, String> = HashMap::new();
            let mut workers: JoinSet<(TaskId, Option<TaskResult>)> = JoinSet::new();

            for id in batch {
                let Some(task) = graph.task(&id) else {
                    continue;
                };
                order.push(id.clone());

                if cancel.is_cancelled() {
                    self.record_unstarted(run_id, task, TaskResult::cancelled(id), &mut results)
                        .await;
                    continue;
                }

                let upstream: Vec<&TaskResult> = graph
                    .predecessors(&id)
                    .into_iter()
                    .filter_map(|p| results.get(p))
                    .collect();
                if let Err(reason) = check_ready(task, &upstream, policy) {
                    let skipped = TaskResult::skipped(id, reason);
                    self.record_unstarted(run_id, task, skipped, &mut results).await;
                    continue;
                }

                let agent = match self.registry.resolve(task) {
                    Ok(agent) => agent,
                    Err(e) => {
                        let failed = TaskResult::failed(id, TaskError::from(e), None);
                        self.record_unstarted(run_id, task, failed, &mut results).await;
                        continue;
                    }
                };

                let upstream: HashMap<TaskId, TaskResult> = upstream
                    .into_iter()
                    .map(|r| (r.task_id.clone(), r.clone()))
                    .collect();
                let ctx = AgentContext::new(upstream, cancel.clone());
                debug!(%run_id, task_id = %id, task_type = %task.task_type, "Task ready");

                dispatched.insert(id.clone(), task.task_type.clone());
                let worker = run_task(agent, task.clone(), ctx, pool.clone(), self.monitor.clone());
                workers.spawn(async move {
                    // A panicking agent yields `None`.
                    let result = AssertUnwindSafe(worker).catch_unwind().await.ok();
                    (id, result)
                });
            }

            if workers.is_empty() {
                continue;
            }
            info!(%run_id, batch = index, tasks = workers.len(), "Dispatched batch");

            // Barrier: every worker in this batch finishes before the next one starts.
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok((id, Some(result))) => {
                        dispatched.remove(&id);
                        log_result(run_id, &result);
                        results.insert(id, result);
                    }
                    Ok((_, None)) => {}
                    Err(e) => warn!(%run_id, error = %e, "Worker join failed"),
                }
            }
            for (id, task_type) in dispatched {
                let result = TaskResult::failed(
                    id.clone(),
                    TaskError::Agent {
                        message: "worker terminated".to_string(),
                    },
                    Some(batch_started),
                );
                self.monitor.finish_task(&task_type, &result).await;
                log_result(run_id, &result);
                results.insert(id, result);
            }
        }

        order
            .into_iter()
            .filter_map(|id| results.remove(&id))
            .collect()
    }

    async fn record_unstarted(
        &self,
        run_id: Uuid,
        task: &AgentTask,
        result: TaskResult,
        results: &mut HashMap<TaskId, TaskResult>,
    ) {
        self.monitor.finish_task(&task.task_type, &result).await;
        log_result(run_id, &result);
        results.insert(task.id.clone(), result);
    }
}

/// Readiness rule for one task given its predecessors' results.
fn check_ready(
    task: &AgentTask,
    upstream: &[&TaskResult],
    policy: &CompositionPolicy,
) -> Result<(), String> {
    if policy.mode == CompositionMode::Parallel {
        return Ok(());
    }
    if let Some(blocked) = upstream.iter().find(|r| !r.is_success()) {
        return Err(format!("upstream task '{}' {}", blocked.task_id, blocked.status));
    }
    if policy.mode == CompositionMode::Conditional {
        if let Some(predicate) = policy.predicate() {
            if !predicate.is_ready(task, upstream) {
                return Err("condition not met".to_string());
            }
        }
    }
    Ok(())
}

/// Worker body: wait for a pool slot, run the agent, record the result.
async fn run_task(
    agent: Arc<dyn Agent>,
    task: AgentTask,
    ctx: AgentContext,
    pool: Arc<Semaphore>,
    monitor: Arc<AgentMonitor>,
) -> TaskResult {
    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => TaskResult::cancelled(task.id.clone()),
        permit = pool.acquire_owned() => match permit {
            Ok(_permit) => {
                let started_at = Utc::now();
                monitor.start_task(&task.task_type, &task.id).await;
                let outcome = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Err(ConductorError::Cancelled),
                    out = agent.run(&task, &ctx) => out,
                };
                match outcome {
                    Ok(out) => TaskResult::succeeded(task.id.clone(), out.output, out.usage, started_at)
                        .with_backend(out.backend),
                    Err(e) => TaskResult::failed(task.id.clone(), TaskError::from(e), Some(started_at)),
                }
            }
            Err(_) => TaskResult::failed(
                task.id.clone(),
                TaskError::Agent {
                    message: "worker pool closed".to_string(),
                },
                None,
            ),
        },
    };
    monitor.finish_task(&task.task_type, &result).await;
    result
}

fn log_result(run_id: Uuid, result: &TaskResult) {
    let task_id = &result.task_id;
    match result.status {
        TaskStatus::Succeeded => info!(
            %run_id,
            %task_id,
            backend = result.backend.as_deref().unwrap_or("-"),
            duration_ms = result.duration_ms(),
            "Task succeeded"
        ),
        TaskStatus::Failed => {
            let reason = result.error.as_ref().map(ToString::to_string).unwrap_or_default();
            error!(%run_id, %task_id, error = %reason, "Task failed");
        }
        TaskStatus::Skipped => {
            let reason = result.error.as_ref().map(ToString::to_string).unwrap_or_default();
            warn!(%run_id, %task_id, %reason, "Task skipped");
        }
        TaskStatus::Cancelled => warn!(%run_id, %task_id, "Task cancelled"),
        status => debug!(%run_id, %task_id, %status, "Task in non-terminal state"),
    }
}
