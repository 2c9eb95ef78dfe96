use crate::backends::BackendRequest;
use crate::failover::FailoverExecutor;
use async_trait::async_trait;
use conductor_core::{AgentTask, ConductorResult, TaskId, TaskResult, Usage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything an agent may read while running one task.
#[derive(Clone)]
pub struct AgentContext {
    /// Results of the task's direct predecessors, keyed by task id.
    pub upstream: Arc<HashMap<TaskId, TaskResult>>,
    /// Fires when the workflow deadline passes or the caller cancels.
    pub cancel: CancellationToken,
}

impl AgentContext {
    pub fn new(upstream: HashMap<TaskId, TaskResult>, cancel: CancellationToken) -> Self {
        Self {
            upstream: Arc::new(upstream),
            cancel,
        }
    }

    /// Outputs of successful predecessors, in task-id order.
    pub fn upstream_outputs(&self) -> Vec<(&TaskId, &str)> {
        let mut outputs: Vec<(&TaskId, &str)> = self
            .upstream
            .iter()
            .filter_map(|(id, r)| r.output.as_deref().map(|o| (id, o)))
            .collect();
        outputs.sort_by(|a, b| a.0.cmp(b.0));
        outputs
    }
}

/// What an agent produces for a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub output: String,
    pub usage: Usage,
    /// Backend that served the task, if the agent used one.
    pub backend: Option<String>,
}

/// The single capability the scheduler executes: turn a task into output.
///
/// Errors are returned, never panicked; the scheduler records them in the
/// task's result and carries on with the rest of the workflow.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, task: &AgentTask, ctx: &AgentContext) -> ConductorResult<AgentOutput>;
}

/// Default agent: sends the task to a [`FailoverExecutor`].
///
/// The request prompt is the task description; predecessor outputs and the
/// task context travel in the request context for the backend client to
/// render however it likes.
pub struct FailoverAgent {
    executor: Arc<FailoverExecutor>,
}

impl FailoverAgent {
    pub fn new(executor: Arc<FailoverExecutor>) -> Self {
        Self { executor }
    }

    fn build_request(task: &AgentTask, ctx: &AgentContext) -> BackendRequest {
        let mut request = BackendRequest::new(task.description.clone()).for_task(task.id.clone());
        request.context = task.context.clone();
        let upstream: serde_json::Map<String, serde_json::Value> = ctx
            .upstream_outputs()
            .into_iter()
            .map(|(id, out)| (id.to_string(), serde_json::Value::String(out.to_string())))
            .collect();
        if !upstream.is_empty() {
            request
                .context
                .insert("upstream".to_string(), serde_json::Value::Object(upstream));
        }
        request
    }
}

#[async_trait]
impl Agent for FailoverAgent {
    async fn run(&self, task: &AgentTask, ctx: &AgentContext) -> ConductorResult<AgentOutput> {
        let request = Self::build_request(task, ctx);
        let served = self.executor.execute(&request, &ctx.cancel).await?;
        Ok(AgentOutput {
            output: served.response.output,
            usage: served.response.usage,
            backend: Some(served.backend),
        })
    }
}
