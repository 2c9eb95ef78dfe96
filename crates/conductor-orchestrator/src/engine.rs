use crate::aggregator::AggregateResult;
use crate::config::OrchestratorConfig;
use crate::graph::WorkflowGraph;
use crate::monitor::AgentMonitor;
use crate::policy::CompositionPolicy;
use crate::scheduler::WorkflowScheduler;
use conductor_agent::{
    AgentRegistry, Backend, BackendInvoker, CircuitBreakerRegistry, FailoverAgent,
    FailoverExecutor,
};
use conductor_core::{AgentTask, ConductorError, ConductorResult, Dependency};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The workflow engine: validate, schedule, aggregate.
///
/// Holds the process-lifetime pieces (agent registry, circuit breakers,
/// monitor) and builds a fresh [`WorkflowGraph`] for every submission.
pub struct Orchestrator {
    scheduler: WorkflowScheduler,
    breakers: Arc<CircuitBreakerRegistry>,
    default_deadline: Option<Duration>,
}

impl Orchestrator {
    /// Create an orchestrator over a ready-made registry.
    pub fn new(registry: AgentRegistry, pool_size: usize) -> Self {
        Self {
            scheduler: WorkflowScheduler::new(Arc::new(registry), pool_size),
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            default_deadline: None,
        }
    }

    /// Build from configuration. `invokers` supplies the client for each
    /// configured backend, keyed by backend name.
    ///
    /// Every binding in [`OrchestratorConfig::effective_agents`] becomes a
    /// [`FailoverAgent`] registered under its task type; all of them share
    /// one circuit breaker per backend.
    pub fn from_config(
        config: &OrchestratorConfig,
        invokers: HashMap<String, Arc<dyn BackendInvoker>>,
    ) -> ConductorResult<Self> {
        config.validate()?;

        let mut backends: HashMap<&str, Backend> = HashMap::new();
        for descriptor in &config.backends {
            let invoker = invokers.get(&descriptor.name).cloned().ok_or_else(|| {
                ConductorError::Config(format!(
                    "No invoker supplied for backend '{}'",
                    descriptor.name
                ))
            })?;
            backends.insert(
                descriptor.name.as_str(),
                Backend::new(descriptor.clone(), invoker),
            );
        }

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker));
        let mut registry = AgentRegistry::new();
        for binding in config.effective_agents() {
            let selected: Vec<Backend> = if binding.backends.is_empty() {
                config
                    .backends
                    .iter()
                    .filter_map(|d| backends.get(d.name.as_str()).cloned())
                    .collect()
            } else {
                binding
                    .backends
                    .iter()
                    .filter_map(|name| backends.get(name.as_str()).cloned())
                    .collect()
            };
            info!(
                task_type = %binding.task_type,
                backends = selected.len(),
                "Registering failover agent"
            );
            let executor =
                FailoverExecutor::new(selected, breakers.clone(), config.retry.clone());
            registry.register_agent(
                binding.task_type,
                Arc::new(FailoverAgent::new(Arc::new(executor))),
            );
        }

        Ok(Self {
            scheduler: WorkflowScheduler::new(Arc::new(registry), config.pool_size),
            breakers,
            default_deadline: config.deadline(),
        })
    }

    /// Deadline applied when [`submit_workflow`](Self::submit_workflow) gets none.
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    /// Replace the scheduler, e.g. to install a custom output merger.
    pub fn with_scheduler(mut self, scheduler: WorkflowScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Per-task-type metrics across all runs.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        self.scheduler.monitor()
    }

    /// Circuit breakers shared by the configured agents.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Registered agents by task type.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        self.scheduler.registry()
    }

    /// Validate and run a workflow.
    ///
    /// Returns a validation error (and runs nothing) if the graph has a
    /// cycle, an unknown dependency, a duplicate id, or a task type with no
    /// registered agent. Otherwise always returns an [`AggregateResult`],
    /// however many tasks failed. When `deadline` (or the configured default)
    /// passes, remaining work is cancelled.
    pub async fn submit_workflow(
        &self,
        tasks: Vec<AgentTask>,
        edges: &[Dependency],
        policy: CompositionPolicy,
        deadline: Option<Duration>,
    ) -> ConductorResult<AggregateResult> {
        self.submit_workflow_with_cancel(tasks, edges, policy, deadline, CancellationToken::new())
            .await
    }

    /// Like [`submit_workflow`](Self::submit_workflow), also stopping when
    /// `cancel` fires.
    ///
    /// The run observes a child of `cancel`: the deadline cancels only this
    /// run, never the caller's token.
    pub async fn submit_workflow_with_cancel(
        &self,
        tasks: Vec<AgentTask>,
        edges: &[Dependency],
        policy: CompositionPolicy,
        deadline: Option<Duration>,
        cancel: CancellationToken,
    ) -> ConductorResult<AggregateResult> {
        policy.validate()?;
        let graph = WorkflowGraph::build(tasks, edges)?;
        self.registry().validate(graph.tasks())?;

        let run_cancel = cancel.child_token();
        // Also fires when this future is dropped, which stops the watchdog.
        let _run_guard = run_cancel.clone().drop_guard();

        if let Some(limit) = deadline.or(self.default_deadline) {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        warn!(
                            deadline_ms = limit.as_millis() as u64,
                            "Workflow deadline reached, cancelling"
                        );
                        token.cancel();
                    }
                }
            });
        }

        Ok(self.scheduler.run(&graph, &policy, &run_cancel).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_agent::{BackendDescriptor, BackendRequest, BackendResponse};
    use conductor_core::{BackendError, TaskStatus, ValidationError};

    struct Echo;

    #[async_trait::async_trait]
    impl BackendInvoker for Echo {
        async fn invoke(
            &self,
            request: &BackendRequest,
            _timeout: Duration,
        ) -> Result<BackendResponse, BackendError> {
            Ok(BackendResponse::text(request.prompt.clone()))
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl BackendInvoker for Slow {
        async fn invoke(
            &self,
            request: &BackendRequest,
            _timeout: Duration,
        ) -> Result<BackendResponse, BackendError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(BackendResponse::text(request.prompt.clone()))
        }
    }

    fn echo_invokers(names: &[&str]) -> HashMap<String, Arc<dyn BackendInvoker>> {
        names
            .iter()
            .map(|n| (n.to_string(), Arc::new(Echo) as Arc<dyn BackendInvoker>))
            .collect()
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            backends: vec![BackendDescriptor::new("primary", 1)],
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config_registers_default_agent() {
        let orch = Orchestrator::from_config(&config(), echo_invokers(&["primary"])).unwrap();
        assert_eq!(orch.registry().task_types(), vec!["default"]);
        assert_eq!(orch.scheduler.pool_size(), 4);
    }

    #[test]
    fn test_from_config_requires_every_invoker() {
        let err = Orchestrator::from_config(&config(), HashMap::new()).err().unwrap();
        assert!(matches!(err, ConductorError::Config(ref m) if m.contains("primary")));
    }

    #[tokio::test]
    async fn test_validation_happens_before_execution() {
        let orch = Orchestrator::from_config(&config(), echo_invokers(&["primary"])).unwrap();

        let err = orch
            .submit_workflow(
                vec![AgentTask::new("a", "x").with_type("translate")],
                &[],
                CompositionPolicy::parallel(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConductorError::Validation(ValidationError::UnknownTaskType { .. })
        ));

        let mut policy = CompositionPolicy::parallel();
        policy.mode = crate::policy::CompositionMode::Conditional;
        let err = orch
            .submit_workflow(vec![AgentTask::new("a", "x")], &[], policy, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConductorError::Validation(ValidationError::MissingPredicate)
        ));
        assert!(orch.monitor().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_runs_workflow() {
        let orch = Orchestrator::from_config(&config(), echo_invokers(&["primary"])).unwrap();
        let agg = orch
            .submit_workflow(
                vec![AgentTask::new("a", "first"), AgentTask::new("b", "second")],
                &[Dependency::new("a", "b")],
                CompositionPolicy::sequential(),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert!(agg.overall_success);
        assert_eq!(agg.combined_output, "first\n\n---\n\nsecond");
        assert_eq!(agg.status(&"b".into()), Some(TaskStatus::Succeeded));
        assert_eq!(agg.results[0].backend.as_deref(), Some("primary"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_leaves_caller_token_live() {
        let invokers: HashMap<String, Arc<dyn BackendInvoker>> =
            HashMap::from([("primary".to_string(), Arc::new(Slow) as Arc<dyn BackendInvoker>)]);
        let orch = Orchestrator::from_config(&config(), invokers).unwrap();
        let caller = CancellationToken::new();

        let agg = orch
            .submit_workflow_with_cancel(
                vec![AgentTask::new("a", "slow")],
                &[],
                CompositionPolicy::parallel(),
                Some(Duration::from_millis(10)),
                caller.clone(),
            )
            .await
            .unwrap();

        assert_eq!(agg.status(&"a".into()), Some(TaskStatus::Cancelled));
        assert!(!caller.is_cancelled());

        // The same token still drives a later run to completion.
        let agg = orch
            .submit_workflow_with_cancel(
                vec![AgentTask::new("b", "slow")],
                &[],
                CompositionPolicy::parallel(),
                None,
                caller.clone(),
            )
            .await
            .unwrap();
        assert_eq!(agg.status(&"b".into()), Some(TaskStatus::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancel_reaches_the_run() {
        let invokers: HashMap<String, Arc<dyn BackendInvoker>> =
            HashMap::from([("primary".to_string(), Arc::new(Slow) as Arc<dyn BackendInvoker>)]);
        let orch = Orchestrator::from_config(&config(), invokers).unwrap();
        let caller = CancellationToken::new();
        let trigger = caller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let agg = orch
            .submit_workflow_with_cancel(
                vec![AgentTask::new("a", "slow")],
                &[],
                CompositionPolicy::parallel(),
                None,
                caller,
            )
            .await
            .unwrap();
        assert_eq!(agg.status(&"a".into()), Some(TaskStatus::Cancelled));
    }
}
