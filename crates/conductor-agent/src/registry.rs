use crate::agent::Agent;
use conductor_core::{AgentTask, ConductorResult, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the agent that runs a given task.
pub type AgentFactory = Arc<dyn Fn(&AgentTask) -> Arc<dyn Agent> + Send + Sync>;

/// Maps task-type keys to agent factories.
///
/// Populated once at startup (see `Orchestrator::from_config`); the scheduler
/// only ever asks it to [`resolve`](Self::resolve) a task and never looks at
/// task identity itself.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    factories: HashMap<String, AgentFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `task_type`, replacing any previous one.
    pub fn register<F>(&mut self, task_type: impl Into<String>, factory: F)
    where
        F: Fn(&AgentTask) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        self.factories.insert(task_type.into(), Arc::new(factory));
    }

    /// Register one shared agent instance for every task of `task_type`.
    pub fn register_agent(&mut self, task_type: impl Into<String>, agent: Arc<dyn Agent>) {
        self.register(task_type, move |_| agent.clone());
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Build the agent for `task`.
    pub fn resolve(&self, task: &AgentTask) -> ConductorResult<Arc<dyn Agent>> {
        let factory = self.factories.get(&task.task_type).ok_or_else(|| {
            ValidationError::UnknownTaskType {
                task: task.id.clone(),
                task_type: task.task_type.clone(),
            }
        })?;
        Ok(factory(task))
    }

    /// Check that every task has a registered type, before anything runs.
    pub fn validate<'a>(&self, tasks: impl IntoIterator<Item = &'a AgentTask>) -> ConductorResult<()> {
        for task in tasks {
            if !self.contains(&task.task_type) {
                return Err(ValidationError::UnknownTaskType {
                    task: task.id.clone(),
                    task_type: task.task_type.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}
