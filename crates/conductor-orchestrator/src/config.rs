//! Orchestrator configuration.
//!
//! Loaded from a `conductor.toml` file (or any TOML string). Every section is
//! optional; missing values fall back to the defaults below.

use crate::scheduler::DEFAULT_POOL_SIZE;
use conductor_agent::{BackendDescriptor, CircuitBreakerConfig, RetryPolicy};
use conductor_core::{ConductorError, ConductorResult, ValidationError, DEFAULT_TASK_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Binds a task-type key to an ordered subset of the configured backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBinding {
    /// Task-type key the agent is registered under.
    pub task_type: String,
    /// Backend names. Empty means every configured backend.
    #[serde(default)]
    pub backends: Vec<String>,
}

impl AgentBinding {
    /// Bind `task_type` to the named backends.
    pub fn new<I, S>(task_type: impl Into<String>, backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task_type: task_type.into(),
            backends: backends.into_iter().map(Into::into).collect(),
        }
    }
}

/// Everything needed to build an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Worker pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Default workflow deadline when the caller gives none.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub backends: Vec<BackendDescriptor>,
    /// Task-type bindings. Without any, a single `default` agent uses every
    /// backend.
    #[serde(default)]
    pub agents: Vec<AgentBinding>,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            deadline_ms: None,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            backends: Vec::new(),
            agents: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConductorResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ConductorError::Config(format!("Failed to parse config '{}': {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Default deadline, if configured.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Agent bindings to register. Falls back to one `default` binding over
    /// every backend when none are configured.
    pub fn effective_agents(&self) -> Vec<AgentBinding> {
        if self.agents.is_empty() {
            vec![AgentBinding::new(DEFAULT_TASK_TYPE, Vec::<String>::new())]
        } else {
            self.agents.clone()
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: String| Err(ValidationError::InvalidConfig(msg));

        if self.pool_size == 0 {
            return invalid("pool_size must be at least 1".into());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold must be at least 1".into());
        }
        if self.circuit_breaker.success_threshold == 0 {
            return invalid("circuit_breaker.success_threshold must be at least 1".into());
        }
        if self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            return invalid("retry.backoff_max_ms must not be below retry.backoff_base_ms".into());
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                return invalid("backend name must not be empty".into());
            }
            if !names.insert(backend.name.as_str()) {
                return invalid(format!("duplicate backend '{}'", backend.name));
            }
            if backend.timeout_ms == 0 {
                return invalid(format!("backend '{}' has a zero timeout", backend.name));
            }
        }

        let mut task_types = HashSet::new();
        for binding in &self.agents {
            if !task_types.insert(binding.task_type.as_str()) {
                return invalid(format!("duplicate agent binding '{}'", binding.task_type));
            }
            for name in &binding.backends {
                if !names.contains(name.as_str()) {
                    return invalid(format!(
                        "agent '{}' references unknown backend '{}'",
                        binding.task_type, name
                    ));
                }
            }
        }
        Ok(())
    }
}
