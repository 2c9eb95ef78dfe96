use async_trait::async_trait;
use conductor_core::{BackendError, TaskId, Usage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Payload handed to a backend for one call.
///
/// The prompt format is owned by whoever builds the request; the failover
/// layer passes it through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Task the call is made for, if any (used for logging).
    pub task_id: Option<TaskId>,
    pub prompt: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl BackendRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            task_id: None,
            prompt: prompt.into(),
            context: HashMap::new(),
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

/// What a backend returns on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub output: String,
    #[serde(default)]
    pub usage: Usage,
}

impl BackendResponse {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            usage: Usage::default(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Capability wrapping one external backend (e.g. one LLM provider).
///
/// Network clients live outside this crate; the failover layer only needs
/// this single call. Implementations should honour `timeout`, but the caller
/// also enforces it and drops the future when it elapses or the workflow is
/// cancelled, so the call must be cancel-safe.
#[async_trait]
pub trait BackendInvoker: Send + Sync {
    async fn invoke(
        &self,
        request: &BackendRequest,
        timeout: Duration,
    ) -> Result<BackendResponse, BackendError>;
}
