//! Core types and error definitions for the Conductor workflow engine.
//!
//! This crate provides the data model shared by the failover layer and the
//! scheduler: tasks, dependency edges, per-task results, usage accounting, and
//! the error taxonomy.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`ValidationError`] — Fatal problems with a submitted workflow.
//! - [`BackendError`] — Error returned by a single backend invocation.
//! - [`AgentTask`] — One unit of work with its dependency edges.
//! - [`TaskResult`] — Write-once outcome of a task.

/// Error taxonomy.
pub mod error;
/// Task, result, and usage types.
pub mod task;
/// `tracing-subscriber` initialisation helpers.
pub mod telemetry;

pub use error::{BackendError, BackendFailure, ConductorError, ConductorResult, ValidationError};
pub use task::{
    AgentTask, Dependency, TaskError, TaskId, TaskResult, TaskStatus, Usage, DEFAULT_TASK_TYPE,
};
