//! Workflow orchestration for Conductor.
//!
//! Validates a set of agent tasks and their dependency edges into a
//! [`WorkflowGraph`], runs it batch by batch on a bounded worker pool under a
//! caller-chosen [`CompositionPolicy`], and folds the per-task results into an
//! [`AggregateResult`].
//!
//! # Main types
//!
//! - [`Orchestrator`] — Entry point: `submit_workflow(tasks, edges, policy, deadline)`.
//! - [`WorkflowGraph`] — Task arena with cycle detection and level batches.
//! - [`WorkflowScheduler`] — Batch-barrier executor over the agent registry.
//! - [`ResultAggregator`] — Usage totals, success policy, merged output.
//! - [`AgentMonitor`] — Per-task-type metrics across runs.
//! - [`OrchestratorConfig`] — TOML configuration.

/// Result aggregation and output merging.
pub mod aggregator;
/// TOML configuration.
pub mod config;
/// The `Orchestrator` entry point.
pub mod engine;
/// Dependency graph and topological batching.
pub mod graph;
/// Per-task-type metrics.
pub mod monitor;
/// Composition, readiness, and success policies.
pub mod policy;
/// Batch scheduler and worker pool.
pub mod scheduler;

pub use aggregator::{AggregateResult, ConcatMerger, OutputMerger, ResultAggregator};
pub use config::{AgentBinding, OrchestratorConfig};
pub use engine::Orchestrator;
pub use graph::WorkflowGraph;
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use policy::{
    AllSucceeded, AnySucceeded, CompositionMode, CompositionPolicy, MinSuccessRatio,
    ReadinessPredicate, SuccessPolicy,
};
pub use scheduler::{WorkflowScheduler, DEFAULT_POOL_SIZE};
