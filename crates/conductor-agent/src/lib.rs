//! Provider resilience for Conductor: backend failover, retry with
//! exponential backoff, per-backend circuit breakers, and the agent
//! capability the scheduler runs.
//!
//! # Main types
//!
//! - [`BackendInvoker`] — One external backend, supplied by the caller.
//! - [`CircuitBreaker`] — Per-backend `Closed`/`Open`/`HalfOpen` state machine.
//! - [`FailoverExecutor`] — Priority-ordered failover with retries.
//! - [`Agent`] — `AgentTask -> output` capability executed by the scheduler.
//! - [`AgentRegistry`] — Task-type key to agent factory mapping.

pub mod agent;
pub mod backends;
pub mod circuit_breaker;
pub mod config;
pub mod failover;
pub mod registry;

pub use agent::{Agent, AgentContext, AgentOutput, FailoverAgent};
pub use backends::{BackendInvoker, BackendRequest, BackendResponse};
pub use circuit_breaker::{
    BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
};
pub use config::{BackendDescriptor, CircuitBreakerConfig};
pub use failover::{
    is_retryable, Backend, DefaultClassifier, ErrorClass, ErrorClassifier, FailoverExecutor,
    RetryDecision, RetryPolicy, RetryState, Served,
};
pub use registry::{AgentFactory, AgentRegistry};
