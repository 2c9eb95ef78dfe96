use crate::config::CircuitBreakerConfig;
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Health state of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the open timeout elapses.
    Open,
    /// A single trial call at a time is admitted.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.successes = 0;
        self.trial_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.successes = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }
}

/// Per-backend circuit breaker.
///
/// All state lives behind one mutex and only changes through
/// [`try_acquire`](Self::try_acquire) and the [`CallPermit`] it returns.
pub struct CircuitBreaker {
    backend: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Ask permission to make one call.
    ///
    /// `Open` moves to `HalfOpen` once the open timeout has elapsed; in
    /// `HalfOpen` only one trial call may be outstanding at a time.
    pub fn try_acquire(&self) -> ConductorResult<CallPermit<'_>> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_timeout())
                    .unwrap_or(true);
                if !cooled_down {
                    return Err(self.rejected());
                }
                info!(backend = %self.backend, "Circuit half-open, admitting trial call");
                inner.state = CircuitState::HalfOpen;
                inner.successes = 0;
                inner.trial_in_flight = true;
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.rejected());
                }
                inner.trial_in_flight = true;
            }
        }
        Ok(CallPermit {
            breaker: self,
            settled: false,
        })
    }

    /// State as of the last transition. An `Open` circuit whose timeout has
    /// elapsed still reports `Open` until the next call is admitted.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        inner.state
    }

    /// Whether a call would currently be rejected outright.
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => inner
                .opened_at
                .map(|at| at.elapsed() < self.config.open_timeout())
                .unwrap_or(false),
            CircuitState::HalfOpen => inner.trial_in_flight,
            CircuitState::Closed => false,
        }
    }

    /// Consecutive failures counted while `Closed`.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            backend: self.backend.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
        }
    }

    fn rejected(&self) -> ConductorError {
        ConductorError::CircuitOpen {
            backend: self.backend.clone(),
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.successes += 1;
                debug!(
                    backend = %self.backend,
                    successes = inner.successes,
                    "Trial call succeeded"
                );
                if inner.successes >= self.config.success_threshold {
                    info!(backend = %self.backend, "Circuit closed");
                    inner.close();
                }
            }
            // A call admitted before the circuit tripped; the trip stands.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    warn!(
                        backend = %self.backend,
                        failures = inner.failures,
                        "Failure threshold reached, circuit opened"
                    );
                    inner.trip(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(backend = %self.backend, "Trial call failed, circuit reopened");
                inner.trip(now);
            }
            CircuitState::Open => {}
        }
    }

    fn on_abandon(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`].
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure). Dropping the permit unreported (a cancelled
/// call) frees the half-open trial slot without counting as a failure.
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon();
        }
    }
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub backend: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
}

/// Process-wide map of circuit breakers keyed by backend name.
///
/// Breakers are created lazily and never removed, so counters persist across
/// every workflow that targets the same backend.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// The breaker for `backend`, creating it on first use.
    pub fn get(&self, backend: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().get(backend) {
            return b.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(backend.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(backend, self.config)))
            .clone()
    }

    /// Snapshots of every known breaker, sorted by backend name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut out: Vec<BreakerSnapshot> = self
            .breakers
            .read()
            .values()
            .map(|b| b.snapshot())
            .collect();
        out.sort_by(|a, b| a.backend.cmp(&b.backend));
        out
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
