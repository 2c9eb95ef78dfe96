use crate::backends::{BackendInvoker, BackendRequest, BackendResponse};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::BackendDescriptor;
use conductor_core::{BackendError, BackendFailure, ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configures backoff between attempts on the same backend.
///
/// The number of attempts is per backend ([`BackendDescriptor::max_retries`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Whether an error is worth another attempt on the same backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

/// Decides how a backend error is treated. Callers may supply their own.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, err: &BackendError) -> ErrorClass;
}

/// Default classification: 5xx, 429, timeouts, and transport failures are
/// retryable; every other status (400, 401, 403, 404, ...) fails fast.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, err: &BackendError) -> ErrorClass {
        if is_retryable(err) {
            ErrorClass::Retryable
        } else {
            ErrorClass::NonRetryable
        }
    }
}

impl<F> ErrorClassifier for F
where
    F: Fn(&BackendError) -> ErrorClass + Send + Sync,
{
    fn classify(&self, err: &BackendError) -> ErrorClass {
        self(err)
    }
}

/// Determines whether an error is transient and worth retrying.
pub fn is_retryable(err: &BackendError) -> bool {
    match err {
        BackendError::Status { code, .. } => *code == 429 || (500..600).contains(code),
        BackendError::Timeout { .. } | BackendError::Transport(_) => true,
    }
}

/// Computes the backoff delay after the failed attempt `attempt` (0-based)
/// using exponential backoff capped at `backoff_max_ms`.
fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// Progress through the attempts allowed on one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Index of the attempt about to be made (0 = first call).
    pub attempt: u32,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn next(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then call the same backend again.
    RetryAfter(Duration),
    /// All attempts on this backend were used.
    Exhausted,
    /// Non-retryable error; move to the next backend now.
    Abandon,
}

impl RetryPolicy {
    /// Decide the next step after attempt `state.attempt` failed with an
    /// error of class `class`.
    pub fn decide(&self, state: RetryState, class: ErrorClass) -> RetryDecision {
        if class == ErrorClass::NonRetryable {
            return RetryDecision::Abandon;
        }
        if state.attempt + 1 >= state.max_attempts {
            return RetryDecision::Exhausted;
        }
        RetryDecision::RetryAfter(Duration::from_millis(compute_backoff(self, state.attempt)))
    }
}

/// A backend the executor may route to.
#[derive(Clone)]
pub struct Backend {
    pub descriptor: BackendDescriptor,
    pub invoker: Arc<dyn BackendInvoker>,
}

impl Backend {
    pub fn new(descriptor: BackendDescriptor, invoker: Arc<dyn BackendInvoker>) -> Self {
        Self {
            descriptor,
            invoker,
        }
    }
}

/// Successful response plus the backend that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub backend: String,
    pub response: BackendResponse,
}

enum BackendOutcome {
    Served(BackendResponse),
    Failed(BackendFailure),
    CircuitOpen,
}

/// Routes a request across backends in priority order.
///
/// For each request it tries enabled backends with a closed (or cooled-down)
/// circuit, lowest priority value first. Within a backend it retries
/// retryable errors with exponential backoff up to the backend's attempt
/// limit; a non-retryable error moves straight to the next backend. Every
/// attempt's outcome is reported to that backend's circuit breaker. If every
/// candidate fails, [`ConductorError::AllProvidersFailed`] carries the last
/// error from each attempted backend.
pub struct FailoverExecutor {
    backends: Vec<Backend>,
    breakers: Arc<CircuitBreakerRegistry>,
    policy: RetryPolicy,
    classifier: Arc<dyn ErrorClassifier>,
}

impl FailoverExecutor {
    pub fn new(
        mut backends: Vec<Backend>,
        breakers: Arc<CircuitBreakerRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        // Stable: equal priorities keep their configured order.
        backends.sort_by_key(|b| b.descriptor.priority);
        Self {
            backends,
            breakers,
            policy,
            classifier: Arc::new(DefaultClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Backend names in the order they are tried.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends
            .iter()
            .map(|b| b.descriptor.name.as_str())
            .collect()
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Execute `request`, failing over until one backend succeeds.
    ///
    /// Cancelling `cancel` aborts an in-flight call (its future is dropped)
    /// or a backoff sleep and returns [`ConductorError::Cancelled`].
    pub async fn execute(
        &self,
        request: &BackendRequest,
        cancel: &CancellationToken,
    ) -> ConductorResult<Served> {
        let mut failures = Vec::new();
        let mut skipped = Vec::new();

        for backend in &self.backends {
            let name = backend.descriptor.name.as_str();
            if !backend.descriptor.enabled {
                debug!(backend = name, "Backend disabled, skipping");
                skipped.push(name.to_string());
                continue;
            }

            match self.run_backend(backend, request, cancel).await? {
                BackendOutcome::Served(response) => {
                    return Ok(Served {
                        backend: name.to_string(),
                        response,
                    });
                }
                BackendOutcome::Failed(failure) => {
                    warn!(
                        backend = name,
                        attempts = failure.attempts,
                        error = %failure.to_error(),
                        "Backend exhausted, failing over"
                    );
                    failures.push(failure);
                }
                BackendOutcome::CircuitOpen => {
                    warn!(backend = name, "Circuit open, skipping backend");
                    skipped.push(name.to_string());
                }
            }
        }

        Err(ConductorError::AllProvidersFailed { failures, skipped })
    }

    async fn run_backend(
        &self,
        backend: &Backend,
        request: &BackendRequest,
        cancel: &CancellationToken,
    ) -> ConductorResult<BackendOutcome> {
        let name = backend.descriptor.name.as_str();
        let timeout = backend.descriptor.timeout();
        let breaker = self.breakers.get(name);
        let mut state = RetryState::new(backend.descriptor.max_attempts());
        let mut last_error: Option<BackendError> = None;

        loop {
            let permit = match breaker.try_acquire() {
                Ok(p) => p,
                Err(_) => {
                    // Tripped by our own earlier attempts: report what we saw.
                    return Ok(match last_error {
                        Some(last_error) => BackendOutcome::Failed(BackendFailure {
                            backend: name.to_string(),
                            attempts: state.attempt,
                            last_error,
                            retryable: true,
                        }),
                        None => BackendOutcome::CircuitOpen,
                    });
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConductorError::Cancelled),
                r = tokio::time::timeout(timeout, backend.invoker.invoke(request, timeout)) => r,
            };
            let err = match result {
                Ok(Ok(response)) => {
                    permit.success();
                    info!(
                        backend = name,
                        attempt = state.attempt,
                        task_id = ?request.task_id,
                        "Backend call succeeded"
                    );
                    return Ok(BackendOutcome::Served(response));
                }
                Ok(Err(e)) => e,
                Err(_) => BackendError::Timeout {
                    timeout_ms: backend.descriptor.timeout_ms,
                },
            };
            permit.failure();

            let class = self.classifier.classify(&err);
            let decision = self.policy.decide(state, class);
            match decision {
                RetryDecision::RetryAfter(_) if breaker.is_open() => {
                    warn!(
                        backend = name,
                        attempt = state.attempt,
                        "Circuit opened during retries, moving to next backend"
                    );
                    return Ok(BackendOutcome::Failed(BackendFailure {
                        backend: name.to_string(),
                        attempts: state.attempt + 1,
                        last_error: err,
                        retryable: true,
                    }));
                }
                RetryDecision::RetryAfter(delay) => {
                    info!(
                        backend = name,
                        attempt = state.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable error, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ConductorError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    last_error = Some(err);
                    state = state.next();
                }
                RetryDecision::Exhausted | RetryDecision::Abandon => {
                    if decision == RetryDecision::Abandon {
                        warn!(
                            backend = name,
                            attempt = state.attempt,
                            error = %err,
                            "Non-retryable error, moving to next backend"
                        );
                    }
                    return Ok(BackendOutcome::Failed(BackendFailure {
                        backend: name.to_string(),
                        attempts: state.attempt + 1,
                        last_error: err,
                        retryable: class == ErrorClass::Retryable,
                    }));
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::circuit_breaker::CircuitState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// A mock backend that returns a sequence of results.
    struct MockBackend {
        /// Results to return in order; pops from front on each call.
        results: tokio::sync::Mutex<Vec<Result<BackendResponse, BackendError>>>,
        call_count: AtomicU32,
        call_times: parking_lot::Mutex<Vec<Instant>>,
    }

    impl MockBackend {
        fn new(results: Vec<Result<BackendResponse, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                results: tokio::sync::Mutex::new(results),
                call_count: AtomicU32::new(0),
                call_times: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackendInvoker for MockBackend {
        async fn invoke(
            &self,
            _request: &BackendRequest,
            _timeout: Duration,
        ) -> Result<BackendResponse, BackendError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().push(Instant::now());
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(BackendError::Transport("MockBackend: no more results".into()))
            } else {
                results.remove(0)
            }
        }
    }

    /// Never answers; only a timeout or cancellation ends the call.
    struct HangingBackend;

    #[async_trait]
    impl BackendInvoker for HangingBackend {
        async fn invoke(
            &self,
            _request: &BackendRequest,
            _timeout: Duration,
        ) -> Result<BackendResponse, BackendError> {
            std::future::pending().await
        }
    }

    fn backend(name: &str, priority: u32, retries: u32, mock: Arc<dyn BackendInvoker>) -> Backend {
        Backend::new(
            BackendDescriptor::new(name, priority).with_max_retries(retries),
            mock,
        )
    }

    fn breakers(threshold: u32) -> Arc<CircuitBreakerRegistry> {
        Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            open_timeout_ms: 60_000,
            success_threshold: 1,
        }))
    }

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    fn status(code: u16) -> Result<BackendResponse, BackendError> {
        Err(BackendError::status(code, "mock"))
    }

    fn ok(text: &str) -> Result<BackendResponse, BackendError> {
        Ok(BackendResponse::text(text))
    }

    // ── retry succeeds on second attempt ─────────────────────────────────

    #[tokio::test]
    async fn retry_succeeds_on_second_try() {
        let mock = MockBackend::new(vec![status(429), ok("ok")]);
        let exec = FailoverExecutor::new(
            vec![backend("primary", 1, 3, mock.clone())],
            breakers(5),
            instant_policy(),
        );

        let served = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(served.backend, "primary");
        assert_eq!(served.response.output, "ok");
        assert_eq!(mock.calls(), 2);
    }

    // ── exactly max_retries + 1 attempts with doubling delays ────────────

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_use_all_attempts_with_exponential_backoff() {
        let mock = MockBackend::new(vec![status(503), status(503), status(503), status(503)]);
        let exec = FailoverExecutor::new(
            vec![backend("primary", 1, 3, mock.clone())],
            breakers(10),
            RetryPolicy {
                backoff_base_ms: 100,
                backoff_max_ms: 10_000,
            },
        );

        let err = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(mock.calls(), 4);

        let times = mock.call_times.lock().clone();
        let gaps: Vec<u128> = times.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps.len(), 3);
        for (gap, expected) in gaps.iter().zip([100u128, 200, 400]) {
            assert!(
                *gap >= expected && *gap <= expected + 5,
                "gap {gap}ms, expected ~{expected}ms"
            );
        }

        match err {
            ConductorError::AllProvidersFailed { failures, skipped } => {
                assert!(skipped.is_empty());
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].attempts, 4);
                assert_eq!(failures[0].last_error, BackendError::status(503, "mock"));
                assert!(matches!(
                    failures[0].to_error(),
                    ConductorError::RetryableBackend { .. }
                ));
            }
            other => panic!("Expected AllProvidersFailed, got {other:?}"),
        }
    }

    // ── non-retryable error fails over after one attempt ─────────────────

    #[tokio::test]
    async fn non_retryable_skips_immediately() {
        let first = MockBackend::new(vec![status(400), ok("should not reach")]);
        let second = MockBackend::new(vec![ok("fallback ok")]);
        let exec = FailoverExecutor::new(
            vec![
                backend("primary", 1, 3, first.clone()),
                backend("secondary", 2, 3, second.clone()),
            ],
            breakers(5),
            instant_policy(),
        );

        let served = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(served.backend, "secondary");
        assert_eq!(served.response.output, "fallback ok");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_classified() {
        let only = MockBackend::new(vec![status(404)]);
        let exec = FailoverExecutor::new(
            vec![backend("primary", 1, 3, only.clone())],
            breakers(5),
            instant_policy(),
        );

        let err = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ConductorError::AllProvidersFailed { failures, .. } => {
                assert!(!failures[0].retryable);
                assert!(matches!(
                    failures[0].to_error(),
                    ConductorError::NonRetryableBackend { ref backend, .. } if backend == "primary"
                ));
            }
            other => panic!("Expected AllProvidersFailed, got {other:?}"),
        }
        assert_eq!(only.calls(), 1);
    }

    // ── priority order, 429 x3 on first, success on second ──────────────

    #[tokio::test]
    async fn rate_limited_primary_fails_over_by_priority() {
        let p1 = MockBackend::new(vec![status(429), status(429), status(429)]);
        let p2 = MockBackend::new(vec![ok("from backend 2")]);
        let p3 = MockBackend::new(vec![ok("from backend 3")]);
        let registry = breakers(5);
        // Registered out of order on purpose; priority decides.
        let exec = FailoverExecutor::new(
            vec![
                backend("backend-3", 3, 2, p3.clone()),
                backend("backend-1", 1, 2, p1.clone()),
                backend("backend-2", 2, 2, p2.clone()),
            ],
            registry.clone(),
            instant_policy(),
        );
        assert_eq!(exec.backend_names(), vec!["backend-1", "backend-2", "backend-3"]);

        let served = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(served.backend, "backend-2");
        assert_eq!(served.response.output, "from backend 2");
        assert_eq!(p1.calls(), 3);
        assert_eq!(p3.calls(), 0);
        assert_eq!(registry.get("backend-1").failure_count(), 3);
        assert_eq!(registry.get("backend-2").failure_count(), 0);
    }

    // ── disabled and open backends are skipped without a call ────────────

    #[tokio::test]
    async fn disabled_and_open_backends_are_skipped() {
        let disabled = MockBackend::new(vec![ok("disabled")]);
        let open = MockBackend::new(vec![ok("open")]);
        let healthy = MockBackend::new(vec![ok("healthy")]);
        let registry = breakers(1);
        registry.get("open").try_acquire().unwrap().failure();

        let exec = FailoverExecutor::new(
            vec![
                Backend::new(BackendDescriptor::new("disabled", 0).disabled(), disabled.clone()),
                backend("open", 1, 0, open.clone()),
                backend("healthy", 2, 0, healthy.clone()),
            ],
            registry,
            instant_policy(),
        );

        let served = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(served.backend, "healthy");
        assert_eq!(disabled.calls(), 0);
        assert_eq!(open.calls(), 0);
    }

    // ── breaker tripping mid-retry stops further attempts ────────────────

    #[tokio::test]
    async fn breaker_trip_stops_retries_on_that_backend() {
        let mock = MockBackend::new(vec![status(500), status(500), status(500), status(500)]);
        let registry = breakers(2);
        let exec = FailoverExecutor::new(
            vec![backend("primary", 1, 3, mock.clone())],
            registry.clone(),
            instant_policy(),
        );

        let err = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(mock.calls(), 2);
        assert_eq!(registry.get("primary").state(), CircuitState::Open);
        match err {
            ConductorError::AllProvidersFailed { failures, .. } => {
                assert_eq!(failures[0].attempts, 2);
            }
            other => panic!("Expected AllProvidersFailed, got {other:?}"),
        }

        // Next request does not touch the backend at all.
        let err = exec
            .execute(&BackendRequest::new("again"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(mock.calls(), 2);
        assert!(matches!(
            err,
            ConductorError::AllProvidersFailed { ref failures, ref skipped }
                if failures.is_empty() && skipped == &vec!["primary".to_string()]
        ));
    }

    // ── per-call timeout is retryable ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retryable_then_fails_over() {
        let fallback = MockBackend::new(vec![ok("fallback")]);
        let exec = FailoverExecutor::new(
            vec![
                Backend::new(
                    BackendDescriptor::new("slow", 1)
                        .with_timeout_ms(50)
                        .with_max_retries(1),
                    Arc::new(HangingBackend),
                ),
                backend("fallback", 2, 0, fallback.clone()),
            ],
            breakers(5),
            instant_policy(),
        );

        let served = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(served.backend, "fallback");
        assert_eq!(exec.breakers().get("slow").failure_count(), 2);
    }

    // ── cancellation interrupts backoff ──────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_returns_cancelled() {
        let mock = MockBackend::new(vec![status(503), ok("late")]);
        let exec = FailoverExecutor::new(
            vec![backend("primary", 1, 3, mock.clone())],
            breakers(5),
            RetryPolicy {
                backoff_base_ms: 10_000,
                backoff_max_ms: 10_000,
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = exec
            .execute(&BackendRequest::new("hi"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Cancelled));
        assert_eq!(mock.calls(), 1);
    }

    // ── cancellation aborts an in-flight call without counting a failure ─

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_in_flight_call() {
        let registry = breakers(1);
        let exec = FailoverExecutor::new(
            vec![Backend::new(
                BackendDescriptor::new("slow", 1).with_timeout_ms(60_000),
                Arc::new(HangingBackend),
            )],
            registry.clone(),
            instant_policy(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = exec
            .execute(&BackendRequest::new("hi"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Cancelled));
        assert_eq!(registry.get("slow").state(), CircuitState::Closed);
    }

    // ── backoff timing computation ───────────────────────────────────────

    #[test]
    fn backoff_computation() {
        let policy = RetryPolicy {
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        };

        assert_eq!(compute_backoff(&policy, 0), 500); // 500 * 2^0 = 500
        assert_eq!(compute_backoff(&policy, 1), 1000); // 500 * 2^1 = 1000
        assert_eq!(compute_backoff(&policy, 2), 2000); // 500 * 2^2 = 2000
        assert_eq!(compute_backoff(&policy, 3), 4000); // 500 * 2^3 = 4000
        assert_eq!(compute_backoff(&policy, 5), 16000); // 500 * 2^5 = 16000
        assert_eq!(compute_backoff(&policy, 6), 30_000); // capped at max
        assert_eq!(compute_backoff(&policy, 64), 30_000); // no overflow
    }

    #[test]
    fn retry_decisions() {
        let policy = RetryPolicy {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        };
        let state = RetryState::new(3);
        assert_eq!(
            policy.decide(state, ErrorClass::Retryable),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(state.next(), ErrorClass::Retryable),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(
            policy.decide(state.next().next(), ErrorClass::Retryable),
            RetryDecision::Exhausted
        );
        assert_eq!(
            policy.decide(state, ErrorClass::NonRetryable),
            RetryDecision::Abandon
        );
    }

    // ── is_retryable classification ──────────────────────────────────────

    #[test]
    fn is_retryable_classification() {
        // Retryable
        for code in [429, 500, 502, 503, 504] {
            assert!(is_retryable(&BackendError::status(code, "")), "{code}");
        }
        assert!(is_retryable(&BackendError::Timeout { timeout_ms: 10 }));
        assert!(is_retryable(&BackendError::Transport("connection reset".into())));

        // Not retryable
        for code in [400, 401, 403, 404] {
            assert!(!is_retryable(&BackendError::status(code, "")), "{code}");
        }
    }

    #[tokio::test]
    async fn custom_classifier_overrides_default() {
        // Treat 401 as retryable (e.g. a token refresh happens out of band).
        let mock = MockBackend::new(vec![status(401), ok("refreshed")]);
        let exec = FailoverExecutor::new(
            vec![backend("primary", 1, 1, mock.clone())],
            breakers(5),
            instant_policy(),
        )
        .with_classifier(Arc::new(|e: &BackendError| match e {
            BackendError::Status { code: 401, .. } => ErrorClass::Retryable,
            other => DefaultClassifier.classify(other),
        }));

        let served = exec
            .execute(&BackendRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(served.response.output, "refreshed");
        assert_eq!(mock.calls(), 2);
    }
}
