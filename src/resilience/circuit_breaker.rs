//! Circuit breaker for the upstream FDSN service
//!
//! Three states:
//! Closed (normal) → Open (tripped, calls rejected without touching the
//! network) → HalfOpen (a limited number of probes decide whether to close
//! again or re-open).
//!
//! ```text
//! Closed   → Open:     failure_threshold classified failures inside window
//! Open     → HalfOpen: open_timeout elapsed since opening (checked on the next call)
//! HalfOpen → Closed:   success_threshold consecutive probe successes
//! HalfOpen → Open:     any probe failure (cooldown restarts)
//! ```
//!
//! All state lives behind one mutex. The lock is never held across the
//! wrapped call's `.await`, only around admission and outcome bookkeeping.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use super::observer::{NoopObserver, ResilienceObserver};
use crate::error::CircuitError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Tripped, calls fail fast
    Open,
    /// Probing whether the upstream recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that trip the breaker
    pub failure_threshold: u32,
    /// Rolling window for counting failures
    pub window_ms: u64,
    /// How long to stay Open before probing
    pub open_timeout_ms: u64,
    /// Consecutive probe successes needed to close
    pub success_threshold: u32,
    /// Probes allowed in flight while HalfOpen
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            open_timeout_ms: 30_000,
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

/// Point-in-time view of a breaker, for admin visibility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub half_open_successes: u32,
    pub probes_in_flight: u32,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_state_change_at: DateTime<Utc>,
}

type Transition = (CircuitState, CircuitState);

struct Inner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    half_open_successes: u32,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    opened_at_wall: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change_at: DateTime<Utc>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            half_open_successes: 0,
            probes_in_flight: 0,
            opened_at: None,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            opened_at_wall: None,
            last_failure_at: None,
            last_state_change_at: Utc::now(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.duration_since(oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.last_state_change_at = Utc::now();
        self.half_open_successes = 0;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.opened_at_wall = Some(self.last_state_change_at);
            }
            CircuitState::Closed => {
                self.failures.clear();
                self.opened_at = None;
            }
            CircuitState::HalfOpen => {}
        }
        Some((from, to))
    }
}

/// Per-upstream circuit breaker.
///
/// `E` is the wrapped call's error type. The failure classifier decides
/// which errors count against the breaker; errors it rejects (for example
/// "no data" responses) are treated like successes.
pub struct CircuitBreaker<E> {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn ResilienceObserver>,
    is_failure: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    inner: Mutex<Inner>,
}

impl<E> CircuitBreaker<E> {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            clock: Arc::new(SystemClock),
            observer: Arc::new(NoopObserver),
            is_failure: Arc::new(|_| true),
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_failure_classifier(
        mut self,
        is_failure: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_failure = Arc::new(is_failure);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `f` if the breaker admits it.
    ///
    /// Returns `CircuitError::Open` without calling `f` while the breaker
    /// is open (or HalfOpen with its probe budget in use).
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut admission = self.admit()?;
        let outcome = f().await;
        let failed = match &outcome {
            Ok(_) => false,
            Err(err) => (self.is_failure)(err),
        };
        admission.finish(failed);
        outcome.map_err(CircuitError::Inner)
    }

    /// Administrative override: back to Closed with empty counters.
    pub fn force_reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            let transition = inner.transition(CircuitState::Closed, now);
            inner.failures.clear();
            inner.half_open_successes = 0;
            inner.probes_in_flight = 0;
            inner.opened_at = None;
            transition
        };
        self.notify(transition);
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        inner.prune(now, self.config.window());
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures_in_window: inner.failures.len(),
            half_open_successes: inner.half_open_successes,
            probes_in_flight: inner.probes_in_flight,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            opened_at: inner.opened_at_wall,
            last_failure_at: inner.last_failure_at,
            last_state_change_at: inner.last_state_change_at,
        }
    }

    fn admit(&self) -> Result<Admission<'_, E>, CircuitError<E>> {
        let (result, transition) = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            let mut transition = None;

            if inner.state == CircuitState::Open {
                let cooled = inner
                    .opened_at
                    .map(|at| now.duration_since(at) >= self.config.open_timeout())
                    .unwrap_or(true);
                if cooled {
                    transition = inner.transition(CircuitState::HalfOpen, now);
                }
            }

            let result = match inner.state {
                CircuitState::Closed => {
                    inner.total_calls += 1;
                    Ok(false)
                }
                CircuitState::HalfOpen
                    if inner.probes_in_flight < self.config.half_open_max_calls.max(1) =>
                {
                    inner.total_calls += 1;
                    inner.probes_in_flight += 1;
                    Ok(true)
                }
                _ => {
                    inner.total_rejections += 1;
                    Err(CircuitError::Open {
                        name: self.name.clone(),
                    })
                }
            };
            (result, transition)
        };
        self.notify(transition);
        result.map(|probe| Admission {
            breaker: self,
            probe,
            done: false,
        })
    }

    fn record(&self, probe: bool, failed: bool) {
        let transition = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            if probe {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            }
            if failed {
                inner.total_failures += 1;
                inner.last_failure_at = Some(Utc::now());
                match inner.state {
                    CircuitState::Closed => {
                        inner.failures.push_back(now);
                        inner.prune(now, self.config.window());
                        if inner.failures.len() >= self.config.failure_threshold as usize {
                            inner.transition(CircuitState::Open, now)
                        } else {
                            None
                        }
                    }
                    CircuitState::HalfOpen => inner.transition(CircuitState::Open, now),
                    // Late result from a call admitted before the trip.
                    CircuitState::Open => None,
                }
            } else {
                inner.total_successes += 1;
                match inner.state {
                    CircuitState::HalfOpen => {
                        inner.half_open_successes += 1;
                        if inner.half_open_successes >= self.config.success_threshold {
                            inner.transition(CircuitState::Closed, now)
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            }
        };
        self.notify(transition);
    }

    /// Release a probe slot whose call never reported an outcome.
    fn abandon(&self, probe: bool) {
        if probe {
            let mut inner = self.inner.lock();
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    fn notify(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.observer.on_state_change(&self.name, from, to);
            match to {
                CircuitState::Open => self.observer.on_open(&self.name),
                CircuitState::Closed => self.observer.on_close(&self.name),
                CircuitState::HalfOpen => {}
            }
        }
    }
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// Ticket for one admitted call. Dropping it unfinished (the caller's
/// future was cancelled) frees the probe slot without recording anything.
struct Admission<'a, E> {
    breaker: &'a CircuitBreaker<E>,
    probe: bool,
    done: bool,
}

impl<E> Admission<'_, E> {
    fn finish(&mut self, failed: bool) {
        self.done = true;
        self.breaker.record(self.probe, failed);
    }
}

impl<E> Drop for Admission<'_, E> {
    fn drop(&mut self) {
        if !self.done {
            self.breaker.abandon(self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;
    use crate::resilience::observer::{Notification, RecordingObserver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Boom,
        NoData,
    }

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            window_ms: 10_000,
            open_timeout_ms: 5_000,
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker<TestError> {
        CircuitBreaker::new("test", config())
            .with_clock(clock)
            .with_failure_classifier(|e| *e != TestError::NoData)
    }

    async fn fail(b: &CircuitBreaker<TestError>) -> Result<(), CircuitError<TestError>> {
        b.call(|| async { Err::<(), _>(TestError::Boom) }).await
    }

    async fn succeed(b: &CircuitBreaker<TestError>) -> Result<(), CircuitError<TestError>> {
        b.call(|| async { Ok::<(), TestError>(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_exactly_threshold_failures() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock);

        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_never_invokes_wrapped_call() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock);
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }

        let calls = AtomicUsize::new(0);
        let result = b
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TestError>(())
            })
            .await;

        assert!(result.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.stats().total_rejections, 1);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_closes_on_successes() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }

        clock.advance(Duration::from_millis(4_999));
        assert!(succeed(&b).await.unwrap_err().is_open());

        clock.advance(Duration::from_millis(1));
        succeed(&b).await.expect("first probe should be attempted");
        assert_eq!(b.state(), CircuitState::HalfOpen);
        succeed(&b).await.expect("second probe should be attempted");
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failures_in_window, 0, "closing resets the window");
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        clock.advance(Duration::from_secs(5));

        let err = fail(&b).await.unwrap_err();
        assert!(!err.is_open(), "probe runs and fails with the inner error");
        assert_eq!(b.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(4));
        assert!(succeed(&b).await.unwrap_err().is_open());
        clock.advance(Duration::from_secs(1));
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_failures_outside_window_do_not_count() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());

        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        clock.advance(Duration::from_millis(10_001));
        fail(&b).await.unwrap_err();

        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failures_in_window, 1);
    }

    #[tokio::test]
    async fn test_benign_errors_do_not_trip() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock);
        for _ in 0..10 {
            let err = b
                .call(|| async { Err::<(), _>(TestError::NoData) })
                .await
                .unwrap_err();
            assert_eq!(err, CircuitError::Inner(TestError::NoData));
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().total_failures, 0);
    }

    #[tokio::test]
    async fn test_half_open_limits_probes_in_flight() {
        let clock = Arc::new(ManualClock::new());
        let b = Arc::new(breaker(clock.clone()));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        clock.advance(Duration::from_secs(5));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let b = b.clone();
            tokio::spawn(async move {
                b.call(|| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<(), TestError>(())
                })
                .await
            })
        };
        started_rx.await.unwrap();

        assert!(succeed(&b).await.unwrap_err().is_open());
        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(b.stats().probes_in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_not_lost() {
        let clock = Arc::new(ManualClock::new());
        let b = Arc::new(
            CircuitBreaker::<TestError>::new(
                "concurrent",
                CircuitBreakerConfig {
                    failure_threshold: 1_000,
                    ..config()
                },
            )
            .with_clock(clock),
        );

        let mut handles = Vec::new();
        for _ in 0..50 {
            let b = b.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let _ = b.call(|| async { Err::<(), _>(TestError::Boom) }).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = b.stats();
        assert_eq!(stats.total_failures, 500);
        assert_eq!(stats.failures_in_window, 500);
        assert_eq!(stats.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_observer_sees_open_and_close() {
        let clock = Arc::new(ManualClock::new());
        let observer = Arc::new(RecordingObserver::new());
        let b = breaker(clock.clone()).with_observer(observer.clone());

        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        clock.advance(Duration::from_secs(5));
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();

        assert_eq!(
            observer.notifications(),
            vec![
                Notification::StateChange {
                    from: CircuitState::Closed,
                    to: CircuitState::Open
                },
                Notification::Open,
                Notification::StateChange {
                    from: CircuitState::Open,
                    to: CircuitState::HalfOpen
                },
                Notification::StateChange {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed
                },
                Notification::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_force_reset_closes_and_clears() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock);
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        assert_eq!(b.state(), CircuitState::Open);

        b.force_reset();
        let stats = b.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failures_in_window, 0);
        succeed(&b).await.unwrap();
    }
}
