//! Resilience patterns for talking to an unreliable upstream
//!
//! - Exponential backoff with full jitter
//! - Retrying HTTP client with per-attempt timeouts
//! - Circuit breaker with injectable clock and failure classification
//! - Observer hooks for retries and state transitions

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod observer;
pub mod retry;

pub use backoff::{BackoffConfig, compute_delay};
pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use observer::{NoopObserver, ResilienceObserver, RetryAttempt, TracingObserver};
pub use retry::{
    RequestOptions, ResilientClient, RetryOptions, RetrySettings, default_should_retry, retry_async,
};
