//! Observer hooks for retries and breaker transitions.
//!
//! Hooks are side effects only; nothing they do changes control flow.

use std::time::Duration;

#[cfg(test)]
use parking_lot::Mutex;

use super::circuit_breaker::CircuitState;

/// One scheduled retry, reported before the retry sleep begins.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// The attempt that just failed (1-based).
    pub attempt_number: u32,
    pub delay: Duration,
    pub cause: String,
}

pub trait ResilienceObserver: Send + Sync {
    fn on_retry(&self, _url: &str, _attempt: &RetryAttempt) {}

    fn on_state_change(&self, _breaker: &str, _from: CircuitState, _to: CircuitState) {}

    fn on_open(&self, _breaker: &str) {}

    fn on_close(&self, _breaker: &str) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {}

/// Emits every notification as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ResilienceObserver for TracingObserver {
    fn on_retry(&self, url: &str, attempt: &RetryAttempt) {
        tracing::warn!(
            source = "FDSN",
            url,
            attempt = attempt.attempt_number,
            delay_ms = attempt.delay.as_millis() as u64,
            cause = %attempt.cause,
            "retrying upstream request"
        );
    }

    fn on_state_change(&self, breaker: &str, from: CircuitState, to: CircuitState) {
        tracing::debug!(source = "FDSN", breaker, %from, %to, "circuit state change");
    }

    fn on_open(&self, breaker: &str) {
        tracing::warn!(source = "FDSN", breaker, "circuit OPEN, upstream calls suspended");
    }

    fn on_close(&self, breaker: &str) {
        tracing::info!(source = "FDSN", breaker, "circuit CLOSED, upstream recovered");
    }
}

/// A notification captured by `RecordingObserver`.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Retry(RetryAttempt),
    StateChange { from: CircuitState, to: CircuitState },
    Open,
    Close,
}

/// Keeps every notification in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn retries(&self) -> Vec<RetryAttempt> {
        self.seen
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Retry(attempt) => Some(attempt.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl ResilienceObserver for RecordingObserver {
    fn on_retry(&self, _url: &str, attempt: &RetryAttempt) {
        self.seen.lock().push(Notification::Retry(attempt.clone()));
    }

    fn on_state_change(&self, _breaker: &str, from: CircuitState, to: CircuitState) {
        self.seen.lock().push(Notification::StateChange { from, to });
    }

    fn on_open(&self, _breaker: &str) {
        self.seen.lock().push(Notification::Open);
    }

    fn on_close(&self, _breaker: &str) {
        self.seen.lock().push(Notification::Close);
    }
}
