//! Retrying HTTP client.
//!
//! `retry_fetch` wraps each attempt in its own timeout, retries transient
//! failures with exponential backoff, and surfaces the last attempt's error
//! unchanged once attempts run out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::backoff::BackoffConfig;
use super::observer::{NoopObserver, ResilienceObserver, RetryAttempt};
use crate::error::FetchError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};

/// Longest error body kept on `FetchError::Http`.
const MAX_ERROR_BODY: usize = 512;

pub type RetryPredicate = fn(&FetchError) -> bool;

/// Retry on network errors, timeouts, 5xx and 429. Other 4xx (408
/// included) are final.
pub fn default_should_retry(err: &FetchError) -> bool {
    match err {
        FetchError::Network(_) | FetchError::Timeout(_) => true,
        FetchError::Http { status, .. } => *status == 429 || *status == 503 || *status >= 500,
    }
}

/// Retry settings as they appear in the `[retry]` config section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    #[serde(flatten)]
    pub backoff: BackoffConfig,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_ms: 30_000,
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff: BackoffConfig,
    pub should_retry: RetryPredicate,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryOptions {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            attempt_timeout: Duration::from_millis(settings.attempt_timeout_ms),
            backoff: settings.backoff.clone(),
            should_retry: default_should_retry,
        }
    }
}

/// Extra request detail for `retry_fetch`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn accept(mime: &str) -> Self {
        Self {
            headers: vec![("Accept".to_string(), mime.to_string())],
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached.
///
/// `op` receives the 1-based attempt number. `on_retry` fires before each
/// backoff sleep.
pub async fn retry_async<T, F, Fut>(
    mut op: F,
    options: &RetryOptions,
    mut on_retry: impl FnMut(&RetryAttempt),
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(options.attempt_timeout, op(attempt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Timeout(options.attempt_timeout)),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= max_attempts || !(options.should_retry)(&err) {
            return Err(err);
        }

        let delay = options.backoff.delay_for(attempt, &mut rand::thread_rng());
        on_retry(&RetryAttempt {
            attempt_number: attempt,
            delay,
            cause: err.to_string(),
        });
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// HTTP client with per-attempt timeouts and backoff.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn HttpTransport>,
    observer: Arc<dyn ResilienceObserver>,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// GET `url`, retrying per `retry`. Any 2xx is success; everything
    /// else ends as `FetchError` carrying the status when there was one.
    pub async fn retry_fetch(
        &self,
        url: &str,
        request: &RequestOptions,
        retry: &RetryOptions,
    ) -> Result<HttpResponse, FetchError> {
        let req = HttpRequest {
            url: url.to_string(),
            headers: request.headers.clone(),
        };
        let req = &req;
        let transport = &self.transport;
        retry_async(
            move |_attempt| async move {
                let response = transport.send(req).await?;
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(FetchError::Http {
                        status: response.status,
                        body: truncate(&response.body, MAX_ERROR_BODY),
                    })
                }
            },
            retry,
            |attempt| self.observer.on_retry(url, attempt),
        )
        .await
    }
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ScriptedTransport;
    use crate::resilience::observer::RecordingObserver;

    fn fast_retry(max_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_attempts,
            attempt_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::aggressive(),
            should_retry: default_should_retry,
        }
    }

    fn http(status: u16) -> FetchError {
        FetchError::Http {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_default_predicate() {
        assert!(default_should_retry(&FetchError::Network("reset".into())));
        assert!(default_should_retry(&FetchError::Timeout(Duration::from_secs(1))));
        assert!(default_should_retry(&http(500)));
        assert!(default_should_retry(&http(502)));
        assert!(default_should_retry(&http(503)));
        assert!(default_should_retry(&http(429)));
        assert!(!default_should_retry(&http(400)));
        assert!(!default_should_retry(&http(404)));
        assert!(!default_should_retry(&http(408)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new().route(
            "query",
            vec![
                Ok(HttpResponse::new(503, "busy")),
                Err(FetchError::Network("reset".into())),
                Ok(HttpResponse::new(200, "data")),
            ],
        ));
        let observer = Arc::new(RecordingObserver::new());
        let client = ResilientClient::new(transport.clone()).with_observer(observer.clone());

        let response = client
            .retry_fetch("https://example.test/query", &RequestOptions::default(), &fast_retry(5))
            .await
            .unwrap();

        assert_eq!(response.body, "data");
        assert_eq!(transport.request_count("query"), 3);
        let retries = observer.retries();
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[0].attempt_number, 1);
        assert_eq!(retries[0].delay, Duration::from_millis(10));
        assert_eq!(retries[1].delay, Duration::from_millis(20));
        assert!(retries[0].cause.contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let transport = Arc::new(
            ScriptedTransport::new().route("query", vec![Ok(HttpResponse::new(400, "bad"))]),
        );
        let client = ResilientClient::new(transport.clone());

        let err = client
            .retry_fetch("https://example.test/query", &RequestOptions::default(), &fast_retry(5))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert_eq!(transport.request_count("query"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error_unchanged() {
        let transport = Arc::new(ScriptedTransport::new().route(
            "query",
            vec![
                Ok(HttpResponse::new(500, "first")),
                Ok(HttpResponse::new(502, "last")),
            ],
        ));
        let client = ResilientClient::new(transport.clone());

        let err = client
            .retry_fetch("https://example.test/query", &RequestOptions::default(), &fast_retry(3))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            FetchError::Http {
                status: 502,
                body: "last".into()
            }
        );
        assert_eq!(transport.request_count("query"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out_and_is_retried() {
        let options = RetryOptions {
            attempt_timeout: Duration::from_millis(100),
            ..fast_retry(2)
        };
        let mut attempts = Vec::new();

        let result = retry_async(
            |attempt| {
                attempts.push(attempt);
                async move {
                    if attempt == 1 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok::<_, FetchError>(attempt)
                }
            },
            &options,
            |_| {},
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate_can_retry_408() {
        let transport = Arc::new(ScriptedTransport::new().route(
            "query",
            vec![Ok(HttpResponse::new(408, "")), Ok(HttpResponse::new(200, "ok"))],
        ));
        let client = ResilientClient::new(transport.clone());
        let options = RetryOptions {
            should_retry: |e| e.status() == Some(408) || default_should_retry(e),
            ..fast_retry(3)
        };

        let response = client
            .retry_fetch("https://example.test/query", &RequestOptions::default(), &options)
            .await
            .unwrap();
        assert_eq!(response.body, "ok");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
