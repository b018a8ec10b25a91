//! Error types for every layer of the import pipeline.

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Failure of a single HTTP exchange, or of all attempts once retries are
/// exhausted (the last attempt's error is surfaced unchanged).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, reset, and similar.
    #[error("network error: {0}")]
    Network(String),

    /// The per-attempt timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx HTTP response.
    #[error("HTTP error: {status}")]
    Http { status: u16, body: String },
}

impl FetchError {
    /// HTTP status, when the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 204/404: the upstream has nothing for this query.
    pub fn is_no_data(&self) -> bool {
        matches!(self.status(), Some(204) | Some(404))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            FetchError::Http {
                status: status.as_u16(),
                body: String::new(),
            }
        } else if err.is_timeout() {
            FetchError::Timeout(Duration::ZERO)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Outcome of a call rejected or failed through a `CircuitBreaker`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CircuitError<E> {
    /// The breaker is open; the wrapped call was not made.
    #[error("circuit '{name}' is open")]
    Open { name: String },

    /// The wrapped call ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

// ---------------------------------------------------------------------------
// Upstream (FDSN) client
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching or parsing GeoNet FDSN data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    /// The breaker refused the call; no request was sent.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Every attempt failed; carries the last attempt's error.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The text response is unusable as a whole (no header, required
    /// column missing).
    #[error("Format error: {0}")]
    Format(String),

    /// The XML body is not well formed.
    #[error("Parse error: {0}")]
    XmlParse(String),

    /// HTTP 200 whose body is an error page or error message.
    #[error("upstream returned an error body: {0}")]
    ErrorBody(String),
}

impl UpstreamError {
    /// The upstream answered 204/404 for this query.
    pub fn is_no_data(&self) -> bool {
        matches!(self, UpstreamError::Fetch(fetch) if fetch.is_no_data())
    }
}

impl From<CircuitError<UpstreamError>> for UpstreamError {
    fn from(err: CircuitError<UpstreamError>) -> Self {
        match err {
            CircuitError::Open { name } => UpstreamError::CircuitOpen(name),
            CircuitError::Inner(inner) => inner,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Errors surfaced by a `CatalogueStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record failed range checks; nothing in its batch was written.
    #[error("invalid event '{source_id}': {reason}")]
    Validation { source_id: String, reason: String },

    /// `(catalogue_id, source_id)` already present.
    #[error("duplicate event '{source_id}' in catalogue {catalogue_id}")]
    Duplicate {
        catalogue_id: String,
        source_id: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Postgres(#[from] postgres::Error),

    #[error("backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend(message.into())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Invalid or unreadable configuration. The only error the pipeline raises
/// instead of folding into an `ImportResult`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_status_only_for_http() {
        let http = FetchError::Http {
            status: 503,
            body: String::new(),
        };
        assert_eq!(http.status(), Some(503));
        assert_eq!(FetchError::Network("reset".into()).status(), None);
        assert_eq!(FetchError::Timeout(Duration::from_secs(1)).status(), None);
    }

    #[test]
    fn test_no_data_statuses() {
        for status in [204, 404] {
            let err = FetchError::Http {
                status,
                body: String::new(),
            };
            assert!(err.is_no_data(), "{status} should mean no data");
        }
        let err = FetchError::Http {
            status: 400,
            body: String::new(),
        };
        assert!(!err.is_no_data());
    }

    #[test]
    fn test_circuit_error_maps_to_upstream_error() {
        let open: UpstreamError = CircuitError::<UpstreamError>::Open {
            name: "geonet".into(),
        }
        .into();
        assert_eq!(open, UpstreamError::CircuitOpen("geonet".into()));

        let inner: UpstreamError =
            CircuitError::Inner(UpstreamError::Fetch(FetchError::Network("refused".into()))).into();
        assert_eq!(
            inner,
            UpstreamError::Fetch(FetchError::Network("refused".into()))
        );
    }
}
