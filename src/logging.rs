//! Structured logging for the quake import service
//!
//! Log events go through `tracing`; the binary installs a subscriber once
//! via `init_logging`. Every event carries a `source` field naming the
//! subsystem, and upstream failures are classified so that routine
//! "no data" answers do not drown out real outages.

use std::fmt;

use tracing_subscriber::{EnvFilter, fmt as tfmt, prelude::*};

use crate::error::{ConfigError, FetchError, UpstreamError};
use crate::import::ImportResult;

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str, json: bool) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ConfigError::Invalid(format!("log level '{level}': {e}")))?;

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tfmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tfmt::layer().with_target(false))
            .try_init()
    };
    installed.map_err(|e| ConfigError::Invalid(format!("logging already initialised: {e}")))
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Fdsn,
    Store,
    Pipeline,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Fdsn => write!(f, "FDSN"),
            DataSource::Store => write!(f, "STORE"),
            DataSource::Pipeline => write!(f, "PIPELINE"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Upstream is fine; it had nothing for us, or we are backing off on purpose.
    Expected,
    /// Service degradation, bad payloads, or a configuration problem.
    Unexpected,
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

pub fn classify_fdsn_failure(err: &UpstreamError) -> FailureType {
    match err {
        UpstreamError::CircuitOpen(_) => FailureType::Expected,
        err if err.is_no_data() => FailureType::Expected,
        UpstreamError::Fetch(FetchError::Http { status, .. }) if *status >= 500 => {
            FailureType::Unexpected
        }
        UpstreamError::Fetch(FetchError::Timeout(_)) => FailureType::Unexpected,
        UpstreamError::Fetch(_) => FailureType::Unknown,
        UpstreamError::Format(_) | UpstreamError::XmlParse(_) | UpstreamError::ErrorBody(_) => {
            FailureType::Unexpected
        }
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log an FDSN failure at a level chosen by its classification.
pub fn log_fdsn_failure(event_id: Option<&str>, operation: &str, err: &UpstreamError) {
    let failure_type = classify_fdsn_failure(err);
    let event_id = event_id.unwrap_or("-");
    let source = DataSource::Fdsn;

    match failure_type {
        FailureType::Expected => tracing::debug!(
            source = %source, event_id, failure = %failure_type, error = %err,
            "{} failed", operation
        ),
        FailureType::Unexpected => tracing::error!(
            source = %source, event_id, failure = %failure_type, error = %err,
            "{} failed", operation
        ),
        FailureType::Unknown => tracing::warn!(
            source = %source, event_id, failure = %failure_type, error = %err,
            "{} failed", operation
        ),
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Level a run summary is logged at.
pub fn summary_level(result: &ImportResult) -> tracing::Level {
    if result.success {
        tracing::Level::INFO
    } else if result.aborted {
        tracing::Level::ERROR
    } else {
        tracing::Level::WARN
    }
}

pub fn log_import_summary(result: &ImportResult) {
    let source = DataSource::Pipeline;
    let message = format!(
        "Import complete: {} fetched, {} new, {} updated, {} skipped, {} errors",
        result.total_fetched,
        result.new_events,
        result.updated_events,
        result.skipped_events,
        result.errors.len()
    );
    let catalogue_id = result.catalogue_id.as_deref().unwrap_or("-");
    let level = summary_level(result);

    if level == tracing::Level::INFO {
        tracing::info!(source = %source, catalogue_id, duration_ms = result.duration_ms, "{}", message);
    } else if level == tracing::Level::ERROR {
        tracing::error!(
            source = %source, catalogue_id, duration_ms = result.duration_ms,
            errors = ?result.errors, "{}", message
        );
    } else {
        tracing::warn!(
            source = %source, catalogue_id, duration_ms = result.duration_ms,
            errors = ?result.errors, "{}", message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_failure_classification() {
        let no_data = UpstreamError::Fetch(FetchError::Http {
            status: 404,
            body: String::new(),
        });
        assert_eq!(classify_fdsn_failure(&no_data), FailureType::Expected);
        assert_eq!(
            classify_fdsn_failure(&UpstreamError::CircuitOpen("geonet-fdsn".into())),
            FailureType::Expected
        );

        let server = UpstreamError::Fetch(FetchError::Http {
            status: 503,
            body: String::new(),
        });
        assert_eq!(classify_fdsn_failure(&server), FailureType::Unexpected);
        assert_eq!(
            classify_fdsn_failure(&UpstreamError::Fetch(FetchError::Timeout(Duration::from_secs(30)))),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_fdsn_failure(&UpstreamError::XmlParse("eof".into())),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_fdsn_failure(&UpstreamError::Fetch(FetchError::Network("reset".into()))),
            FailureType::Unknown
        );
    }

    #[test]
    fn test_summary_level_follows_outcome() {
        let mut result = ImportResult::default();
        result.success = true;
        assert_eq!(summary_level(&result), tracing::Level::INFO);

        result.success = false;
        result.catalogue_id = Some("cat".into());
        result.total_fetched = 3;
        result.errors = vec!["insert a: duplicate".into()];
        assert_eq!(summary_level(&result), tracing::Level::WARN);

        let aborted = ImportResult {
            aborted: true,
            errors: vec!["fetch failed: HTTP error: 500".into()],
            ..ImportResult::default()
        };
        assert_eq!(summary_level(&aborted), tracing::Level::ERROR);
    }

    #[test]
    fn test_data_source_labels() {
        assert_eq!(DataSource::Fdsn.to_string(), "FDSN");
        assert_eq!(DataSource::System.to_string(), "SYS");
    }
}
