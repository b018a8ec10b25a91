//! GeoNet FDSN earthquake import service.
//!
//! Pulls event batches from the GeoNet FDSN web service through a circuit
//! breaker and a retrying HTTP client, reconciles them into a catalogue
//! store, and enriches significant events with focal mechanisms.

pub mod config;
pub mod error;
pub mod http;
pub mod import;
pub mod ingest;
pub mod limiter;
pub mod logging;
pub mod model;
pub mod regions;
pub mod resilience;
pub mod store;

pub use import::{ImportOptions, ImportResult, Importer};
