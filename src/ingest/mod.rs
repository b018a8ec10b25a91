//! Upstream data sources.
//!
//! - `fdsn`   : breaker-gated GeoNet FDSN event client
//! - `text`   : pipe-delimited event list parser
//! - `quakeml`: QuakeML element tree and focal-mechanism extraction

pub mod fdsn;
pub mod quakeml;
pub mod text;

pub use fdsn::{FdsnClient, FdsnQuery, GEONET_FDSN_BASE_URL, ResponseFormat, fdsn_breaker};
pub use text::{ParsedRow, SkipReason, TextParse};
