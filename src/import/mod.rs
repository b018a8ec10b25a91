//! Import orchestration: one run pulls a filtered batch from FDSN and
//! reconciles it into a catalogue.
//!
//! - `ImportOptions`: what to fetch and how to treat events already stored
//! - `ImportResult`: what happened; always returned, even for aborted runs
//! - `pipeline::Importer`: the run itself

pub mod pipeline;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::ingest::FdsnQuery;
use crate::model::{DEFAULT_LOOKBACK_HOURS, GeoBounds};
use crate::regions::Region;

pub use pipeline::{Importer, ImporterSettings};

/// Upstream sort order for the primary batch.
pub const PRIMARY_ORDER_BY: &str = "time-asc";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeWindow {
    /// `[now - hours, now]`.
    LastHours(u32),
    Between {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Default for TimeWindow {
    fn default() -> Self {
        TimeWindow::LastHours(DEFAULT_LOOKBACK_HOURS)
    }
}

impl TimeWindow {
    /// Concrete `(start, end)` relative to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match *self {
            TimeWindow::LastHours(hours) => (now - Duration::hours(i64::from(hours)), now),
            TimeWindow::Between { start, end } => (start, end),
        }
    }
}

/// Optional upstream filters. Unset means "no constraint".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilters {
    pub min_magnitude: Option<f64>,
    pub max_magnitude: Option<f64>,
    pub min_depth_km: Option<f64>,
    pub max_depth_km: Option<f64>,
    pub bounds: Option<GeoBounds>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOptions {
    pub window: TimeWindow,
    pub filters: EventFilters,
    /// Overwrite events already in the catalogue instead of skipping them.
    pub update_existing: bool,
    pub catalogue_id: Option<String>,
    pub catalogue_name: Option<String>,
}

impl ImportOptions {
    /// Fill bounds and depth band from `region` where not already set.
    pub fn with_region(mut self, region: &Region) -> Self {
        let filters = &mut self.filters;
        filters.bounds.get_or_insert(region.bounds);
        if filters.min_depth_km.is_none() {
            filters.min_depth_km = region.min_depth_km;
        }
        if filters.max_depth_km.is_none() {
            filters.max_depth_km = region.max_depth_km;
        }
        self
    }

    /// Upstream query for the primary batch over `[start, end]`.
    pub fn to_query(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> FdsnQuery {
        FdsnQuery {
            start_time: Some(start),
            end_time: Some(end),
            bounds: self.filters.bounds,
            min_depth: self.filters.min_depth_km,
            max_depth: self.filters.max_depth_km,
            min_magnitude: self.filters.min_magnitude,
            max_magnitude: self.filters.max_magnitude,
            event_id: None,
            order_by: Some(PRIMARY_ORDER_BY.to_string()),
        }
    }
}

/// Outcome of one import run.
///
/// `success` is true exactly when `errors` is empty; skipped and updated
/// counts do not affect it. `aborted` marks runs that stopped before
/// persisting anything (primary fetch or catalogue lookup failed).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportResult {
    pub success: bool,
    pub aborted: bool,
    pub catalogue_id: Option<String>,
    pub catalogue_name: Option<String>,
    pub total_fetched: usize,
    pub new_events: usize,
    pub updated_events: usize,
    pub skipped_events: usize,
    pub errors: Vec<String>,
    /// Effective query window.
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
}
