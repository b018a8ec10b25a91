//! Core data types for the seismic catalogue import service.
//!
//! This module defines the shared domain model imported by all other modules.
//! It contains no I/O. Error types live in `error`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Tag written to catalogues created by this pipeline.
pub const IMPORT_SOURCE: &str = "geonet-fdsn";

/// Default relative window when the caller gives no explicit start/end.
pub const DEFAULT_LOOKBACK_HOURS: u32 = 24;

/// Events at or above this magnitude get a focal-mechanism lookup.
pub const ENRICHMENT_MAGNITUDE_THRESHOLD: f64 = 5.0;

// ---------------------------------------------------------------------------
// Upstream rows
// ---------------------------------------------------------------------------

/// One event row from an FDSN text (pipe-delimited) response.
///
/// Only the required fields are guaranteed; everything else is whatever the
/// upstream header happened to carry.
#[derive(Debug, Clone, PartialEq)]
pub struct QuakeRow {
    pub source_event_id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: Option<f64>,
    pub magnitude: f64,
    pub magnitude_type: Option<String>,
    pub event_type: Option<String>,
    pub location_name: Option<String>,
    pub author: Option<String>,
    pub contributor: Option<String>,
}

impl QuakeRow {
    /// Minimal row with the required fields; optional fields are `None`.
    pub fn new(
        source_event_id: impl Into<String>,
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        magnitude: f64,
    ) -> Self {
        Self {
            source_event_id: source_event_id.into(),
            time,
            latitude,
            longitude,
            depth_km: None,
            magnitude,
            magnitude_type: None,
            event_type: None,
            location_name: None,
            author: None,
            contributor: None,
        }
    }

    pub fn qualifies_for_enrichment(&self, threshold: f64) -> bool {
        self.magnitude >= threshold
    }
}

// ---------------------------------------------------------------------------
// Enrichment payload
// ---------------------------------------------------------------------------

/// Strike/dip/rake of one nodal plane, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodalPlane {
    pub strike: f64,
    pub dip: f64,
    pub rake: f64,
}

/// Focal mechanism extracted from a QuakeML `focalMechanism` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocalMechanism {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    pub nodal_plane_1: NodalPlane,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodal_plane_2: Option<NodalPlane>,
}

impl FocalMechanism {
    /// Serialized form stored on `CatalogueEvent::focal_mechanism`.
    pub fn to_payload(&self) -> String {
        // A struct of plain numbers and strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Stored types
// ---------------------------------------------------------------------------

/// Canonical stored representation of an event inside one catalogue.
///
/// `(catalogue_id, source_id)` is the dedup key: a given upstream event id
/// appears at most once per catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEvent {
    pub id: String,
    pub catalogue_id: String,
    pub source_id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: Option<f64>,
    pub magnitude: f64,
    pub magnitude_type: Option<String>,
    pub event_type: Option<String>,
    pub location_name: Option<String>,
    /// Serialized `FocalMechanism`, when enrichment succeeded.
    pub focal_mechanism: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogueEvent {
    /// Build a fresh event for first sight of `row` in `catalogue_id`.
    pub fn from_row(
        catalogue_id: &str,
        row: &QuakeRow,
        focal_mechanism: Option<&FocalMechanism>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            catalogue_id: catalogue_id.to_string(),
            source_id: row.source_event_id.clone(),
            time: row.time,
            latitude: row.latitude,
            longitude: row.longitude,
            depth_km: row.depth_km,
            magnitude: row.magnitude,
            magnitude_type: row.magnitude_type.clone(),
            event_type: row.event_type.clone(),
            location_name: row.location_name.clone(),
            focal_mechanism: focal_mechanism.map(FocalMechanism::to_payload),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &EventUpdate) {
        if let Some(time) = update.time {
            self.time = time;
        }
        if let Some(latitude) = update.latitude {
            self.latitude = latitude;
        }
        if let Some(longitude) = update.longitude {
            self.longitude = longitude;
        }
        if update.depth_km.is_some() {
            self.depth_km = update.depth_km;
        }
        if let Some(magnitude) = update.magnitude {
            self.magnitude = magnitude;
        }
        if update.magnitude_type.is_some() {
            self.magnitude_type = update.magnitude_type.clone();
        }
        if update.event_type.is_some() {
            self.event_type = update.event_type.clone();
        }
        if update.location_name.is_some() {
            self.location_name = update.location_name.clone();
        }
        // A failed enrichment on this run leaves the previous payload alone.
        if update.focal_mechanism.is_some() {
            self.focal_mechanism = update.focal_mechanism.clone();
        }
        self.updated_at = update.updated_at;
    }
}

/// Partial field set for `CatalogueStore::update_event`.
///
/// `None` means "leave unchanged".
#[derive(Debug, Clone, PartialEq)]
pub struct EventUpdate {
    pub time: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub depth_km: Option<f64>,
    pub magnitude: Option<f64>,
    pub magnitude_type: Option<String>,
    pub event_type: Option<String>,
    pub location_name: Option<String>,
    pub focal_mechanism: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EventUpdate {
    /// Every field the upstream row carries, overwriting the stored values.
    pub fn from_row(
        row: &QuakeRow,
        focal_mechanism: Option<&FocalMechanism>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            time: Some(row.time),
            latitude: Some(row.latitude),
            longitude: Some(row.longitude),
            depth_km: row.depth_km,
            magnitude: Some(row.magnitude),
            magnitude_type: row.magnitude_type.clone(),
            event_type: row.event_type.clone(),
            location_name: row.location_name.clone(),
            focal_mechanism: focal_mechanism.map(FocalMechanism::to_payload),
            updated_at: now,
        }
    }
}

/// A named collection of events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalogue {
    pub id: String,
    pub name: String,
    pub description: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Audit record of one import invocation. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: String,
    pub catalogue_id: String,
    /// Effective query window.
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_fetched: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Geographic filters
// ---------------------------------------------------------------------------

/// Latitude/longitude rectangle for an upstream query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl GeoBounds {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_latitude
            && latitude <= self.max_latitude
            && longitude >= self.min_longitude
            && longitude <= self.max_longitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_row() -> QuakeRow {
        let mut row = QuakeRow::new(
            "2024p804906",
            Utc.with_ymd_and_hms(2024, 10, 24, 1, 0, 0).unwrap(),
            -41.3,
            174.8,
            5.2,
        );
        row.depth_km = Some(22.0);
        row.magnitude_type = Some("MLv".to_string());
        row
    }

    #[test]
    fn test_from_row_copies_fields_and_generates_id() {
        let now = Utc.with_ymd_and_hms(2024, 10, 24, 2, 0, 0).unwrap();
        let a = CatalogueEvent::from_row("cat-1", &sample_row(), None, now);
        let b = CatalogueEvent::from_row("cat-1", &sample_row(), None, now);

        assert_eq!(a.source_id, "2024p804906");
        assert_eq!(a.catalogue_id, "cat-1");
        assert_eq!(a.depth_km, Some(22.0));
        assert_eq!(a.created_at, now);
        assert_ne!(a.id, b.id, "each new event gets its own identifier");
    }

    #[test]
    fn test_apply_keeps_existing_focal_mechanism_when_update_has_none() {
        let now = Utc.with_ymd_and_hms(2024, 10, 24, 2, 0, 0).unwrap();
        let fm = FocalMechanism {
            public_id: None,
            nodal_plane_1: NodalPlane { strike: 10.0, dip: 30.0, rake: 90.0 },
            nodal_plane_2: None,
        };
        let mut event = CatalogueEvent::from_row("cat-1", &sample_row(), Some(&fm), now);

        let mut row = sample_row();
        row.magnitude = 5.4;
        let later = now + chrono::Duration::hours(1);
        event.apply(&EventUpdate::from_row(&row, None, later));

        assert_eq!(event.magnitude, 5.4);
        assert_eq!(event.focal_mechanism, Some(fm.to_payload()));
        assert_eq!(event.updated_at, later);
        assert_eq!(event.created_at, now);
    }

    #[test]
    fn test_enrichment_threshold_is_inclusive() {
        let row = sample_row();
        assert!(row.qualifies_for_enrichment(5.2));
        assert!(row.qualifies_for_enrichment(5.0));
        assert!(!row.qualifies_for_enrichment(5.3));
    }

    #[test]
    fn test_focal_mechanism_payload_round_trips() {
        let fm = FocalMechanism {
            public_id: Some("smi:nz.org.geonet/fm/1".to_string()),
            nodal_plane_1: NodalPlane { strike: 212.0, dip: 38.0, rake: 95.0 },
            nodal_plane_2: Some(NodalPlane { strike: 26.0, dip: 52.0, rake: 86.0 }),
        };
        let parsed: FocalMechanism = serde_json::from_str(&fm.to_payload()).unwrap();
        assert_eq!(parsed, fm);
    }
}
