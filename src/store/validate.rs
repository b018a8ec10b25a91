//! Range checks applied at the storage boundary.
//!
//! Values outside these ranges are rejected, never clamped.

use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::model::{CatalogueEvent, EventUpdate};

pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);
pub const MAGNITUDE_RANGE: (f64, f64) = (-2.0, 10.0);
pub const DEPTH_RANGE_KM: (f64, f64) = (-5.0, 1000.0);

/// How far past `now` an event time may be (clock skew upstream).
pub const MAX_FUTURE_DAYS: i64 = 1;

fn check_range(field: &str, value: f64, (min, max): (f64, f64)) -> Result<(), String> {
    if !value.is_finite() {
        return Err(format!("{field} is not a finite number"));
    }
    if value < min || value > max {
        return Err(format!("{field} {value} outside [{min}, {max}]"));
    }
    Ok(())
}

fn check_time(time: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), String> {
    if time > now + Duration::days(MAX_FUTURE_DAYS) {
        return Err(format!("time {} is in the future", time.to_rfc3339()));
    }
    Ok(())
}

pub fn validate_event(event: &CatalogueEvent, now: DateTime<Utc>) -> Result<(), StoreError> {
    let checks = || -> Result<(), String> {
        if event.source_id.trim().is_empty() {
            return Err("source id is empty".to_string());
        }
        check_range("latitude", event.latitude, LATITUDE_RANGE)?;
        check_range("longitude", event.longitude, LONGITUDE_RANGE)?;
        check_range("magnitude", event.magnitude, MAGNITUDE_RANGE)?;
        if let Some(depth) = event.depth_km {
            check_range("depth", depth, DEPTH_RANGE_KM)?;
        }
        check_time(event.time, now)
    };
    checks().map_err(|reason| StoreError::Validation {
        source_id: event.source_id.clone(),
        reason,
    })
}

/// Fail on the first invalid record; the caller writes nothing in that case.
pub fn validate_batch(events: &[CatalogueEvent], now: DateTime<Utc>) -> Result<(), StoreError> {
    events.iter().try_for_each(|e| validate_event(e, now))
}

/// Check only the fields an update sets.
pub fn validate_update(
    event_id: &str,
    update: &EventUpdate,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let checks = || -> Result<(), String> {
        if let Some(lat) = update.latitude {
            check_range("latitude", lat, LATITUDE_RANGE)?;
        }
        if let Some(lon) = update.longitude {
            check_range("longitude", lon, LONGITUDE_RANGE)?;
        }
        if let Some(mag) = update.magnitude {
            check_range("magnitude", mag, MAGNITUDE_RANGE)?;
        }
        if let Some(depth) = update.depth_km {
            check_range("depth", depth, DEPTH_RANGE_KM)?;
        }
        match update.time {
            Some(time) => check_time(time, now),
            None => Ok(()),
        }
    };
    checks().map_err(|reason| StoreError::Validation {
        source_id: event_id.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuakeRow;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 24, 12, 0, 0).unwrap()
    }

    fn event(lat: f64, lon: f64, mag: f64, depth: Option<f64>) -> CatalogueEvent {
        let mut row = QuakeRow::new("2024p804906", now(), lat, lon, mag);
        row.depth_km = depth;
        CatalogueEvent::from_row("cat-1", &row, None, now())
    }

    #[test]
    fn test_accepts_typical_nz_event() {
        assert!(validate_event(&event(-41.3, 174.8, 5.2, Some(22.1)), now()).is_ok());
        assert!(validate_event(&event(-41.3, 174.8, -1.5, None), now()).is_ok());
    }

    #[test]
    fn test_range_edges_are_inclusive() {
        assert!(validate_event(&event(-90.0, 180.0, 10.0, Some(1000.0)), now()).is_ok());
        assert!(validate_event(&event(90.0, -180.0, -2.0, Some(-5.0)), now()).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let cases = [
            event(-91.0, 174.8, 5.0, None),
            event(-41.0, 180.5, 5.0, None),
            event(-41.0, 174.8, 10.1, None),
            event(-41.0, 174.8, 5.0, Some(1200.0)),
            event(f64::NAN, 174.8, 5.0, None),
        ];
        for case in &cases {
            let err = validate_event(case, now()).unwrap_err();
            assert!(matches!(err, StoreError::Validation { .. }), "{err}");
        }
    }

    #[test]
    fn test_rejects_far_future_time() {
        let mut e = event(-41.3, 174.8, 5.2, None);
        e.time = now() + Duration::hours(23);
        assert!(validate_event(&e, now()).is_ok());
        e.time = now() + Duration::days(2);
        let err = validate_event(&e, now()).unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn test_batch_reports_first_invalid_record() {
        let mut bad = event(-41.3, 174.8, 12.0, None);
        bad.source_id = "2024p000002".into();
        let batch = vec![event(-41.3, 174.8, 5.2, None), bad, event(-95.0, 0.0, 1.0, None)];

        match validate_batch(&batch, now()) {
            Err(StoreError::Validation { source_id, reason }) => {
                assert_eq!(source_id, "2024p000002");
                assert!(reason.starts_with("magnitude"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_update_checks_only_set_fields() {
        let row = QuakeRow::new("x", now(), -41.3, 174.8, 5.2);
        let mut update = EventUpdate::from_row(&row, None, now());
        assert!(validate_update("evt", &update, now()).is_ok());
        update.latitude = Some(200.0);
        assert!(validate_update("evt", &update, now()).is_err());
        update.latitude = None;
        assert!(validate_update("evt", &update, now()).is_ok());
    }
}
