//! FDSN text (pipe-delimited) response parser.
//!
//! ```text
//! #EventID|Time|Latitude|Longitude|Depth/km|Author|Catalog|Contributor|ContributorID|MagType|Magnitude|MagAuthor|EventLocationName|EventType
//! 2024p804906|2024-10-24T01:00:00.123|-41.3|174.8|22.1|||||MLv|5.2||Wellington|earthquake
//! ```
//!
//! The header decides column positions, so upstream column order changes
//! are harmless. A header missing a required column rejects the whole
//! response; a bad data row is skipped and reported, never fatal.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::UpstreamError;
use crate::model::QuakeRow;

// ---------------------------------------------------------------------------
// Row outcome
// ---------------------------------------------------------------------------

/// Why a data row was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    TooFewColumns { found: usize, header: usize },
    MissingField(&'static str),
    InvalidNumber { field: &'static str, value: String },
    InvalidTime(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooFewColumns { found, header } => {
                write!(f, "{} columns, header has {}", found, header)
            }
            SkipReason::MissingField(field) => write!(f, "missing {}", field),
            SkipReason::InvalidNumber { field, value } => {
                write!(f, "{} is not a number: '{}'", field, value)
            }
            SkipReason::InvalidTime(value) => write!(f, "unparseable time '{}'", value),
        }
    }
}

/// Outcome of one data row.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRow {
    Event(QuakeRow),
    Skipped { line: usize, reason: SkipReason },
}

/// Everything parsed out of one text response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextParse {
    pub rows: Vec<ParsedRow>,
    /// Header-level warnings (optional columns absent).
    pub warnings: Vec<String>,
}

impl TextParse {
    pub fn events(&self) -> impl Iterator<Item = &QuakeRow> {
        self.rows.iter().filter_map(|row| match row {
            ParsedRow::Event(event) => Some(event),
            ParsedRow::Skipped { .. } => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = (usize, &SkipReason)> {
        self.rows.iter().filter_map(|row| match row {
            ParsedRow::Skipped { line, reason } => Some((*line, reason)),
            ParsedRow::Event(_) => None,
        })
    }

    pub fn into_events(self) -> Vec<QuakeRow> {
        self.rows
            .into_iter()
            .filter_map(|row| match row {
                ParsedRow::Event(event) => Some(event),
                ParsedRow::Skipped { .. } => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

struct Columns {
    count: usize,
    event_id: usize,
    time: usize,
    latitude: usize,
    longitude: usize,
    magnitude: usize,
    depth: Option<usize>,
    magnitude_type: Option<usize>,
    event_type: Option<usize>,
    location_name: Option<usize>,
    author: Option<usize>,
    contributor: Option<usize>,
}

/// "Depth/km" → "depthkm", " EventID " → "eventid".
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn parse_header(line: &str) -> Result<(Columns, Vec<String>), UpstreamError> {
    let names: Vec<String> = line.split('|').map(normalize).collect();
    let index: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let find = |aliases: &[&str]| aliases.iter().find_map(|a| index.get(a).copied());

    let mut missing = Vec::new();
    let mut required = |label: &'static str, aliases: &[&str]| {
        let found = find(aliases);
        if found.is_none() {
            missing.push(label);
        }
        found.unwrap_or(0)
    };
    let event_id = required("EventID", &["eventid", "publicid"]);
    let time = required("Time", &["time", "origintime"]);
    let latitude = required("Latitude", &["latitude", "lat"]);
    let longitude = required("Longitude", &["longitude", "lon"]);
    let magnitude = required("Magnitude", &["magnitude", "mag"]);
    if !missing.is_empty() {
        return Err(UpstreamError::Format(format!(
            "header is missing required column(s): {}",
            missing.join(", ")
        )));
    }

    let columns = Columns {
        count: names.len(),
        event_id,
        time,
        latitude,
        longitude,
        magnitude,
        depth: find(&["depthkm", "depth"]),
        magnitude_type: find(&["magtype", "magnitudetype"]),
        event_type: find(&["eventtype"]),
        location_name: find(&["eventlocationname"]),
        author: find(&["author"]),
        contributor: find(&["contributor"]),
    };

    let mut warnings = Vec::new();
    for (label, column) in [
        ("Depth/km", columns.depth),
        ("MagType", columns.magnitude_type),
        ("EventType", columns.event_type),
    ] {
        if column.is_none() {
            warnings.push(format!("header has no {} column", label));
        }
    }
    Ok((columns, warnings))
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Parse an FDSN `format=text` body.
///
/// An empty body is an empty result. Lines beginning with `#` after the
/// header are comments.
pub fn parse_text_response(body: &str) -> Result<TextParse, UpstreamError> {
    let mut lines = body
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let Some((_, header_line)) = lines.next() else {
        return Ok(TextParse::default());
    };
    let (columns, warnings) = parse_header(header_line.trim_start_matches('#'))?;
    for warning in &warnings {
        tracing::warn!(source = "FDSN", "{}", warning);
    }

    let rows = lines
        .filter(|(_, line)| !line.starts_with('#'))
        .map(|(line_no, line)| match parse_row(&columns, line) {
            Ok(event) => ParsedRow::Event(event),
            Err(reason) => {
                tracing::warn!(source = "FDSN", line = line_no, %reason, "skipping row");
                ParsedRow::Skipped {
                    line: line_no,
                    reason,
                }
            }
        })
        .collect();

    Ok(TextParse { rows, warnings })
}

fn parse_row(columns: &Columns, line: &str) -> Result<QuakeRow, SkipReason> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() * 2 < columns.count {
        return Err(SkipReason::TooFewColumns {
            found: fields.len(),
            header: columns.count,
        });
    }

    let get = |idx: usize| fields.get(idx).copied().filter(|s| !s.is_empty());
    let optional = |idx: Option<usize>| idx.and_then(get).map(str::to_string);
    let number = |field: &'static str, idx: usize| -> Result<f64, SkipReason> {
        let raw = get(idx).ok_or(SkipReason::MissingField(field))?;
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| SkipReason::InvalidNumber {
                field,
                value: raw.to_string(),
            })
    };

    let source_event_id = get(columns.event_id).ok_or(SkipReason::MissingField("EventID"))?;
    let raw_time = get(columns.time).ok_or(SkipReason::MissingField("Time"))?;
    let time = parse_time(raw_time).ok_or_else(|| SkipReason::InvalidTime(raw_time.to_string()))?;
    let latitude = number("Latitude", columns.latitude)?;
    let longitude = number("Longitude", columns.longitude)?;
    let magnitude = number("Magnitude", columns.magnitude)?;

    Ok(QuakeRow {
        source_event_id: source_event_id.to_string(),
        time,
        latitude,
        longitude,
        depth_km: columns
            .depth
            .and_then(get)
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite()),
        magnitude,
        magnitude_type: optional(columns.magnitude_type),
        event_type: optional(columns.event_type),
        location_name: optional(columns.location_name),
        author: optional(columns.author),
        contributor: optional(columns.contributor),
    })
}

/// FDSN times are UTC; offsets are honoured when present.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.fZ"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
