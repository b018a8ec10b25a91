//! Named query regions for New Zealand imports.
//!
//! A region is a latitude/longitude box plus an optional depth band. The
//! CLI and config select one by slug instead of spelling out four
//! coordinates. This is the single source of truth for region bounds.

use crate::model::GeoBounds;

/// One preset query region.
pub struct Region {
    /// Lowercase, hyphenated identifier (`north-island`).
    pub slug: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub bounds: GeoBounds,
    /// Depth band in km, when the region is about depth rather than area.
    pub min_depth_km: Option<f64>,
    pub max_depth_km: Option<f64>,
}

/// All preset regions, broadest last.
pub static REGION_REGISTRY: &[Region] = &[
    Region {
        slug: "north-island",
        name: "North Island",
        description: "North Island and near-shore waters, including the \
                      Taupo Volcanic Zone and the Hikurangi margin.",
        bounds: GeoBounds {
            min_latitude: -41.7,
            max_latitude: -34.0,
            min_longitude: 172.5,
            max_longitude: 179.0,
        },
        min_depth_km: None,
        max_depth_km: None,
    },
    Region {
        slug: "south-island",
        name: "South Island",
        description: "South Island, Stewart Island and Cook Strait's southern shore. \
                      Covers the Alpine Fault and Kaikoura ranges.",
        bounds: GeoBounds {
            min_latitude: -47.5,
            max_latitude: -40.4,
            min_longitude: 166.0,
            max_longitude: 174.6,
        },
        min_depth_km: None,
        max_depth_km: None,
    },
    Region {
        slug: "nz-deep",
        name: "New Zealand deep events",
        description: "Intermediate and deep events under the whole country, \
                      mostly the subducting Pacific slab.",
        bounds: GeoBounds {
            min_latitude: -48.0,
            max_latitude: -34.0,
            min_longitude: 165.0,
            max_longitude: 180.0,
        },
        min_depth_km: Some(100.0),
        max_depth_km: None,
    },
    Region {
        slug: "new-zealand",
        name: "New Zealand",
        description: "GeoNet's standard New Zealand region.",
        bounds: GeoBounds {
            min_latitude: -49.5,
            max_latitude: -32.0,
            min_longitude: 163.0,
            max_longitude: 180.0,
        },
        min_depth_km: None,
        max_depth_km: None,
    },
];

pub fn all_region_slugs() -> Vec<&'static str> {
    REGION_REGISTRY.iter().map(|r| r.slug).collect()
}

/// Case-insensitive lookup; underscores are accepted for hyphens.
pub fn find_region(slug: &str) -> Option<&'static Region> {
    let wanted = slug.trim().to_ascii_lowercase().replace('_', "-");
    REGION_REGISTRY.iter().find(|r| r.slug == wanted)
}
