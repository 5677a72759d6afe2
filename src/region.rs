//! # Region router
//!
//! Pure mapping from a coordinate to a region code and that region's ordered
//! provider priority list.
//!
//! Classification uses coarse hand-drawn polygons (ray casting) plus two
//! bounding boxes:
//! - `CA`: Canada, tested first; it shares its southern edge with the
//!   contiguous US polygon, so border points resolve consistently.
//! - `US`: contiguous states, then Alaska and Hawaii boxes.
//! - anything else: `DEFAULT`.
//!
//! A classified region without a configured priority list falls back to the
//! `DEFAULT` list, which config validation guarantees is non-empty.

use std::collections::BTreeMap;

use crate::config::{FusionConfig, DEFAULT_REGION};
use crate::error::ConfigError;
use crate::model::{Coordinate, LocationInfo};

/// (lat, lon) vertices.
type Ring = &'static [(f64, f64)];

/// US/Canada boundary, west to east.
const US_CA_BORDER: Ring = &[
    (48.4, -124.8),
    (48.3, -123.3),
    (49.0, -123.0),
    (49.0, -95.15),
    (48.0, -89.5),
    (46.5, -84.5),
    (45.3, -82.5),
    (43.0, -82.4),
    (42.3, -83.1),
    (41.7, -82.6),
    (42.5, -79.8),
    (43.1, -79.05),
    (43.6, -76.8),
    (44.2, -76.3),
    (45.0, -74.7),
    (45.0, -71.5),
    (45.3, -71.0),
    (47.3, -68.3),
    (45.2, -67.3),
    (44.6, -66.9),
];

/// Contiguous US outline from the eastern end of the border, clockwise
/// through the Atlantic, Gulf, Mexican border and Pacific.
const US_SOUTH: Ring = &[
    (41.2, -69.8),
    (35.2, -75.4),
    (30.5, -80.9),
    (25.2, -79.9),
    (24.4, -81.8),
    (25.9, -81.7),
    (30.0, -84.0),
    (29.0, -89.0),
    (29.5, -94.5),
    (25.9, -97.1),
    (27.5, -99.5),
    (29.7, -101.4),
    (29.0, -103.2),
    (31.8, -106.5),
    (31.3, -108.2),
    (31.3, -111.0),
    (32.7, -114.7),
    (32.5, -117.1),
    (34.4, -120.7),
    (37.0, -122.6),
    (42.0, -124.6),
    (46.0, -124.2),
];

/// Canada beyond the border: Atlantic, Arctic, Yukon/Alaska line, BC coast.
const CA_NORTH: Ring = &[
    (43.3, -65.5),
    (47.0, -52.0),
    (52.0, -55.0),
    (60.5, -64.5),
    (76.0, -75.0),
    (83.5, -70.0),
    (83.5, -141.0),
    (69.6, -141.0),
    (60.3, -141.0),
    (59.8, -137.5),
    (58.9, -133.4),
    (56.0, -130.0),
    (54.7, -133.5),
    (48.2, -125.5),
];

/// (min_lat, max_lat, min_lon, max_lon)
const ALASKA: (f64, f64, f64, f64) = (51.0, 72.0, -180.0, -129.9);
const HAWAII: (f64, f64, f64, f64) = (18.5, 22.5, -161.0, -154.5);

#[derive(Debug, Clone)]
pub struct RegionRouter {
    us: Vec<(f64, f64)>,
    ca: Vec<(f64, f64)>,
    priorities: BTreeMap<String, Vec<String>>,
}

impl RegionRouter {
    pub fn new(cfg: &FusionConfig) -> Result<Self, ConfigError> {
        Self::with_priorities(cfg.regions.clone())
    }

    pub fn with_priorities(
        priorities: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ConfigError> {
        match priorities.get(DEFAULT_REGION) {
            Some(list) if !list.is_empty() => {}
            _ => return Err(ConfigError::MissingDefaultRegion),
        }

        let us = US_CA_BORDER
            .iter()
            .chain(US_SOUTH.iter())
            .copied()
            .collect();
        let ca = US_CA_BORDER
            .iter()
            .chain(CA_NORTH.iter())
            .copied()
            .collect();

        Ok(Self {
            us,
            ca,
            priorities,
        })
    }

    /// Region code for a coordinate, before priority-list fallback.
    pub fn classify(&self, c: Coordinate) -> &'static str {
        if point_in_ring(c, &self.ca) {
            "CA"
        } else if point_in_ring(c, &self.us) || in_box(c, ALASKA) || in_box(c, HAWAII) {
            "US"
        } else {
            DEFAULT_REGION
        }
    }

    /// Region code and its ordered provider list. Never empty.
    pub fn route(&self, c: Coordinate) -> LocationInfo {
        let classified = self.classify(c);
        let (region, list) = match self.priorities.get(classified) {
            Some(list) if !list.is_empty() => (classified, list),
            _ => (DEFAULT_REGION, &self.priorities[DEFAULT_REGION]),
        };
        LocationInfo {
            region: region.to_string(),
            providers: list.clone(),
        }
    }

    /// Priority list for an already-known region code.
    pub fn priorities_for(&self, region: &str) -> &[String] {
        self.priorities
            .get(region)
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.priorities[DEFAULT_REGION])
    }
}

fn in_box(c: Coordinate, (min_lat, max_lat, min_lon, max_lon): (f64, f64, f64, f64)) -> bool {
    (min_lat..=max_lat).contains(&c.lat) && (min_lon..=max_lon).contains(&c.lon)
}

/// Even-odd ray casting along +lon.
fn point_in_ring(c: Coordinate, ring: &[(f64, f64)]) -> bool {
    let (y, x) = (c.lat, c.lon);
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (yi, xi) = ring[i];
        let (yj, xj) = ring[j];
        if (yi > y) != (yj > y) {
            let x_cross = xi + (y - yi) / (yj - yi) * (xj - xi);
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
