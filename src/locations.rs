use serde::{Deserialize, Serialize};

use crate::store::LocationId;

/// Decimal places kept for stored coordinates. Lookups match exactly at this precision.
pub const COORDINATE_DECIMALS: i32 = 6;

/// Spatial reference of stored geometries (WGS 84).
pub const SRID: i32 = 4326;

/// A WGS 84 coordinate pair quantised to [`COORDINATE_DECIMALS`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: round_to(latitude, COORDINATE_DECIMALS),
            longitude: round_to(longitude, COORDINATE_DECIMALS),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Coarser copy, e.g. the 4 decimals reported by the GPS receiver.
    pub fn rounded(&self, decimals: i32) -> Self {
        Self {
            latitude: round_to(self.latitude, decimals),
            longitude: round_to(self.longitude, decimals),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Integer identity of the pair, exact at the stored precision.
    pub fn key(&self) -> (i64, i64) {
        let scale = 10f64.powi(COORDINATE_DECIMALS);
        (
            (self.latitude * scale).round() as i64,
            (self.longitude * scale).round() as i64,
        )
    }

    /// Extended WKT of the point, longitude first as PostGIS expects.
    pub fn to_ewkt(&self) -> String {
        format!("SRID={};POINT({} {})", SRID, self.longitude, self.latitude)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let rounded = (value * scale).round() / scale;
    // collapse -0.0 so 0°W and 0°E are the same point
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// A stored, deduplicated geographic point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub coordinates: Coordinates,
    pub geometry: String,
}
