//! Great-circle distance math
//!
//! Distances are computed in meters internally and surfaced in kilometers
//! rounded to one decimal place for display.

use crate::model::Position;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine great-circle distance between two positions, in meters
pub fn distance_meters(a: &Position, b: &Position) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Meters to display kilometers, rounded to one decimal
pub fn display_km(meters: f64) -> f64 {
    (meters / 100.0).round() / 10.0
}
