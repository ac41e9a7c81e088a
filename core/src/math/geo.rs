//! Great-circle helpers for consecutive track positions.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLon {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Haversine distance in kilometres.
pub fn haversine_km(a: LatLon, b: LatLon) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for near-antipodal points.
    2.0 * EARTH_RADIUS_KM * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Initial great-circle bearing from `a` to `b` in radians, clockwise from
/// north. Coincident points have no bearing.
pub fn bearing_rad(a: LatLon, b: LatLon) -> Option<f64> {
    if a == b {
        return None;
    }
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    if x == 0.0 && y == 0.0 {
        return None;
    }
    Some(y.atan2(x))
}

/// Wraps an angle difference into (-π, π].
pub fn normalize_angle(delta: f64) -> f64 {
    let wrapped = delta.sin().atan2(delta.cos());
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}

/// Signed heading change at `curr` between the legs `prev -> curr` and
/// `curr -> next`. `None` when either leg has zero length.
pub fn turning_angle(prev: LatLon, curr: LatLon, next: LatLon) -> Option<f64> {
    let incoming = bearing_rad(prev, curr)?;
    let outgoing = bearing_rad(curr, next)?;
    Some(normalize_angle(outgoing - incoming))
}

/// Speed in km/day for a step covered in `elapsed_hours`. Degenerate or
/// duplicate timestamps yield zero instead of a division error.
pub fn speed_km_day(step_km: f64, elapsed_hours: f64) -> f64 {
    if elapsed_hours <= 0.0 || !step_km.is_finite() {
        return 0.0;
    }
    step_km / elapsed_hours * 24.0
}
