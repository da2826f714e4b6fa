//! Geofence validation for physical-session attendance proofs.
//!
//! Pure functions only. A malformed location must read as "not within the
//! geofence", never as an error, so a validator failure can never be mistaken
//! for a successful check.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used for the great-circle distance.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Structural check: finite coordinates within WGS84 bounds.
pub fn validate_location(point: &GeoPoint) -> bool {
    point.lat.is_finite()
        && point.lng.is_finite()
        && (-90.0..=90.0).contains(&point.lat)
        && (-180.0..=180.0).contains(&point.lng)
}

/// Great-circle (haversine) distance between two points, in meters.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// True iff both points are structurally valid and the user sits within
/// `radius_meters` of the center. NaN or non-positive radius reads as false.
pub fn is_within_radius(user: &GeoPoint, center: &GeoPoint, radius_meters: f64) -> bool {
    if !validate_location(user) || !validate_location(center) {
        return false;
    }
    if !radius_meters.is_finite() || radius_meters <= 0.0 {
        return false;
    }
    distance_meters(user, center) <= radius_meters
}
