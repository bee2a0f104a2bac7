//! Horizontal distance between fixes.

use geo::{Distance, Haversine, Point};

use crate::types::LocationFix;

/// Great-circle distance between two fixes in meters.
///
/// Altitude is ignored; only latitude and longitude contribute.
pub fn distance_meters(from: &LocationFix, to: &LocationFix) -> f64 {
    let a = Point::new(from.longitude, from.latitude);
    let b = Point::new(to.longitude, to.latitude);
    Haversine::distance(a, b)
}
