//! # Geodetic Engine
//!
//! Great-circle course/distance, a flat-earth speed estimate, bearing
//! re-basing for ground-station sinks, privacy obfuscation and elevation
//! lookup delegation.

pub mod elevation;
pub mod obfuscate;

pub use elevation::{ElevationService, NoElevation};
pub use obfuscate::Obfuscator;

use std::f64::consts::PI;

/// Mean earth radius in metres used by the flat-earth estimate
pub const EARTH_RADIUS_M: f64 = 6_371_009.0;

/// Nautical miles per radian of arc
const RAD_TO_NM: f64 = (180.0 * 60.0) / PI;

/// Great-circle course and distance between two positions
///
/// # Arguments
///
/// * `lat1`, `lon1` - Origin in degrees
/// * `lat2`, `lon2` - Destination in degrees
///
/// # Returns
///
/// * `(f64, f64)` - Initial bearing in degrees `[0, 360)` and distance in
///   nautical miles (multiply by [`crate::types::METRES_PER_NM`] for metres)
///
/// # Examples
///
/// ```
/// use flightlog_replay::geo::course_distance;
///
/// // One minute of latitude due north is one nautical mile
/// let (cse, dist) = course_distance(50.0, -1.0, 50.0 + 1.0 / 60.0, -1.0);
/// assert!(cse.abs() < 1e-6);
/// assert!((dist - 1.0).abs() < 1e-6);
/// ```
pub fn course_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    let lat1 = lat1.to_radians();
    let lon1 = lon1.to_radians();
    let lat2 = lat2.to_radians();
    let lon2 = lon2.to_radians();

    let p1 = ((lat1 - lat2) / 2.0).sin();
    let p2 = lat1.cos() * lat2.cos();
    let p3 = ((lon2 - lon1) / 2.0).sin();
    let dist = 2.0 * (p1 * p1 + p2 * p3 * p3).sqrt().asin() * RAD_TO_NM;

    let y = (lon2 - lon1).sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * (lon2 - lon1).cos();
    let mut cse = (y.atan2(x) % (2.0 * PI)).to_degrees();
    if cse < 0.0 {
        cse += 360.0;
    }

    (cse, dist)
}

/// Small-angle planar speed estimate between two fixes
///
/// Only meaningful at flight-log scales. Returns 0 when there is no
/// previous fix or `dt_secs` is not positive.
///
/// # Arguments
///
/// * `lat`, `lon` - Current fix in degrees
/// * `prev` - Previous fix in degrees, if any
/// * `dt_secs` - Seconds between the fixes
///
/// # Returns
///
/// * `f64` - Ground speed in m/s
pub fn flat_earth_speed(lat: f64, lon: f64, prev: Option<(f64, f64)>, dt_secs: f64) -> f64 {
    let Some((plat, plon)) = prev else {
        return 0.0;
    };
    if dt_secs <= 0.0 {
        return 0.0;
    }

    let x = ((lon - plon).to_radians() * lat.to_radians().cos()).abs();
    let y = (lat - plat).to_radians().abs();
    (x * x + y * y).sqrt() * EARTH_RADIUS_M / dt_secs
}

/// Convert a bearing-from-home into the reciprocal convention some
/// ground stations expect (`180 - bearing`, wrapped into `[0, 360)`)
pub fn rebase_bearing(bearing: i32) -> i32 {
    (180 - bearing).rem_euclid(360)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_course_distance_same_point() {
        let (_, dist) = course_distance(51.5, -0.12, 51.5, -0.12);
        assert_eq!(dist, 0.0);
    }

    #[test]
    fn test_course_due_east_on_equator() {
        let (cse, dist) = course_distance(0.0, 0.0, 0.0, 1.0);
        assert!((cse - 90.0).abs() < 1e-6, "Course should be 90, got {}", cse);
        assert!((dist - 60.0).abs() < 1e-6, "One degree of equator is 60 nm, got {}", dist);
    }

    #[test]
    fn test_course_due_south_and_west() {
        let (cse, _) = course_distance(10.0, 10.0, 9.0, 10.0);
        assert!((cse - 180.0).abs() < 1e-6);

        let (cse, _) = course_distance(0.0, 10.0, 0.0, 9.0);
        assert!((cse - 270.0).abs() < 1e-6);
    }

    #[test]
    fn test_flat_earth_speed_without_previous_fix() {
        assert_eq!(flat_earth_speed(50.0, 1.0, None, 1.0), 0.0);
    }

    #[test]
    fn test_flat_earth_speed_zero_dt() {
        assert_eq!(flat_earth_speed(50.0, 1.0, Some((50.001, 1.0)), 0.0), 0.0);
    }

    #[test]
    fn test_flat_earth_speed_matches_great_circle() {
        let (lat, lon) = (45.0, 7.0);
        let prev = (45.0, 7.001);
        let spd = flat_earth_speed(lat, lon, Some(prev), 2.0);

        let (_, nm) = course_distance(prev.0, prev.1, lat, lon);
        let expected = nm * crate::types::METRES_PER_NM / 2.0;
        assert!((spd - expected).abs() / expected < 0.01, "{} vs {}", spd, expected);
    }

    #[test]
    fn test_rebase_bearing() {
        assert_eq!(rebase_bearing(0), 180);
        assert_eq!(rebase_bearing(90), 90);
        assert_eq!(rebase_bearing(180), 0);
        assert_eq!(rebase_bearing(270), 270);
        assert_eq!(rebase_bearing(359), 181);
    }
}
