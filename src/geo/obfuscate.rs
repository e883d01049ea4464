//! # Position Obfuscation
//!
//! Shifts every coordinate by one seed-derived offset so published logs do
//! not reveal where the flight took place. Home, track and mission points
//! must all go through the same [`Obfuscator`] to stay consistent.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Maximum latitude shift in degrees
const MAX_LAT_SHIFT: f64 = 20.0;

/// Maximum longitude shift in degrees
const MAX_LON_SHIFT: f64 = 40.0;

/// Deterministic coordinate offset ("frobnication")
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Obfuscator {
    offset: Option<(f64, f64)>,
}

impl Obfuscator {
    /// Create an obfuscator
    ///
    /// # Arguments
    ///
    /// * `enabled` - When false, [`Obfuscator::apply`] is the identity
    /// * `seed` - Offset seed; equal seeds give equal offsets
    pub fn new(enabled: bool, seed: u64) -> Self {
        if !enabled {
            return Self::disabled();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let dlat = rng.gen_range(-MAX_LAT_SHIFT..MAX_LAT_SHIFT);
        let dlon = rng.gen_range(-MAX_LON_SHIFT..MAX_LON_SHIFT);
        Self { offset: Some((dlat, dlon)) }
    }

    /// Identity transform
    pub fn disabled() -> Self {
        Self { offset: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.offset.is_some()
    }

    /// Move a coordinate by the offset
    ///
    /// A latitude pushed past a pole continues over it onto the opposite
    /// meridian; longitude wraps into `[-180, 180)`.
    pub fn apply(&self, lat: f64, lon: f64) -> (f64, f64) {
        match self.offset {
            None => (lat, lon),
            Some((dlat, dlon)) => {
                let mut lat = lat + dlat;
                let mut lon = lon + dlon;
                if lat > 90.0 {
                    lat = 180.0 - lat;
                    lon += 180.0;
                } else if lat < -90.0 {
                    lat = -180.0 - lat;
                    lon += 180.0;
                }
                (lat, (lon + 180.0).rem_euclid(360.0) - 180.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_identity() {
        let obf = Obfuscator::new(false, 1234);
        assert!(!obf.is_enabled());
        assert_eq!(obf.apply(54.353974, -4.5236), (54.353974, -4.5236));
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let a = Obfuscator::new(true, 42);
        let b = Obfuscator::new(true, 42);

        assert_eq!(a.apply(48.9975, 2.5789), b.apply(48.9975, 2.5789));
        assert_eq!(a.apply(48.9975, 2.5789), a.apply(48.9975, 2.5789));
    }

    #[test]
    fn test_enabled_moves_position() {
        let obf = Obfuscator::new(true, 7);
        assert_ne!(obf.apply(10.0, 10.0), (10.0, 10.0));
    }

    #[test]
    fn test_relative_offset_preserved() {
        let obf = Obfuscator::new(true, 99);
        let (lat1, lon1) = obf.apply(45.0, 7.0);
        let (lat2, lon2) = obf.apply(45.001, 7.002);

        assert!(((lat2 - lat1) - 0.001).abs() < 1e-9);
        assert!(((lon2 - lon1) - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_latitude_wraps_over_pole() {
        let north = Obfuscator { offset: Some((10.0, 0.0)) };
        let (lat, lon) = north.apply(85.0, 20.0);
        assert!((lat - 85.0).abs() < 1e-9, "95 N continues to 85 N, got {}", lat);
        assert!((lon - -160.0).abs() < 1e-9, "Opposite meridian, got {}", lon);

        let south = Obfuscator { offset: Some((-10.0, 0.0)) };
        let (lat, lon) = south.apply(-88.0, -170.0);
        assert!((lat - -82.0).abs() < 1e-9, "Got {}", lat);
        assert!((lon - 10.0).abs() < 1e-9, "Got {}", lon);
    }

    #[test]
    fn test_longitude_wraps() {
        let obf = Obfuscator::new(true, 5);
        for lon in [-179.9, 0.0, 179.9] {
            let (_, out) = obf.apply(0.0, lon);
            assert!((-180.0..180.0).contains(&out), "Longitude {} out of range", out);
        }
    }
}
