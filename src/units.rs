//! # Unit Normalization
//!
//! Converts unit-tagged telemetry values to SI (m, m/s, A).
//!
//! Units arrive as the text between parentheses of a CSV column header,
//! e.g. `GSpd(kmh)` or `Alt(ft)`. Unknown or absent units are taken to be
//! SI already and pass through unchanged.

/// Metres per foot
pub const METRES_PER_FOOT: f64 = 0.3048;

/// m/s per mile per hour
pub const MS_PER_MPH: f64 = 0.44704;

/// m/s per knot
pub const MS_PER_KNOT: f64 = 0.514_444_44;

/// km/h per m/s
pub const KMH_PER_MS: f64 = 3.6;

/// A recognized non-SI unit tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Kilometres per hour
    Kmh,
    /// Miles per hour
    Mph,
    /// Knots
    Knots,
    /// Feet
    Feet,
    /// Milliamps
    MilliAmps,
}

impl Unit {
    /// Parse a unit tag as it appears in a column header
    ///
    /// Returns `None` for tags that need no conversion (`m`, `V`, `A`, ...)
    /// and for anything unrecognized.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "kmh" => Some(Unit::Kmh),
            "mph" => Some(Unit::Mph),
            "kts" => Some(Unit::Knots),
            "ft" => Some(Unit::Feet),
            "mA" => Some(Unit::MilliAmps),
            _ => None,
        }
    }

    /// Convert a value in this unit to its SI equivalent
    pub fn to_si(self, value: f64) -> f64 {
        match self {
            Unit::Kmh => value / KMH_PER_MS,
            Unit::Mph => value * MS_PER_MPH,
            Unit::Knots => value * MS_PER_KNOT,
            Unit::Feet => value * METRES_PER_FOOT,
            Unit::MilliAmps => value / 1000.0,
        }
    }
}

/// Normalize a value using the unit tag parsed from a header
///
/// # Arguments
///
/// * `value` - Raw value from the log
/// * `tag` - Unit tag (may be empty)
///
/// # Returns
///
/// * `f64` - Value in SI units
///
/// # Examples
///
/// ```
/// use flightlog_replay::units::normalise;
///
/// assert!((normalise(36.0, "kmh") - 10.0).abs() < 1e-9);
/// assert_eq!(normalise(12.0, "m"), 12.0);
/// ```
pub fn normalise(value: f64, tag: &str) -> f64 {
    match Unit::parse(tag) {
        Some(unit) => unit.to_si(value),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmh_to_ms() {
        assert!((normalise(36.0, "kmh") - 10.0).abs() < 1e-9, "36 km/h should be 10 m/s");
    }

    #[test]
    fn test_knots_to_ms() {
        assert!((normalise(10.0, "kts") - 5.1444).abs() < 1e-4, "10 kts should be 5.1444 m/s");
    }

    #[test]
    fn test_mph_to_ms() {
        assert!((normalise(100.0, "mph") - 44.704).abs() < 1e-9);
    }

    #[test]
    fn test_feet_to_metres() {
        assert!((normalise(1000.0, "ft") - 304.8).abs() < 1e-9);
    }

    #[test]
    fn test_milliamps_to_amps() {
        assert!((normalise(1500.0, "mA") - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_unit_passes_through() {
        assert_eq!(normalise(42.0, ""), 42.0);
        assert_eq!(normalise(42.0, "m"), 42.0);
        assert_eq!(normalise(42.0, "V"), 42.0);
        assert_eq!(Unit::parse("furlongs"), None);
    }
}
