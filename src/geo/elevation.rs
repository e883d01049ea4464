//! Ground elevation lookup seam.
//!
//! The network service itself lives outside this crate; the pipeline only
//! needs "altitude or failure" for a position.

use crate::error::{FlightLogError, Result};

/// Source of ground elevation (metres above sea level)
#[cfg_attr(test, mockall::automock)]
pub trait ElevationService: Send + Sync {
    /// Look up ground elevation at a position
    fn elevation(&self, lat: f64, lon: f64) -> Result<f64>;
}

/// Elevation service that always fails; home altitude stays unknown
#[derive(Debug, Clone, Copy, Default)]
pub struct NoElevation;

impl ElevationService for NoElevation {
    fn elevation(&self, _lat: f64, _lon: f64) -> Result<f64> {
        Err(FlightLogError::Elevation("no elevation service configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_elevation_fails() {
        assert!(NoElevation.elevation(51.0, 0.0).is_err());
    }
}
