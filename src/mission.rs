//! # Mission Module
//!
//! Waypoint lists correlated with a replayed flight. Missions are read from
//! JSON:
//!
//! ```json
//! {
//!   "meta": { "generator": "mwp" },
//!   "mission": [
//!     { "no": 1, "action": "WAYPOINT", "lat": 54.1, "lon": -4.6, "alt": 50 },
//!     { "no": 2, "action": "RTH", "p1": 1 }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{FlightLogError, Result};
use crate::geo::Obfuscator;

/// Action code used for actions the map does not know
pub const DEFAULT_ACTION_CODE: u8 = 1;

/// Mission action names and their wire codes
pub const ACTION_MAP: &[(&str, u8)] = &[
    ("WAYPOINT", 1),
    ("POSHOLD_UNLIM", 2),
    ("POSHOLD_TIME", 3),
    ("RTH", 4),
    ("SET_POI", 5),
    ("JUMP", 6),
    ("SET_HEAD", 7),
    ("LAND", 8),
];

/// Code for a mission action name
///
/// Unknown actions map to [`DEFAULT_ACTION_CODE`].
///
/// # Examples
///
/// ```
/// use flightlog_replay::mission::action_code;
///
/// assert_eq!(action_code("RTH"), 4);
/// assert_eq!(action_code("LOITER"), 1);
/// ```
pub fn action_code(action: &str) -> u8 {
    ACTION_MAP
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(action))
        .map(|(_, code)| *code)
        .unwrap_or(DEFAULT_ACTION_CODE)
}

/// One mission step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionItem {
    /// 1-based step number
    #[serde(default)]
    pub no: u32,

    /// Action name (`WAYPOINT`, `RTH`, ...)
    pub action: String,

    #[serde(default)]
    pub lat: f64,

    #[serde(default)]
    pub lon: f64,

    /// Altitude in metres
    #[serde(default)]
    pub alt: i32,

    #[serde(default)]
    pub p1: i32,

    #[serde(default)]
    pub p2: i32,

    #[serde(default)]
    pub p3: i32,
}

impl MissionItem {
    /// Wire code for this item's action
    pub fn action_code(&self) -> u8 {
        action_code(&self.action)
    }

    /// True if the item carries a real position
    pub fn is_geo_point(&self) -> bool {
        !matches!(self.action_code(), 4 | 6 | 7)
    }
}

/// Optional descriptive block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionMeta {
    #[serde(default)]
    pub generator: String,

    #[serde(default)]
    pub details: Option<String>,
}

/// A waypoint mission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    #[serde(default)]
    pub meta: MissionMeta,

    #[serde(rename = "mission")]
    pub items: Vec<MissionItem>,
}

impl Mission {
    /// Load a mission from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON, or holds
    /// no mission items
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mission = Self::from_json(&contents)?;
        debug!("Loaded {} mission items from {}", mission.items.len(), path.display());
        Ok(mission)
    }

    /// Parse a mission from JSON text
    ///
    /// Items without a step number are numbered by position.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut mission: Mission = serde_json::from_str(json)?;
        if mission.items.is_empty() {
            return Err(FlightLogError::Mission("mission has no items".to_string()));
        }
        for (i, item) in mission.items.iter_mut().enumerate() {
            if item.no == 0 {
                item.no = i as u32 + 1;
            }
            if item.action_code() == DEFAULT_ACTION_CODE && !item.action.eq_ignore_ascii_case("WAYPOINT") {
                warn!("Unknown mission action {:?} at step {}, using WAYPOINT", item.action, item.no);
            }
        }
        Ok(mission)
    }

    /// Move every positional item by the obfuscation offset
    pub fn obfuscate(&mut self, obfuscator: &Obfuscator) {
        if !obfuscator.is_enabled() {
            return;
        }
        for item in self.items.iter_mut().filter(|i| i.is_geo_point()) {
            let (lat, lon) = obfuscator.apply(item.lat, item.lon);
            item.lat = lat;
            item.lon = lon;
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MISSION_JSON: &str = r#"{
        "meta": { "generator": "test" },
        "mission": [
            { "no": 1, "action": "WAYPOINT", "lat": 54.125, "lon": -4.75, "alt": 50, "p1": 0 },
            { "no": 2, "action": "POSHOLD_TIME", "lat": 54.126, "lon": -4.751, "alt": 60, "p1": 30 },
            { "no": 3, "action": "RTH", "p1": 1 }
        ]
    }"#;

    #[test]
    fn test_action_codes() {
        assert_eq!(action_code("WAYPOINT"), 1);
        assert_eq!(action_code("POSHOLD_UNLIM"), 2);
        assert_eq!(action_code("SET_HEAD"), 7);
        assert_eq!(action_code("LAND"), 8);
        assert_eq!(action_code("land"), 8, "Lookup ignores case");
        assert_eq!(action_code("FLY_TO_MOON"), DEFAULT_ACTION_CODE);
    }

    #[test]
    fn test_from_json() {
        let mission = Mission::from_json(MISSION_JSON).unwrap();
        assert_eq!(mission.len(), 3);
        assert_eq!(mission.meta.generator, "test");
        assert_eq!(mission.items[1].action_code(), 3);
        assert_eq!(mission.items[1].p1, 30);
        assert_eq!(mission.items[2].lat, 0.0, "Missing position defaults to zero");
    }

    #[test]
    fn test_missing_step_numbers_are_filled() {
        let mission = Mission::from_json(r#"{"mission":[{"action":"WAYPOINT"},{"action":"LAND"}]}"#).unwrap();
        assert_eq!(mission.items[0].no, 1);
        assert_eq!(mission.items[1].no, 2);
    }

    #[test]
    fn test_empty_mission_rejected() {
        let result = Mission::from_json(r#"{"mission":[]}"#);
        assert!(matches!(result, Err(FlightLogError::Mission(_))), "Got {:?}", result);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(Mission::from_json("not json"), Err(FlightLogError::Json(_))));
    }

    #[test]
    fn test_geo_points() {
        let mission = Mission::from_json(MISSION_JSON).unwrap();
        assert!(mission.items[0].is_geo_point());
        assert!(!mission.items[2].is_geo_point(), "RTH has no position");
    }

    #[test]
    fn test_obfuscate_moves_only_geo_points() {
        let mut mission = Mission::from_json(MISSION_JSON).unwrap();
        let obfuscator = Obfuscator::new(true, 7);
        let expected = obfuscator.apply(54.125, -4.75);

        mission.obfuscate(&obfuscator);

        assert_eq!((mission.items[0].lat, mission.items[0].lon), expected);
        assert_eq!(mission.items[2].lat, 0.0, "RTH untouched");
    }

    #[test]
    fn test_obfuscate_disabled_is_identity() {
        let mut mission = Mission::from_json(MISSION_JSON).unwrap();
        let before = mission.clone();
        mission.obfuscate(&Obfuscator::disabled());
        assert_eq!(mission, before);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MISSION_JSON.as_bytes()).unwrap();

        let mission = Mission::load(file.path()).unwrap();
        assert_eq!(mission.len(), 3);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(Mission::load("/nonexistent/mission.json"), Err(FlightLogError::Io(_))));
    }
}
