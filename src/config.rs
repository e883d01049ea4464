//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration that decodes, summarizes and does nothing else.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FlightLogError, Result};
use crate::geo::Obfuscator;
use crate::replay::BulletVersion;
use crate::segment::SegmentConfig;
use crate::serial::LTM_BAUD_RATES;

/// Lowest accepted home altitude override (metres)
const MIN_HOME_ALT: f64 = -500.0;

/// Highest accepted home altitude override (metres)
const MAX_HOME_ALT: f64 = 9000.0;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub privacy: PrivacyConfig,

    #[serde(default)]
    pub replay: ReplaySettings,

    #[serde(default)]
    pub ltm: LtmConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Decoding and segmentation
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Split segments on time gaps longer than this (seconds, 0 = never)
    #[serde(default = "default_split_secs")]
    pub split_secs: u64,

    /// Home altitude override (metres)
    #[serde(default)]
    pub home_alt: Option<f64>,

    #[serde(default)]
    pub only_armed: bool,

    /// 0 = every entry, otherwise the 1-based entry to process
    #[serde(default)]
    pub index: usize,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Position obfuscation
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PrivacyConfig {
    #[serde(default)]
    pub obfuscate: bool,

    /// Offset seed (0 = random per run)
    #[serde(default)]
    pub seed: u64,
}

/// Live replay
#[derive(Debug, Deserialize, Clone)]
pub struct ReplaySettings {
    /// "none", "publish" or "ltm"
    #[serde(default = "default_replay_mode")]
    pub mode: String,

    #[serde(default = "default_announce_interval")]
    pub announce_interval: usize,

    /// 1 = decimal text, 2 = fixed point
    #[serde(default = "default_bullet_version")]
    pub bullet_version: u8,

    #[serde(default = "default_callsign")]
    pub callsign: String,

    /// JSON mission file
    #[serde(default)]
    pub mission: Option<PathBuf>,

    /// File receiving line-protocol frames (stdout if unset)
    #[serde(default)]
    pub publish_path: Option<PathBuf>,
}

/// LTM serial output
#[derive(Debug, Deserialize, Clone)]
pub struct LtmConfig {
    /// Serial device path, or "-" for stdout
    #[serde(default)]
    pub device: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Diagnostic logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files (console only if unset)
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub level: String,
}

/// What the run produces
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    /// Raw field dump instead of decoding
    #[serde(default)]
    pub dump: bool,

    /// List entries and stop
    #[serde(default)]
    pub metas: bool,

    /// Print summaries without replay or export
    #[serde(default)]
    pub summary_only: bool,

    /// Write JSONL track and GeoJSON per segment
    #[serde(default)]
    pub export: bool,
}

/// Replay destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    None,
    Publish,
    Ltm,
}

impl ReplayMode {
    /// Parse a configured mode name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" => Some(ReplayMode::None),
            "publish" => Some(ReplayMode::Publish),
            "ltm" => Some(ReplayMode::Ltm),
            _ => None,
        }
    }
}

// Default value functions
fn default_split_secs() -> u64 { 30 }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }

fn default_replay_mode() -> String { "none".to_string() }
fn default_announce_interval() -> usize { 10 }
fn default_bullet_version() -> u8 { 2 }
fn default_callsign() -> String { "JRandomUAV".to_string() }

fn default_baud_rate() -> u32 { 115200 }

fn default_log_level() -> String { "info".to_string() }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            split_secs: default_split_secs(),
            home_alt: None,
            only_armed: false,
            index: 0,
            output_dir: default_output_dir(),
        }
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            mode: default_replay_mode(),
            announce_interval: default_announce_interval(),
            bullet_version: default_bullet_version(),
            callsign: default_callsign(),
            mission: None,
            publish_path: None,
        }
    }
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self { device: String::new(), baud_rate: default_baud_rate() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { dir: None, level: default_log_level() }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flightlog_replay::config::Config;
    ///
    /// let config = Config::load("flightlog.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.replay.announce_interval == 0 {
            return Err(FlightLogError::Config(
                toml::de::Error::custom("announce_interval must be greater than 0")
            ));
        }

        if BulletVersion::from_number(self.replay.bullet_version).is_none() {
            return Err(FlightLogError::Config(
                toml::de::Error::custom("bullet_version must be 1 or 2")
            ));
        }

        let Some(mode) = ReplayMode::parse(&self.replay.mode) else {
            return Err(FlightLogError::Config(
                toml::de::Error::custom("replay mode must be one of: none, publish, ltm")
            ));
        };

        if mode == ReplayMode::Ltm && self.ltm.device.is_empty() {
            return Err(FlightLogError::Config(
                toml::de::Error::custom("ltm device cannot be empty when replay mode is 'ltm'")
            ));
        }

        if !LTM_BAUD_RATES.contains(&self.ltm.baud_rate) {
            return Err(FlightLogError::Config(
                toml::de::Error::custom("baud_rate must be one of: 2400, 4800, 9600, 19200, 38400, 57600, 115200")
            ));
        }

        if let Some(alt) = self.pipeline.home_alt {
            if !(MIN_HOME_ALT..=MAX_HOME_ALT).contains(&alt) {
                return Err(FlightLogError::Config(
                    toml::de::Error::custom("home_alt must be between -500 and 9000 metres")
                ));
            }
        }

        if self.replay.callsign.is_empty() {
            return Err(FlightLogError::Config(
                toml::de::Error::custom("callsign cannot be empty")
            ));
        }

        Ok(())
    }

    /// Replay destination (call after `validate`)
    pub fn replay_mode(&self) -> ReplayMode {
        ReplayMode::parse(&self.replay.mode).unwrap_or(ReplayMode::None)
    }

    /// Bullet encoding (call after `validate`)
    pub fn bullet_version(&self) -> BulletVersion {
        BulletVersion::from_number(self.replay.bullet_version).unwrap_or(BulletVersion::V2)
    }

    /// Segmentation settings for the pipeline
    pub fn segment_config(&self) -> SegmentConfig {
        SegmentConfig {
            split_secs: self.pipeline.split_secs,
            home_alt: self.pipeline.home_alt,
            only_armed: self.pipeline.only_armed,
        }
    }

    /// Position obfuscator for this run
    ///
    /// A zero seed draws a fresh one, so offsets differ between runs.
    pub fn obfuscator(&self) -> Obfuscator {
        let seed = match self.privacy.seed {
            0 => rand::random(),
            seed => seed,
        };
        Obfuscator::new(self.privacy.obfuscate, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> Config {
        Config::default()
    }

    fn load_str(toml: &str) -> Result<Config> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        file.flush().unwrap();
        Config::load(file.path())
    }

    #[test]
    fn test_default_config() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.replay_mode(), ReplayMode::None);
        assert_eq!(config.bullet_version(), BulletVersion::V2);
    }

    #[test]
    fn test_load_empty_file() {
        let config = load_str("").expect("Empty file should load with defaults");
        assert_eq!(config.pipeline.split_secs, 30);
        assert_eq!(config.replay.callsign, "JRandomUAV");
        assert!(!config.output.export);
    }

    #[test]
    fn test_load_full_file() {
        let config = load_str(
            r#"
            [pipeline]
            split_secs = 0
            home_alt = 120.5
            only_armed = true
            index = 2
            output_dir = "/tmp/tracks"

            [privacy]
            obfuscate = true
            seed = 42

            [replay]
            mode = "ltm"
            announce_interval = 5
            bullet_version = 1
            callsign = "Wing"
            mission = "mission.json"

            [ltm]
            device = "/dev/ttyUSB1"
            baud_rate = 57600

            [logging]
            dir = "./logs"
            level = "debug"

            [output]
            export = true
            "#,
        )
        .unwrap();

        assert_eq!(config.replay_mode(), ReplayMode::Ltm);
        assert_eq!(config.bullet_version(), BulletVersion::V1);
        assert_eq!(config.pipeline.index, 2);
        assert_eq!(config.replay.mission, Some(PathBuf::from("mission.json")));
        assert_eq!(config.logging.dir, Some(PathBuf::from("./logs")));

        let seg = config.segment_config();
        assert_eq!(seg.split_secs, 0);
        assert_eq!(seg.home_alt, Some(120.5));
        assert!(seg.only_armed);
        assert!(config.obfuscator().is_enabled());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/flightlog.toml");
        assert!(matches!(result, Err(FlightLogError::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = load_str("[pipeline\nsplit_secs = 1");
        assert!(matches!(result, Err(FlightLogError::Config(_))));
    }

    #[test]
    fn test_load_rejects_invalid_value() {
        let result = load_str("[replay]\nbullet_version = 3\n");
        assert!(matches!(result, Err(FlightLogError::Config(_))), "Validation runs on load");
    }

    #[test]
    fn test_announce_interval_zero() {
        let mut config = create_valid_config();
        config.replay.announce_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_replay_mode() {
        let mut config = create_valid_config();
        config.replay.mode = "mqtt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ltm_mode_requires_device() {
        let mut config = create_valid_config();
        config.replay.mode = "ltm".to_string();
        assert!(config.validate().is_err());

        config.ltm.device = "/dev/ttyUSB0".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.ltm.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for rate in [2400, 4800, 9600, 19200, 38400, 57600, 115200] {
            let mut config = create_valid_config();
            config.ltm.baud_rate = rate;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", rate);
        }
    }

    #[test]
    fn test_home_alt_range() {
        let mut config = create_valid_config();
        config.pipeline.home_alt = Some(-501.0);
        assert!(config.validate().is_err());

        config.pipeline.home_alt = Some(9001.0);
        assert!(config.validate().is_err());

        config.pipeline.home_alt = Some(-500.0);
        assert!(config.validate().is_ok(), "Bounds are inclusive");
    }

    #[test]
    fn test_empty_callsign() {
        let mut config = create_valid_config();
        config.replay.callsign.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_split_secs(), 30);
        assert_eq!(default_output_dir(), PathBuf::from("."));
        assert_eq!(default_replay_mode(), "none");
        assert_eq!(default_announce_interval(), 10);
        assert_eq!(default_bullet_version(), 2);
        assert_eq!(default_callsign(), "JRandomUAV");
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_log_level(), "info");
    }
}
