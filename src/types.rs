//! # Canonical Flight Log Model
//!
//! Every decoder collapses its source format into these types. Units are SI
//! throughout: metres, metres per second, volts, amps, degrees.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Altitude sentinel meaning "not reported by the source"
pub const UNKNOWN_ALTITUDE: f64 = -999_999.9;

/// Speeds at or above this (m/s) are sensor glitches and never become a maximum
pub const MAX_VALID_SPEED: f64 = 400.0;

/// Metres per nautical mile
pub const METRES_PER_NM: f64 = 1852.0;

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$fmeta:meta])* $flag:ident = $bit:expr; )* }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
        pub struct $name(u8);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: $name = $name($bit); )*

            /// No flags set
            pub const fn empty() -> Self {
                $name(0)
            }

            /// Raw bit pattern
            pub const fn bits(self) -> u8 {
                self.0
            }

            /// Build from a raw bit pattern
            pub const fn from_bits(bits: u8) -> Self {
                $name(bits)
            }

            /// True if every bit of `other` is set
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True if no bit is set
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }
    };
}

flag_set! {
    /// Packed per-record vehicle status
    Status {
        /// Motors armed
        ARMED = 1 << 0;
        /// Failsafe active
        FAILSAFE = 1 << 1;
        /// Hardware (sensor) failure reported
        HW_FAIL = 1 << 2;
    }
}

flag_set! {
    /// What is known about the home position
    HomeFlags {
        /// Home latitude/longitude established from an armed fix
        ARM_HOME_KNOWN = 1 << 0;
        /// Home altitude known (override, GPS AMSL or elevation lookup)
        ALTITUDE_KNOWN = 1 << 1;
    }
}

flag_set! {
    /// Validity of a catalogued log entry
    MetaFlags {
        /// Entry contains decodable data
        VALID = 1 << 0;
        /// Entry decoded with corruption or missing end marker
        SUSPECT = 1 << 1;
    }
}

/// Closed set of flight modes every source format maps onto
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum FlightMode {
    Manual,
    Angle,
    Horizon,
    #[default]
    Acro,
    AltitudeHold,
    PositionHold,
    Waypoint,
    ReturnToHome,
    Cruise2D,
    Cruise3D,
    Launch,
    Failsafe,
}

impl FlightMode {
    /// Short display name
    pub fn name(self) -> &'static str {
        match self {
            FlightMode::Manual => "Manual",
            FlightMode::Angle => "Angle",
            FlightMode::Horizon => "Horizon",
            FlightMode::Acro => "Acro",
            FlightMode::AltitudeHold => "AltHold",
            FlightMode::PositionHold => "PosHold",
            FlightMode::Waypoint => "Waypoint",
            FlightMode::ReturnToHome => "RTH",
            FlightMode::Cruise2D => "Cruise2D",
            FlightMode::Cruise3D => "Cruise3D",
            FlightMode::Launch => "Launch",
            FlightMode::Failsafe => "Failsafe",
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// GPS lock strength, ordered weakest to strongest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FixType {
    #[default]
    NoFix,
    Fix2D,
    Fix3D,
}

/// One timestamped, normalized telemetry sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Sample time
    pub utc: DateTime<Utc>,

    /// Latitude in degrees
    pub lat: f64,

    /// Longitude in degrees
    pub lon: f64,

    /// Altitude above takeoff in metres
    pub alt: f64,

    /// GPS altitude above sea level in metres, or [`UNKNOWN_ALTITUDE`]
    pub galt: f64,

    /// Ground speed in m/s
    pub speed: f64,

    /// Course over ground in degrees (0-359)
    pub course: u16,

    /// Heading in degrees (0-359)
    pub heading: u16,

    /// Satellites in view
    pub numsat: u8,

    /// GPS fix quality
    pub fix: FixType,

    /// Horizontal dilution of precision × 100
    pub hdop: u16,

    /// Received signal strength (0-100%)
    pub rssi: u8,

    /// Battery voltage in volts
    pub volts: f64,

    /// Current draw in amps
    pub amps: f64,

    /// Consumed energy in mAh
    pub energy: f64,

    /// Roll in degrees
    pub roll: f64,

    /// Pitch in degrees
    pub pitch: f64,

    /// Throttle (0-100%)
    pub throttle: i32,

    /// Packed status bits
    pub status: Status,

    /// Flight mode
    pub mode: FlightMode,

    /// Bearing from home in degrees (derived)
    pub bearing: i32,

    /// Range from home in metres (derived)
    pub range: f64,

    /// Cumulative distance travelled in metres (derived)
    pub distance: f64,
}

impl Default for LogRecord {
    fn default() -> Self {
        Self {
            utc: DateTime::<Utc>::default(),
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            galt: UNKNOWN_ALTITUDE,
            speed: 0.0,
            course: 0,
            heading: 0,
            numsat: 0,
            fix: FixType::NoFix,
            hdop: 0,
            rssi: 0,
            volts: 0.0,
            amps: 0.0,
            energy: 0.0,
            roll: 0.0,
            pitch: 0.0,
            throttle: 0,
            status: Status::empty(),
            mode: FlightMode::Acro,
            bearing: 0,
            range: 0.0,
            distance: 0.0,
        }
    }
}

impl LogRecord {
    /// True when the fix is good enough to establish home
    pub fn is_home_quality(&self) -> bool {
        self.fix > FixType::Fix2D && self.numsat > 5
    }

    pub fn is_armed(&self) -> bool {
        self.status.contains(Status::ARMED)
    }

    pub fn is_failsafe(&self) -> bool {
        self.status.contains(Status::FAILSAFE)
    }
}

/// Reference point for bearing, range and distance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HomePosition {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub flags: HomeFlags,
}

impl HomePosition {
    /// True once an armed home fix has been established
    pub fn is_set(&self) -> bool {
        self.flags.contains(HomeFlags::ARM_HOME_KNOWN)
    }
}

/// Catalogue entry for one log inside a source file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogMeta {
    /// 1-based index within the source file
    pub index: usize,

    /// Display name (normally the file name)
    pub logname: String,

    /// Flight date as text
    pub date: String,

    /// Firmware / generator description, if the format records one
    pub firmware: String,

    /// Craft name, if the format records one
    pub craft: String,

    /// Format-specific start position (record, line or byte offset)
    pub start: usize,

    /// Format-specific end position (exclusive)
    pub end: usize,

    /// Entry size in bytes, where meaningful
    pub size: u64,

    /// Flight duration, filled by the cheap scan or by `durations()`
    pub duration: Duration,

    /// Validity flags
    pub flags: MetaFlags,

    /// Disarm reason, if the format records one
    pub disarm: Option<String>,
}

impl LogMeta {
    /// Name qualified with the entry index for multi-entry files
    pub fn display_name(&self) -> String {
        if self.index > 1 {
            format!("{} / {}", self.logname, self.index)
        } else {
            self.logname.clone()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(MetaFlags::VALID)
    }

    pub fn is_suspect(&self) -> bool {
        self.flags.contains(MetaFlags::SUSPECT)
    }

    /// Ordered key/value summary for the operator
    pub fn summary(&self) -> Vec<(String, String)> {
        let mut lines = vec![
            ("Log".to_string(), self.display_name()),
            ("Flight".to_string(), self.date.clone()),
        ];
        if !self.firmware.is_empty() {
            lines.push(("Firmware".to_string(), self.firmware.clone()));
        }
        if !self.craft.is_empty() {
            lines.push(("Name".to_string(), self.craft.clone()));
        }
        if self.size > 0 {
            lines.push(("Size".to_string(), format!("{} bytes", self.size)));
        }
        if !self.duration.is_zero() {
            lines.push(("Duration".to_string(), format_elapsed(self.duration)));
        }
        if let Some(reason) = &self.disarm {
            lines.push(("Disarm".to_string(), reason.clone()));
        }
        lines
    }
}

/// Running extrema for one segment
///
/// Each maximum is paired with the elapsed time (since segment start) at
/// which it was first observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stats {
    pub max_range: f64,
    pub max_range_time: Duration,
    pub max_alt: f64,
    pub max_alt_time: Duration,
    pub max_speed: f64,
    pub max_speed_time: Duration,
    pub max_current: f64,
    pub max_current_time: Duration,
    /// Total distance travelled in metres
    pub distance: f64,
}

impl Stats {
    /// Fold one record's values into the extrema
    ///
    /// A value replaces the stored maximum only if strictly greater; speeds
    /// at or above [`MAX_VALID_SPEED`] are ignored.
    pub fn observe(&mut self, rec: &LogRecord, elapsed: Duration) {
        if rec.range > self.max_range {
            self.max_range = rec.range;
            self.max_range_time = elapsed;
        }
        if rec.alt > self.max_alt {
            self.max_alt = rec.alt;
            self.max_alt_time = elapsed;
        }
        if rec.speed < MAX_VALID_SPEED && rec.speed > self.max_speed {
            self.max_speed = rec.speed;
            self.max_speed_time = elapsed;
        }
        if rec.amps > self.max_current {
            self.max_current = rec.amps;
            self.max_current_time = elapsed;
        }
    }

    /// Ordered key/value summary for the operator
    pub fn summary(&self, duration: Duration) -> Vec<(String, String)> {
        let mut lines = vec![
            ("Distance".to_string(), format!("{:.0} m", self.distance)),
            (
                "MaxAlt".to_string(),
                format!("{:.1} m at {}", self.max_alt, format_elapsed(self.max_alt_time)),
            ),
            (
                "MaxSpeed".to_string(),
                format!("{:.1} m/s at {}", self.max_speed, format_elapsed(self.max_speed_time)),
            ),
            (
                "MaxRange".to_string(),
                format!("{:.0} m at {}", self.max_range, format_elapsed(self.max_range_time)),
            ),
        ];
        if self.max_current > 0.0 {
            lines.push((
                "MaxAmps".to_string(),
                format!("{:.1} A at {}", self.max_current, format_elapsed(self.max_current_time)),
            ));
        }
        lines.push(("Duration".to_string(), format_elapsed(duration)));
        lines
    }
}

/// One continuous flight: home, records and statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSegment {
    /// 1-based segment number within its log entry (splits start new parts)
    pub part: usize,
    pub home: HomePosition,
    pub records: Vec<LogRecord>,
    pub stats: Stats,
    pub meta: LogMeta,
}

impl LogSegment {
    /// Time between first and last record
    pub fn duration(&self) -> Duration {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => (last.utc - first.utc).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

/// Format an elapsed time as `mm:ss`
pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
