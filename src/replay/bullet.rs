//! # Bullet Line Protocol
//!
//! Comma separated `key:value` frames understood by ground-station
//! simulators. Version 2 sends fixed-point integers (×10, ×100, ×10^7);
//! version 1 sends decimal text for the same fields.
//!
//! ```text
//! flt:12,ont:72,ran:-35,pan:12,hea:270,ggc:268,alt:4520,asl:112,gsp:1250,...
//! ```

use std::fmt::Write;

use crate::geo::rebase_bearing;
use crate::mission::Mission;
use crate::types::{FixType, FlightMode, HomePosition, LogRecord, UNKNOWN_ALTITUDE};

/// Default call sign in home frames
pub const DEFAULT_CALLSIGN: &str = "JRandomUAV";

/// First frame of every replay
pub const INITIAL_FRAME: &str = "wpc:0,wpv:0,flt:0,ont:0";

/// Added to flight time to give "on time"
const ON_TIME_OFFSET_SECS: u64 = 60;

/// Numeric encoding of a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BulletVersion {
    /// Decimal text
    V1,
    /// Fixed-point integers
    #[default]
    V2,
}

impl BulletVersion {
    /// Map the configured protocol number (1 or 2)
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(BulletVersion::V1),
            2 => Some(BulletVersion::V2),
            _ => None,
        }
    }
}

/// Mode code for a flight mode
///
/// Version 2 uses numeric codes with `11` for anything unmapped. Version 1
/// uses short names, `ACRO` for anything unmapped, and `!FS!` whenever
/// failsafe is active.
pub fn mode_code(mode: FlightMode, failsafe: bool, version: BulletVersion) -> &'static str {
    match version {
        BulletVersion::V2 => match mode {
            FlightMode::Manual => "1",
            FlightMode::Angle => "9",
            FlightMode::Horizon => "10",
            FlightMode::Acro => "11",
            FlightMode::AltitudeHold => "8",
            FlightMode::PositionHold => "4",
            FlightMode::Waypoint => "7",
            FlightMode::ReturnToHome => "2",
            FlightMode::Cruise3D => "5",
            FlightMode::Launch => "9",
            _ => "11",
        },
        BulletVersion::V1 if failsafe => "!FS!",
        BulletVersion::V1 => match mode {
            FlightMode::Manual => "MANU",
            FlightMode::Angle => "ANGL",
            FlightMode::Horizon => "HOR",
            FlightMode::Acro => "ACRO",
            FlightMode::AltitudeHold => "A H",
            FlightMode::PositionHold => "P H",
            FlightMode::Waypoint => "WP",
            FlightMode::ReturnToHome => "RTH",
            FlightMode::Cruise3D => "3CRS",
            FlightMode::Launch => "LNCH",
            _ => "ACRO",
        },
    }
}

/// Frame builder for one protocol version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletEncoder {
    version: BulletVersion,
    callsign: String,
}

impl Default for BulletEncoder {
    fn default() -> Self {
        Self::new(BulletVersion::default(), DEFAULT_CALLSIGN)
    }
}

impl BulletEncoder {
    pub fn new(version: BulletVersion, callsign: &str) -> Self {
        Self { version, callsign: callsign.to_string() }
    }

    pub fn version(&self) -> BulletVersion {
        self.version
    }

    /// `[bcc:N,]ftm:<mode>,css:3,hwh:<0|1>,`
    pub fn mode_frame(&self, mode: FlightMode, failsafe: bool, hw_fail: bool, cells: u8) -> String {
        let mut s = String::new();
        if cells > 0 {
            let _ = write!(s, "bcc:{},", cells);
        }
        let _ = write!(
            s,
            "ftm:{},css:3,hwh:{},",
            mode_code(mode, failsafe, self.version),
            if hw_fail { 0 } else { 1 }
        );
        s
    }

    /// `cs:<callsign>,hla:..,hlo:..,hal:..`
    pub fn home_frame(&self, home: &HomePosition) -> String {
        format!(
            "cs:{},hla:{},hlo:{},hal:{}",
            self.callsign,
            self.coord(home.lat),
            self.coord(home.lon),
            match self.version {
                BulletVersion::V2 => ((home.alt * 100.0) as i64).to_string(),
                BulletVersion::V1 => format!("{:.0}", home.alt),
            }
        )
    }

    /// One frame per mission step followed by the `wpc` summary frame
    pub fn mission_frames(&self, mission: &Mission) -> Vec<String> {
        let last = mission.items.len().saturating_sub(1);
        let mut frames: Vec<String> = mission
            .items
            .iter()
            .enumerate()
            .map(|(k, item)| {
                let mut s = format!(
                    "wpno:{},la:{},lo:{},al:{},ac:{},",
                    item.no,
                    (item.lat * 10_000_000.0) as i64,
                    (item.lon * 10_000_000.0) as i64,
                    item.alt * 100,
                    item.action_code()
                );
                for (key, p) in [("p1", item.p1), ("p2", item.p2), ("p3", item.p3)] {
                    if p != 0 {
                        let _ = write!(s, "{}:{},", key, p);
                    }
                }
                if k == last {
                    s.push_str("f:165");
                }
                s
            })
            .collect();
        frames.push(format!("wpc:{},wpv:1,", mission.items.len()));
        frames
    }

    /// Telemetry frame for one record
    ///
    /// # Arguments
    ///
    /// * `rec` - The record
    /// * `elapsed_secs` - Seconds since the first record of the segment
    /// * `cells` - Inferred battery cell count (0 = unknown)
    pub fn data_frame(&self, rec: &LogRecord, elapsed_secs: u64, cells: u8) -> String {
        let mut s = String::with_capacity(256);
        let v2 = self.version == BulletVersion::V2;

        let _ = write!(s, "flt:{},ont:{},", elapsed_secs, elapsed_secs + ON_TIME_OFFSET_SECS);
        let _ = write!(s, "ran:{},pan:{},", (rec.roll * 10.0) as i64, (rec.pitch * 10.0) as i64);
        let _ = write!(s, "hea:{},ggc:{},", rec.heading, rec.course);

        let asl = if rec.galt > UNKNOWN_ALTITUDE { rec.galt as i64 } else { 0 };
        let _ = write!(s, "alt:{},asl:{},", (rec.alt * 100.0) as i64, asl);
        let _ = write!(s, "gsp:{},", (rec.speed * 100.0) as i64);

        let per_cell = if cells > 0 { rec.volts / cells as f64 } else { 0.0 };
        if v2 {
            let _ = write!(
                s,
                "bpv:{},acv:{},cad:{},cud:{},",
                (rec.volts * 100.0) as i64,
                (per_cell * 100.0) as i64,
                rec.energy as i64,
                (rec.amps * 100.0) as i64
            );
        } else {
            let _ = write!(
                s,
                "bpv:{:.2},acv:{:.2},cad:{:.0},cud:{:.2},",
                rec.volts, per_cell, rec.energy, rec.amps
            );
        }

        let _ = write!(s, "rsi:{},", rec.rssi);
        let _ = write!(s, "gla:{},glo:{},", self.coord(rec.lat), self.coord(rec.lon));
        let _ = write!(s, "gsc:{},", rec.numsat);
        if v2 {
            let _ = write!(s, "ghp:{},", rec.hdop);
        } else {
            let _ = write!(s, "ghp:{:.1},", rec.hdop as f64 / 100.0);
        }

        let _ = write!(s, "3df:{},", if rec.fix != FixType::NoFix { 1 } else { 0 });
        let _ = write!(s, "hds:{},", rec.range as i64);
        let _ = write!(s, "hdr:{},", rebase_bearing(rec.bearing));
        let _ = write!(s, "trp:{},", rec.throttle);
        let _ = write!(s, "fs:{},arm:{}", rec.is_failsafe() as u8, rec.is_armed() as u8);
        s
    }

    fn coord(&self, deg: f64) -> String {
        match self.version {
            BulletVersion::V2 => ((deg * 10_000_000.0) as i64).to_string(),
            BulletVersion::V1 => format!("{:.8}", deg),
        }
    }
}
