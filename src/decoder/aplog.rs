//! # Autopilot Text Log Decoder
//!
//! Reads the text form of a dataflash log. `FMT` lines declare each message
//! type's columns; every other line is `NAME, value, value, ...` in that
//! column order:
//!
//! ```text
//! FMT, 130, 45, GPS, QBBIHBcLLeffffB, TimeUS,Status,GMS,GWk,NSats,HDop,Lat,Lng,Alt,Spd,GCrs
//! GPS, 61234567, 3, 386400000, 2210, 12, 0.8, 54.1, -4.5, 120.5, 14.2, 271.0
//! ```
//!
//! One record is emitted per `GPS` message, merged with the latest `ATT`,
//! `BAT`, `MODE` and `RSSI` values. Arm/disarm events (`EV` ids 10 and 11)
//! delimit log entries.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{build_segments, file_label, FlightLog};
use crate::error::{FlightLogError, Result};
use crate::segment::PipelineContext;
use crate::types::{FixType, FlightMode, LogMeta, LogRecord, LogSegment, MetaFlags, Status};

/// Event id logged on arming
pub const EVENT_ARMED: i64 = 10;

/// Event id logged on disarming
pub const EVENT_DISARMED: i64 = 11;

/// GPS time minus UTC
const GPS_LEAP_SECONDS: i64 = 18;

/// Milliseconds per GPS week
const MS_PER_WEEK: i64 = 7 * 24 * 3600 * 1000;

/// Map an ArduPlane mode number or name
pub fn ap_mode(mode: &str) -> FlightMode {
    let mode = mode.trim();
    if let Ok(num) = mode.parse::<u32>() {
        return match num {
            0 => FlightMode::Manual,
            2 | 3 | 5 => FlightMode::Angle,
            4 => FlightMode::Acro,
            6 => FlightMode::AltitudeHold,
            7 => FlightMode::Cruise3D,
            10 => FlightMode::Waypoint,
            11 | 21 => FlightMode::ReturnToHome,
            1 | 12 | 15 | 19 => FlightMode::PositionHold,
            13 => FlightMode::Launch,
            _ => FlightMode::Acro,
        };
    }
    match mode.to_ascii_uppercase().as_str() {
        "MANUAL" => FlightMode::Manual,
        "STABILIZE" | "TRAINING" | "FBWA" => FlightMode::Angle,
        "ACRO" => FlightMode::Acro,
        "FBWB" | "ALT_HOLD" => FlightMode::AltitudeHold,
        "CRUISE" => FlightMode::Cruise3D,
        "AUTO" => FlightMode::Waypoint,
        "RTL" | "QRTL" | "SMART_RTL" => FlightMode::ReturnToHome,
        "LOITER" | "CIRCLE" | "GUIDED" | "POSHOLD" | "QLOITER" => FlightMode::PositionHold,
        "TAKEOFF" => FlightMode::Launch,
        _ => FlightMode::Acro,
    }
}

/// Convert GPS week and millisecond-of-week to UTC
///
/// `None` for week 0 and for values outside the representable time range.
pub fn gps_time(week: i64, ms: i64) -> Option<DateTime<Utc>> {
    if week <= 0 {
        return None;
    }
    let epoch = Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0).single()?;
    let offset_ms = week.checked_mul(MS_PER_WEEK)?.checked_add(ms)?;
    let offset = ChronoDuration::try_milliseconds(offset_ms)?;
    epoch
        .checked_add_signed(offset)?
        .checked_sub_signed(ChronoDuration::seconds(GPS_LEAP_SECONDS))
}

fn split_line(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

/// Column layouts declared by `FMT` lines
#[derive(Debug, Clone, Default)]
pub struct FormatMap {
    formats: HashMap<String, Vec<String>>,
}

impl FormatMap {
    pub fn from_lines<'a, I: IntoIterator<Item = &'a str>>(lines: I) -> Self {
        let mut formats = HashMap::new();
        for line in lines {
            let fields = split_line(line);
            if fields.first() != Some(&"FMT") || fields.len() < 6 {
                continue;
            }
            let columns = fields[5..].iter().filter(|c| !c.is_empty()).map(|c| c.to_string()).collect();
            formats.insert(fields[3].to_string(), columns);
        }
        Self { formats }
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn columns(&self, name: &str) -> Option<&[String]> {
        self.formats.get(name).map(Vec::as_slice)
    }

    /// Value of `column` in a split message line (`fields[0]` is the name)
    pub fn field<'l>(&self, fields: &[&'l str], column: &str) -> Option<&'l str> {
        let name = fields.first()?;
        let idx = self.formats.get(*name)?.iter().position(|c| c == column)?;
        fields.get(idx + 1).copied()
    }

    fn float(&self, fields: &[&str], column: &str) -> Option<f64> {
        self.field(fields, column).and_then(|v| v.parse().ok())
    }

    fn int(&self, fields: &[&str], column: &str) -> Option<i64> {
        self.field(fields, column).and_then(|v| v.parse::<f64>().ok()).map(|v| v as i64)
    }
}

/// Running state merged into each GPS record
#[derive(Debug, Default)]
struct MessageState {
    rec: LogRecord,
    armed: bool,
    malformed: usize,
    firmware: Option<String>,
}

impl MessageState {
    fn apply(&mut self, formats: &FormatMap, fields: &[&str]) -> Option<LogRecord> {
        let name = *fields.first()?;
        if name.is_empty() {
            return None;
        }
        if name != "FMT" && formats.columns(name).is_none() {
            self.malformed += 1;
            return None;
        }

        match name {
            "GPS" => {
                let rec = &mut self.rec;
                let status = formats.int(fields, "Status").unwrap_or(0);
                rec.fix = match status {
                    s if s >= 3 => FixType::Fix3D,
                    2 => FixType::Fix2D,
                    _ => FixType::NoFix,
                };
                rec.numsat = formats.int(fields, "NSats").unwrap_or(0).clamp(0, 255) as u8;
                rec.hdop = (formats.float(fields, "HDop").unwrap_or(0.0) * 100.0) as u16;
                rec.lat = formats.float(fields, "Lat").unwrap_or(0.0);
                rec.lon = formats.float(fields, "Lng").unwrap_or(0.0);
                if let Some(alt) = formats.float(fields, "Alt") {
                    rec.galt = alt;
                }
                rec.speed = formats.float(fields, "Spd").unwrap_or(0.0);
                rec.course = (formats.float(fields, "GCrs").unwrap_or(0.0) as i64).rem_euclid(360) as u16;

                let week = formats.int(fields, "GWk").unwrap_or(0);
                let ms = formats.int(fields, "GMS").unwrap_or(0);
                let utc = match gps_time(week, ms) {
                    Some(t) => Some(t),
                    None => {
                        // A nonzero week that does not convert is corrupt
                        if week != 0 {
                            self.malformed += 1;
                        }
                        let us = formats.int(fields, "TimeUS").unwrap_or(0);
                        let boot = DateTime::from_timestamp_micros(us);
                        if boot.is_none() {
                            self.malformed += 1;
                        }
                        boot
                    }
                };
                rec.utc = utc.unwrap_or_default();
                rec.status.set(Status::ARMED, self.armed);
                return Some(rec.clone());
            }
            "ATT" => {
                self.rec.roll = formats.float(fields, "Roll").unwrap_or(0.0);
                self.rec.pitch = formats.float(fields, "Pitch").unwrap_or(0.0);
                self.rec.heading = (formats.float(fields, "Yaw").unwrap_or(0.0) as i64).rem_euclid(360) as u16;
            }
            "BAT" => {
                self.rec.volts = formats.float(fields, "Volt").unwrap_or(0.0);
                self.rec.amps = formats.float(fields, "Curr").unwrap_or(0.0);
                self.rec.energy = formats.float(fields, "CurrTot").unwrap_or(0.0);
            }
            "MODE" => {
                if let Some(mode) = formats.field(fields, "Mode") {
                    self.rec.mode = ap_mode(mode);
                }
                self.rec.status.remove(Status::FAILSAFE);
            }
            "RSSI" => {
                let rssi = formats.float(fields, "RXRSSI").unwrap_or(0.0);
                self.rec.rssi = (rssi * 100.0).clamp(0.0, 100.0) as u8;
            }
            "CTUN" => {
                if let Some(thr) = formats.float(fields, "ThO").or_else(|| formats.float(fields, "ThrOut")) {
                    self.rec.throttle = thr.clamp(0.0, 100.0) as i32;
                }
            }
            "EV" => match formats.int(fields, "Id") {
                Some(EVENT_ARMED) => self.armed = true,
                Some(EVENT_DISARMED) => self.armed = false,
                _ => {}
            },
            "MSG" => {
                let text = formats.field(fields, "Message").unwrap_or_default();
                if text.to_ascii_lowercase().contains("failsafe") {
                    self.rec.status.insert(Status::FAILSAFE);
                    self.rec.mode = FlightMode::Failsafe;
                }
                if self.firmware.is_none() && text.starts_with("Ardu") {
                    self.firmware = Some(text.to_string());
                }
            }
            _ => {}
        }
        None
    }
}

/// Autopilot text dataflash log
#[derive(Debug)]
pub struct ApLog {
    path: PathBuf,
    text: String,
}

impl ApLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = String::from_utf8_lossy(&std::fs::read(&path)?).into_owned();
        Ok(Self { path, text })
    }

    fn lines(&self) -> Vec<&str> {
        self.text.lines().collect()
    }

    fn formats(&self) -> Result<FormatMap> {
        let formats = FormatMap::from_lines(self.text.lines());
        if formats.is_empty() {
            return Err(FlightLogError::Truncated(format!("{}: no FMT lines", self.path.display())));
        }
        debug!("{}: {} message formats", self.path.display(), formats.len());
        Ok(formats)
    }
}

impl FlightLog for ApLog {
    fn metas(&mut self) -> Result<Vec<LogMeta>> {
        let formats = self.formats()?;
        let lines = self.lines();
        let logname = file_label(&self.path);

        let mut state = MessageState::default();
        let mut periods: Vec<(usize, usize, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = Vec::new();
        let mut current: Option<(usize, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = None;

        for (i, line) in lines.iter().enumerate() {
            let fields = split_line(line);
            let was_armed = state.armed;
            let rec = state.apply(&formats, &fields);

            if state.armed && !was_armed {
                current = Some((i, None, None));
            }
            if let (Some(rec), Some((_, first, last))) = (rec, current.as_mut()) {
                first.get_or_insert(rec.utc);
                *last = Some(rec.utc);
            }
            if !state.armed && was_armed {
                if let Some((start, first, last)) = current.take() {
                    periods.push((start, i + 1, first, last));
                }
            }
        }
        if let Some((start, first, last)) = current {
            periods.push((start, lines.len(), first, last));
        }
        if periods.is_empty() {
            periods.push((0, lines.len(), None, None));
        }

        let metas = periods
            .into_iter()
            .enumerate()
            .map(|(n, (start, end, first, last))| {
                let mut meta = LogMeta {
                    index: n + 1,
                    logname: logname.clone(),
                    firmware: state.firmware.clone().unwrap_or_default(),
                    start,
                    end,
                    size: lines[start..end].iter().map(|l| l.len() as u64 + 1).sum(),
                    ..Default::default()
                };
                if let Some(first) = first {
                    meta.date = first.format("%Y-%m-%d %H:%M:%S").to_string();
                }
                if let (Some(first), Some(last)) = (first, last) {
                    meta.duration = (last - first).to_std().unwrap_or_default();
                }
                meta.flags.insert(MetaFlags::VALID);
                if state.malformed > 0 {
                    meta.flags.insert(MetaFlags::SUSPECT);
                }
                meta
            })
            .collect();
        Ok(metas)
    }

    fn reader(&mut self, meta: &LogMeta, ctx: &PipelineContext<'_>) -> Result<Vec<LogSegment>> {
        let formats = self.formats()?;
        let lines = self.lines();
        let selected = lines.get(meta.start..meta.end).ok_or(FlightLogError::NoSuchEntry(meta.index))?;

        let mut state = MessageState::default();
        // Replay everything before the entry for battery/mode/arm context
        for line in &lines[..meta.start] {
            state.apply(&formats, &split_line(line));
        }
        state.malformed = 0;

        let records: Vec<LogRecord> = selected
            .iter()
            .filter_map(|line| state.apply(&formats, &split_line(line)))
            .collect();

        let mut meta = meta.clone();
        if state.malformed > 0 {
            warn!("{}: {} lines of undeclared message types", meta.display_name(), state.malformed);
            meta.flags.insert(MetaFlags::SUSPECT);
        }
        Ok(build_segments(ctx, &meta, records))
    }

    fn dump(&mut self, out: &mut dyn Write) -> Result<()> {
        let formats = self.formats()?;
        for line in self.lines() {
            let fields = split_line(line);
            let Some(&name) = fields.first() else {
                continue;
            };
            if name == "FMT" || name.is_empty() {
                continue;
            }
            let values: Vec<String> = match formats.columns(name) {
                Some(columns) => columns
                    .iter()
                    .zip(fields.iter().skip(1))
                    .map(|(c, v)| format!("{}={}", c, v))
                    .collect(),
                None => fields.iter().skip(1).map(|v| v.to_string()).collect(),
            };
            writeln!(out, "{} {}", name, values.join(" "))?;
        }
        Ok(())
    }

    fn durations(&mut self, metas: &mut [LogMeta]) -> Result<()> {
        let formats = self.formats()?;
        let lines = self.lines();
        for meta in metas.iter_mut() {
            let Some(range) = lines.get(meta.start..meta.end) else {
                continue;
            };
            let times: Vec<DateTime<Utc>> = range
                .iter()
                .map(|l| split_line(l))
                .filter(|f| f.first() == Some(&"GPS"))
                .filter_map(|f| gps_time(formats.int(&f, "GWk")?, formats.int(&f, "GMS")?))
                .collect();
            if let (Some(first), Some(last)) = (times.first(), times.last()) {
                meta.duration = (*last - *first).to_std().unwrap_or_default();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{NoElevation, Obfuscator};
    use crate::segment::SegmentConfig;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    const AP_LOG: &str = "\
FMT, 128, 89, FMT, BBnNZ, Type,Length,Name,Format,Columns
FMT, 130, 45, GPS, QBIHBcLLeff, TimeUS,Status,GMS,GWk,NSats,HDop,Lat,Lng,Alt,Spd,GCrs
FMT, 131, 30, ATT, QccC, TimeUS,Roll,Pitch,Yaw
FMT, 132, 30, BAT, Qfff, TimeUS,Volt,Curr,CurrTot
FMT, 133, 20, MODE, QMBB, TimeUS,Mode,ModeNum,Rsn
FMT, 134, 10, EV, QB, TimeUS,Id
FMT, 135, 70, MSG, QZ, TimeUS,Message
MSG, 1000, ArduPlane V4.3.0 (abc123)
BAT, 2000, 12.6, 0.5, 0
GPS, 3000, 3, 386400000, 2210, 12, 0.8, 54.1, -4.5, 120.5, 0.0, 0
EV, 4000, 10
MODE, 4500, FBWA, 5, 1
ATT, 5000, -5.5, 2.0, 271
BAT, 5500, 12.4, 15.0, 100
GPS, 6000, 3, 386401000, 2210, 12, 0.8, 54.1001, -4.5, 125.0, 14.2, 271
GPS, 7000, 3, 386402000, 2210, 12, 0.8, 54.1002, -4.5, 130.0, 14.5, 271
EV, 8000, 11
GPS, 9000, 3, 386403000, 2210, 12, 0.8, 54.1002, -4.5, 130.0, 0.0, 271
EV, 10000, 10
GPS, 11000, 3, 386410000, 2210, 12, 0.8, 54.1003, -4.5, 130.0, 10.0, 90
MSG, 12000, Radio Failsafe
GPS, 13000, 3, 386411000, 2210, 12, 0.8, 54.1004, -4.5, 130.0, 10.0, 90
";

    fn write_log(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".log").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn ctx(elev: &NoElevation) -> PipelineContext<'_> {
        PipelineContext::new(SegmentConfig::default(), Obfuscator::disabled(), elev)
    }

    #[test]
    fn test_gps_time() {
        let t = gps_time(2210, 386_400_000).unwrap();
        assert_eq!(t.format("%Y-%m-%d %H:%M:%S").to_string(), "2022-05-19 11:19:42");
        assert!(gps_time(0, 1000).is_none(), "Week 0 means no GPS time");
        assert!(gps_time(1_000_000_000, 0).is_none(), "Out of range week");
        assert!(gps_time(i64::MAX, i64::MAX).is_none());
    }

    #[test]
    fn test_corrupt_gps_week_recovered() {
        let text = AP_LOG.replace(
            "GPS, 7000, 3, 386402000, 2210,",
            "GPS, 7000, 3, 386402000, 1000000000,",
        );
        let file = write_log(&text);
        let mut log = ApLog::open(file.path()).unwrap();
        let mut metas = log.metas().unwrap();
        log.durations(&mut metas).unwrap();

        assert_eq!(metas.len(), 2, "Entries still produced");
        assert!(metas[0].is_suspect());

        let elev = NoElevation;
        let segments = log.reader(&metas[0], &ctx(&elev)).unwrap();
        assert!(segments[0].meta.is_suspect());
        assert!(
            segments.iter().map(|s| s.records.len()).sum::<usize>() >= 1,
            "Good GPS lines still decode"
        );
    }

    #[test]
    fn test_out_of_range_boot_time_recovered() {
        let text = AP_LOG.replace(
            "GPS, 13000, 3, 386411000, 2210,",
            "GPS, 9223372036854775807, 3, 0, 0,",
        );
        let file = write_log(&text);
        let mut log = ApLog::open(file.path()).unwrap();
        let metas = log.metas().unwrap();
        assert_eq!(metas.len(), 2);
        assert!(metas[1].is_suspect());

        let elev = NoElevation;
        let segments = log.reader(&metas[1], &ctx(&elev)).unwrap();
        assert!(!segments.is_empty());
        assert!(segments[0].meta.is_suspect());
    }

    #[test]
    fn test_ap_mode() {
        assert_eq!(ap_mode("FBWA"), FlightMode::Angle);
        assert_eq!(ap_mode("10"), FlightMode::Waypoint);
        assert_eq!(ap_mode("RTL"), FlightMode::ReturnToHome);
        assert_eq!(ap_mode("SOMETHING_NEW"), FlightMode::Acro);
    }

    #[test]
    fn test_format_map_lookup() {
        let formats = FormatMap::from_lines(AP_LOG.lines());
        assert_eq!(formats.len(), 7);
        let fields = split_line("BAT, 2000, 12.6, 0.5, 0");
        assert_eq!(formats.field(&fields, "Volt"), Some("12.6"));
        assert_eq!(formats.field(&fields, "Missing"), None);
    }

    #[test]
    fn test_metas_split_on_arm_events() {
        let file = write_log(AP_LOG);
        let mut log = ApLog::open(file.path()).unwrap();
        let metas = log.metas().unwrap();

        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].firmware, "ArduPlane V4.3.0 (abc123)");
        assert_eq!(metas[0].duration, std::time::Duration::from_secs(1));
        assert_eq!(metas[1].index, 2);
        assert!(!metas[0].is_suspect());
    }

    #[test]
    fn test_reader_merges_messages() {
        let file = write_log(AP_LOG);
        let mut log = ApLog::open(file.path()).unwrap();
        let metas = log.metas().unwrap();
        let elev = NoElevation;

        let segments = log.reader(&metas[0], &ctx(&elev)).unwrap();
        let seg = &segments[0];
        assert_eq!(seg.records.len(), 2);
        assert_eq!(seg.home.alt, 125.0, "Home altitude from GPS AMSL");

        let r = &seg.records[0];
        assert!(r.is_armed());
        assert_eq!(r.mode, FlightMode::Angle);
        assert_eq!(r.roll, -5.5);
        assert_eq!(r.heading, 271);
        assert_eq!(r.volts, 12.4);
        assert_eq!(r.amps, 15.0);
        assert_eq!(r.energy, 100.0);
        assert_eq!(r.hdop, 80);
        assert!((r.speed - 14.2).abs() < 1e-9);
    }

    #[test]
    fn test_failsafe_message() {
        let file = write_log(AP_LOG);
        let mut log = ApLog::open(file.path()).unwrap();
        let metas = log.metas().unwrap();
        let elev = NoElevation;

        let segments = log.reader(&metas[1], &ctx(&elev)).unwrap();
        let recs = &segments[0].records;
        assert!(!recs[0].is_failsafe());
        assert!(recs[1].is_failsafe());
        assert_eq!(recs[1].mode, FlightMode::Failsafe);
    }

    #[test]
    fn test_undeclared_message_marks_suspect() {
        let text = format!("{}XYZ, 1, 2, 3\n", AP_LOG);
        let file = write_log(&text);
        let mut log = ApLog::open(file.path()).unwrap();
        let metas = log.metas().unwrap();
        assert!(metas.iter().all(|m| m.is_suspect()));
    }

    #[test]
    fn test_no_fmt_is_fatal() {
        let file = write_log("GPS, 1, 2, 3\n");
        let mut log = ApLog::open(file.path()).unwrap();
        assert!(matches!(log.metas(), Err(FlightLogError::Truncated(_))));
    }

    #[test]
    fn test_dump_names_columns() {
        let file = write_log(AP_LOG);
        let mut log = ApLog::open(file.path()).unwrap();
        let mut out = Vec::new();
        log.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("BAT TimeUS=2000 Volt=12.6 Curr=0.5 CurrTot=0"), "{}", text);
    }
}
