//! # OpenTX / EdgeTX Telemetry CSV Decoder
//!
//! The radio writes one row per telemetry sample. The first row names the
//! columns as `Name` or `Name(unit)`:
//!
//! ```text
//! Date,Time,Tmp1(@C),Tmp2(@C),Alt(ft),GPS,GSpd(kmh),Hdg(@),VFAS(V),Curr(A),RSSI(dB)
//! ```
//!
//! Two dialects are understood. The classic S.Port dialect packs flight
//! mode into the decimal digits of `Tmp1` and fix/satellites into `Tmp2`.
//! The CRSF dialect (detected by a `1RSS` column) names the flight mode in
//! `FM` and carries attitude in radians, with no ground speed, so speed is
//! estimated from consecutive fixes.

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ByteRecord, StringRecord};
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::{build_segments, file_label, FlightLog};
use crate::error::Result;
use crate::geo::flat_earth_speed;
use crate::segment::PipelineContext;
use crate::types::{FixType, FlightMode, LogMeta, LogRecord, LogSegment, MetaFlags, Status, UNKNOWN_ALTITUDE};
use crate::units::normalise;

/// Column that only the CRSF dialect has
pub const CRSF_MARKER_COLUMN: &str = "1RSS";

/// Ground speeds outside 0..=this (m/s) are zeroed
const MAX_GROUND_SPEED: f64 = 255.0;

/// Rows below this altitude (m) may be dropped as disarmed ground noise
const GROUND_ALT: f64 = 10.0;

/// Rows below this speed (m/s) may be dropped as disarmed ground noise
const GROUND_SPEED: f64 = 7.0;

/// Throttle above this on CRSF means armed, even when `FM` reads `0`
const CRSF_ARMED_THROTTLE: i64 = -800;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIME_FORMAT_WHOLE: &str = "%Y-%m-%d %H:%M:%S";

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w+)\(([A-Za-z/@%]*)\)").expect("valid header pattern"))
}

/// Position and unit of one named column
#[derive(Debug, Clone, PartialEq, Eq)]
struct Column {
    index: usize,
    unit: String,
}

/// Name → column map built from the header row of one open file
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    columns: HashMap<String, Column>,
}

impl HeaderMap {
    pub fn new(header: &StringRecord) -> Self {
        let mut columns = HashMap::new();
        for (index, field) in header.iter().enumerate() {
            let (name, unit) = match header_pattern().captures(field) {
                Some(caps) => (caps[1].to_string(), caps[2].to_string()),
                None => (field.to_string(), String::new()),
            };
            columns.insert(name, Column { index, unit });
        }
        Self { columns }
    }

    pub fn is_crsf(&self) -> bool {
        self.columns.contains_key(CRSF_MARKER_COLUMN)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Field text and unit for a named column
    ///
    /// `None` if the column is absent or the row is too short.
    pub fn get<'r>(&self, row: &'r StringRecord, name: &str) -> Option<(&'r str, &str)> {
        let col = self.columns.get(name)?;
        row.get(col.index).map(|s| (s, col.unit.as_str()))
    }

    fn float(&self, row: &StringRecord, name: &str) -> Option<(f64, &str)> {
        self.get(row, name).map(|(s, u)| (s.parse().unwrap_or(0.0), u))
    }

    fn int(&self, row: &StringRecord, name: &str) -> Option<i64> {
        self.get(row, name).map(|(s, _)| s.parse().unwrap_or(0))
    }

    /// Columns in file order, formatted `%3d: name(unit)`
    pub fn dump(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut cols: Vec<(&String, &Column)> = self.columns.iter().collect();
        cols.sort_by_key(|(_, c)| c.index);
        for (name, col) in cols {
            if col.unit.is_empty() {
                writeln!(out, "{:3}: {}", col.index, name)?;
            } else {
                writeln!(out, "{:3}: {}({})", col.index, name, col.unit)?;
            }
        }
        Ok(())
    }
}

/// Parse `Date` + `Time` columns
pub fn parse_time(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let text = format!("{} {}", date.trim(), time.trim());
    NaiveDateTime::parse_from_str(&text, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&text, TIME_FORMAT_WHOLE))
        .ok()
        .map(|t| t.and_utc())
}

/// Decode the five-digit `Tmp1` mode word
///
/// Digits, least significant first: E (armed = 4), D (base mode), C (hold
/// bits), B (navigation mode), A (failsafe = 4).
///
/// # Returns
///
/// * `(FlightMode, bool, bool)` - Mode, armed, failsafe
pub fn decode_tmp1(tmp1: i64) -> (FlightMode, bool, bool) {
    let e = tmp1 % 10;
    let d = (tmp1 % 100) / 10;
    let c = (tmp1 % 1000) / 100;
    let b = (tmp1 % 10000) / 1000;
    let a = tmp1 / 10000;

    let mut mode = match d {
        1 => FlightMode::Angle,
        2 => FlightMode::Horizon,
        4 => FlightMode::Manual,
        _ => FlightMode::Acro,
    };
    if c & 2 != 0 {
        mode = FlightMode::AltitudeHold;
    }
    if c & 4 != 0 {
        mode = FlightMode::PositionHold;
    }
    match b {
        1 => mode = FlightMode::ReturnToHome,
        2 => mode = FlightMode::Waypoint,
        8 => {
            mode = if matches!(mode, FlightMode::AltitudeHold | FlightMode::PositionHold) {
                FlightMode::Cruise3D
            } else {
                FlightMode::Cruise2D
            };
        }
        _ => {}
    }
    (mode, e & 4 != 0, a == 4)
}

/// Map a CRSF `FM` string
///
/// # Returns
///
/// * `(FlightMode, bool, bool)` - Mode, armed, failsafe
pub fn decode_crsf_mode(fm: &str) -> (FlightMode, bool, bool) {
    match fm {
        "0" | "OK" | "WAIT" | "!ERR" => (FlightMode::Acro, false, false),
        "ACRO" | "AIR" => (FlightMode::Acro, true, false),
        "ANGL" | "STAB" => (FlightMode::Angle, true, false),
        "HOR" => (FlightMode::Horizon, true, false),
        "MANU" => (FlightMode::Manual, true, false),
        "AH" => (FlightMode::AltitudeHold, true, false),
        "HOLD" => (FlightMode::PositionHold, true, false),
        "CRS" => (FlightMode::Cruise2D, true, false),
        "3CRS" => (FlightMode::Cruise3D, true, false),
        "WP" => (FlightMode::Waypoint, true, false),
        "RTH" => (FlightMode::ReturnToHome, true, false),
        "!FS!" => (FlightMode::Failsafe, true, true),
        _ => (FlightMode::Acro, true, false),
    }
}

/// Text form of a raw row
///
/// Fields that are not UTF-8 are decoded lossily; the flag reports whether
/// that happened.
fn text_row(row: ByteRecord) -> (StringRecord, bool) {
    match StringRecord::from_byte_record(row) {
        Ok(text) => (text, false),
        Err(e) => {
            let lossy: StringRecord = e.into_byte_record().iter().map(String::from_utf8_lossy).collect();
            (lossy, true)
        }
    }
}

/// Row-to-row state while decoding
#[derive(Debug, Default)]
struct RowState {
    last_time: Option<DateTime<Utc>>,
    last_fix: Option<(f64, f64)>,
    bad_times: usize,
}

/// Decode one data row into a record
fn decode_row(map: &HeaderMap, row: &StringRecord, state: &mut RowState) -> LogRecord {
    let mut rec = LogRecord::default();
    let mut armed = false;
    let mut failsafe = false;

    rec.utc = match (map.get(row, "Date"), map.get(row, "Time")) {
        (Some((d, _)), Some((t, _))) => match parse_time(d, t) {
            Some(t) => t,
            None => {
                state.bad_times += 1;
                state.last_time.unwrap_or_default()
            }
        },
        _ => state.last_time.unwrap_or_default(),
    };

    if let Some(tmp2) = map.int(row, "Tmp2") {
        rec.numsat = (tmp2 % 100).clamp(0, 99) as u8;
        rec.fix = if (tmp2 / 1000) & 1 == 1 {
            FixType::Fix3D
        } else if rec.numsat > 0 {
            FixType::Fix2D
        } else {
            FixType::NoFix
        };
    }

    if let Some((gps, _)) = map.get(row, "GPS") {
        let parts: Vec<&str> = gps.split_whitespace().collect();
        if let [lat, lon] = parts.as_slice() {
            rec.lat = lat.parse().unwrap_or(0.0);
            rec.lon = lon.parse().unwrap_or(0.0);
        }
    }

    if let Some((alt, unit)) = map.float(row, "Alt") {
        rec.alt = normalise(alt, unit);
    }
    rec.galt = match map.float(row, "GAlt") {
        Some((galt, unit)) => normalise(galt, unit),
        None => UNKNOWN_ALTITUDE,
    };

    if let Some((spd, unit)) = map.float(row, "GSpd") {
        let spd = normalise(spd, unit);
        rec.speed = if (0.0..=MAX_GROUND_SPEED).contains(&spd) { spd } else { 0.0 };
    }

    if let Some((hdg, _)) = map.float(row, "Hdg") {
        rec.course = (hdg as i64).rem_euclid(360) as u16;
        rec.heading = rec.course;
    }

    if let Some(tmp1) = map.int(row, "Tmp1") {
        let (mode, a, fs) = decode_tmp1(tmp1);
        rec.mode = mode;
        armed = a;
        failsafe = fs;
    }

    if let Some(rssi) = map.int(row, "RSSI") {
        rec.rssi = rssi.clamp(0, 100) as u8;
    }
    if let Some((v, _)) = map.float(row, "VFAS") {
        rec.volts = v;
    }
    if let Some(thr) = map.int(row, "Thr") {
        rec.throttle = ((thr + 1024) * 100 / 2048).clamp(0, 100) as i32;
    }

    if map.is_crsf() {
        rec.rssi = map
            .int(row, "RQly")
            .or_else(|| map.int(row, CRSF_MARKER_COLUMN))
            .unwrap_or(0)
            .clamp(0, 100) as u8;

        if let Some((v, _)) = map.float(row, "RxBt") {
            rec.volts = v;
        }

        if let Some((fm, _)) = map.get(row, "FM") {
            let (mode, a, fs) = decode_crsf_mode(fm);
            rec.mode = mode;
            armed = a;
            failsafe = fs;
            if fm == "0" && map.int(row, "Thr").is_some_and(|thr| thr > CRSF_ARMED_THROTTLE) {
                armed = true;
            }
        }

        if let Some((yaw, _)) = map.float(row, "Yaw") {
            rec.heading = (yaw.to_degrees().round().rem_euclid(360.0) as u16) % 360;
            rec.course = rec.heading;
        }
        if let Some((pitch, _)) = map.float(row, "Ptch") {
            rec.pitch = pitch.to_degrees();
        }
        if let Some((roll, _)) = map.float(row, "Roll") {
            rec.roll = roll.to_degrees();
        }
    }

    if let Some(sats) = map.int(row, "Sats") {
        rec.numsat = sats.clamp(0, 255) as u8;
        rec.fix = if sats > 5 {
            FixType::Fix3D
        } else if sats > 0 {
            FixType::Fix2D
        } else {
            FixType::NoFix
        };
    }

    if let Some((curr, unit)) = map.float(row, "Curr") {
        rec.amps = normalise(curr, unit);
    }
    if let Some((capa, _)) = map.float(row, "Capa") {
        rec.energy = capa;
    }

    if map.is_crsf() {
        let dt = state
            .last_time
            .map(|t| (rec.utc - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        rec.speed = flat_earth_speed(rec.lat, rec.lon, state.last_fix, dt);
    }

    rec.status.set(Status::ARMED, armed);
    rec.status.set(Status::FAILSAFE, failsafe);

    if rec.lat != 0.0 && rec.lon != 0.0 {
        state.last_fix = Some((rec.lat, rec.lon));
    }
    state.last_time = Some(rec.utc);
    rec
}

/// OpenTX / EdgeTX telemetry CSV file
#[derive(Debug)]
pub struct OtxLog {
    path: PathBuf,
}

impl OtxLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Fail early on an unreadable file
        File::open(&path)?;
        Ok(Self { path })
    }

    fn csv(&self) -> Result<csv::Reader<File>> {
        let file = File::open(&self.path)?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(file))
    }

    /// Header map plus the raw data rows
    fn rows(&self) -> Result<(HeaderMap, csv::ByteRecordsIntoIter<File>)> {
        let mut reader = self.csv()?;
        let mut raw = ByteRecord::new();
        reader.read_byte_record(&mut raw)?;
        let (header, _) = text_row(raw);
        let map = HeaderMap::new(&header);
        debug!(
            "{}: {} columns{}",
            self.path.display(),
            header.len(),
            if map.is_crsf() { " (CRSF)" } else { "" }
        );
        Ok((map, reader.into_byte_records()))
    }

    /// First and last row times, the row count and the undecodable rows
    fn scan(&self) -> Result<Scan> {
        let (map, rows) = self.rows()?;
        let mut scan = Scan::default();
        for row in rows {
            let (row, lossy) = text_row(row?);
            scan.count += 1;
            if lossy {
                scan.malformed += 1;
            }
            if let (Some((d, _)), Some((t, _))) = (map.get(&row, "Date"), map.get(&row, "Time")) {
                if let Some(t) = parse_time(d, t) {
                    scan.first.get_or_insert(t);
                    scan.last = Some(t);
                }
            }
        }
        Ok(scan)
    }
}

/// Summary of one pass over the rows
#[derive(Debug, Default)]
struct Scan {
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    count: usize,
    malformed: usize,
}

impl FlightLog for OtxLog {
    fn metas(&mut self) -> Result<Vec<LogMeta>> {
        let Scan { first, last, count, malformed } = self.scan()?;
        let mut meta = LogMeta {
            index: 1,
            logname: file_label(&self.path),
            start: 0,
            end: count,
            size: std::fs::metadata(&self.path)?.len(),
            ..Default::default()
        };
        if let Some(t) = first {
            meta.date = t.format("%Y-%m-%d %H:%M:%S").to_string();
        }
        if let (Some(first), Some(last)) = (first, last) {
            meta.duration = (last - first).to_std().unwrap_or_default();
        }
        if count > 0 {
            meta.flags.insert(MetaFlags::VALID);
        }
        if malformed > 0 {
            warn!("{}: {} rows are not valid text", meta.display_name(), malformed);
            meta.flags.insert(MetaFlags::SUSPECT);
        }
        Ok(vec![meta])
    }

    fn reader(&mut self, meta: &LogMeta, ctx: &PipelineContext<'_>) -> Result<Vec<LogSegment>> {
        let (map, rows) = self.rows()?;
        let mut state = RowState::default();
        let mut records = Vec::new();
        let mut skipped = 0;
        let mut malformed = 0;

        for row in rows {
            let (row, lossy) = text_row(row?);
            if lossy {
                malformed += 1;
            }
            let rec = decode_row(&map, &row, &mut state);
            if ctx.config.only_armed && !rec.is_armed() && rec.alt < GROUND_ALT && rec.speed < GROUND_SPEED {
                skipped += 1;
                continue;
            }
            records.push(rec);
        }

        let mut meta = meta.clone();
        if state.bad_times > 0 {
            warn!("{}: {} rows with unreadable time", meta.display_name(), state.bad_times);
            meta.flags.insert(MetaFlags::SUSPECT);
        }
        if malformed > 0 {
            warn!("{}: {} rows decoded lossily", meta.display_name(), malformed);
            meta.flags.insert(MetaFlags::SUSPECT);
        }
        if skipped > 0 {
            debug!("{}: skipped {} disarmed ground rows", meta.display_name(), skipped);
        }

        Ok(build_segments(ctx, &meta, records))
    }

    fn dump(&mut self, out: &mut dyn Write) -> Result<()> {
        let (map, rows) = self.rows()?;
        map.dump(out)?;
        let mut names: Vec<(&String, usize)> = map.columns.iter().map(|(n, c)| (n, c.index)).collect();
        names.sort_by_key(|(_, i)| *i);

        for row in rows {
            let (row, _) = text_row(row?);
            let fields: Vec<String> = names
                .iter()
                .filter_map(|(n, i)| row.get(*i).map(|v| format!("{}={}", n, v)))
                .collect();
            writeln!(out, "{}", fields.join(" "))?;
        }
        Ok(())
    }

    fn durations(&mut self, metas: &mut [LogMeta]) -> Result<()> {
        let scan = self.scan()?;
        if let (Some(first), Some(last)) = (scan.first, scan.last) {
            for meta in metas.iter_mut() {
                meta.duration = (last - first).to_std().unwrap_or_default();
            }
        }
        Ok(())
    }
}
