//! # Blackbox Decoder
//!
//! Decodes INAV/Betaflight blackbox recordings. A file holds one or more
//! log entries, each starting with an `H Product:` header block followed by
//! binary frames:
//!
//! - `I` intra frames: absolute main-loop values
//! - `P` inter frames: main-loop deltas against predictors built from the
//!   previous one or two main frames
//! - `G` GPS frames, `H` GPS home frames, `S` slow (mode/failsafe) frames
//! - `E` events, ending with `End of log`
//!
//! One record is emitted per GPS frame, merged with the most recent main
//! and slow state. Recording only happens while armed, so every record is
//! armed.

pub mod header;
pub mod stream;

use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use self::header::{BlackboxHeader, FrameDef, Predictor};
use self::stream::{ByteStream, Encoding};
use super::{build_segments, file_label, FlightLog};
use crate::error::{FlightLogError, Result};
use crate::segment::PipelineContext;
use crate::types::{FixType, FlightMode, LogMeta, LogRecord, LogSegment, MetaFlags, Status, UNKNOWN_ALTITUDE};

/// Start of every log entry
pub const PRODUCT_MARKER: &[u8] = b"H Product:";

/// Text following the log-end event
pub const END_OF_LOG: &[u8] = b"End of log";

const EVENT_SYNC_BEEP: u8 = 0;
const EVENT_INFLIGHT_ADJUSTMENT: u8 = 13;
const EVENT_LOGGING_RESUME: u8 = 14;
const EVENT_DISARM: u8 = 15;
const EVENT_FLIGHT_MODE: u8 = 30;
const EVENT_LOG_END: u8 = 255;

// INAV flightModeFlags bits
const MODE_ANGLE: i64 = 1 << 0;
const MODE_HORIZON: i64 = 1 << 1;
const MODE_ALTHOLD: i64 = 1 << 3;
const MODE_RTH: i64 = 1 << 4;
const MODE_POSHOLD: i64 = 1 << 5;
const MODE_LAUNCH: i64 = 1 << 7;
const MODE_MANUAL: i64 = 1 << 8;
const MODE_FAILSAFE: i64 = 1 << 9;
const MODE_WP: i64 = 1 << 11;
const MODE_COURSE_HOLD: i64 = 1 << 12;

/// Map INAV flight mode flags onto the closed mode set
///
/// # Returns
///
/// * `(FlightMode, bool)` - Mode, and whether failsafe is active
pub fn inav_mode(flags: i64, failsafe_phase: i64) -> (FlightMode, bool) {
    let failsafe = flags & MODE_FAILSAFE != 0 || failsafe_phase != 0;
    let mode = if failsafe {
        FlightMode::Failsafe
    } else if flags & MODE_RTH != 0 {
        FlightMode::ReturnToHome
    } else if flags & MODE_WP != 0 {
        FlightMode::Waypoint
    } else if flags & MODE_LAUNCH != 0 {
        FlightMode::Launch
    } else if flags & MODE_COURSE_HOLD != 0 {
        if flags & MODE_ALTHOLD != 0 {
            FlightMode::Cruise3D
        } else {
            FlightMode::Cruise2D
        }
    } else if flags & MODE_POSHOLD != 0 {
        FlightMode::PositionHold
    } else if flags & MODE_ALTHOLD != 0 {
        FlightMode::AltitudeHold
    } else if flags & MODE_MANUAL != 0 {
        FlightMode::Manual
    } else if flags & MODE_ANGLE != 0 {
        FlightMode::Angle
    } else if flags & MODE_HORIZON != 0 {
        FlightMode::Horizon
    } else {
        FlightMode::Acro
    };
    (mode, failsafe)
}

/// Text for an INAV disarm reason code
pub fn disarm_reason(code: u32) -> &'static str {
    match code {
        0 => "NONE",
        1 => "TIMEOUT",
        2 => "STICKS",
        3 => "SWITCH_3D",
        4 => "SWITCH",
        5 => "KILLSWITCH",
        6 => "FAILSAFE",
        7 => "NAVIGATION",
        8 => "LANDING",
        _ => "OTHER",
    }
}

/// Logged events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SyncBeep,
    InflightAdjustment,
    LoggingResume,
    Disarm(u32),
    FlightMode(u32),
    LogEnd,
}

/// One decoded unit of the frame stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Main frame; values in [`FrameDecoder::main`]
    Main { intra: bool },
    /// P frame without a preceding I frame, dropped
    Skipped,
    Gps,
    Home,
    Slow,
    Event(Event),
    /// Byte that starts no known frame
    Corrupt(u8),
}

/// Stateful frame decoder for one log entry
#[derive(Debug)]
pub struct FrameDecoder<'a> {
    header: &'a BlackboxHeader,
    stream: ByteStream<'a>,
    main: Vec<i64>,
    prev: Vec<i64>,
    prev2: Vec<i64>,
    have_history: bool,
    gps: Vec<i64>,
    have_gps: bool,
    home: Vec<i64>,
    slow: Vec<i64>,
    last_main_time: i64,
    time_index: Option<usize>,
}

fn read_raw(stream: &mut ByteStream<'_>, def: &FrameDef) -> Result<Vec<i64>> {
    let n = def.len();
    let mut raw = vec![0i64; n];
    let mut i = 0;

    while i < n {
        let (_, encoding) = def.field(i);
        match encoding {
            Encoding::SignedVb => {
                raw[i] = stream.read_signed_vb()? as i64;
                i += 1;
            }
            Encoding::UnsignedVb => {
                let v = stream.read_unsigned_vb()?;
                raw[i] = if def.signed.get(i).copied().unwrap_or(false) { v as i32 as i64 } else { v as i64 };
                i += 1;
            }
            Encoding::Neg14Bit => {
                raw[i] = stream.read_neg_14bit()? as i64;
                i += 1;
            }
            Encoding::Tag8_8Svb => {
                let mut group = 1;
                while group < 8 && i + group < n && def.field(i + group).1 == Encoding::Tag8_8Svb {
                    group += 1;
                }
                for (j, v) in stream.read_tag8_8svb(group)?.into_iter().enumerate() {
                    raw[i + j] = v as i64;
                }
                i += group;
            }
            Encoding::Tag2_3S32 => {
                for (j, v) in stream.read_tag2_3s32()?.into_iter().enumerate() {
                    if i + j < n {
                        raw[i + j] = v as i64;
                    }
                }
                i += 3;
            }
            Encoding::Tag8_4S16 => {
                for (j, v) in stream.read_tag8_4s16()?.into_iter().enumerate() {
                    if i + j < n {
                        raw[i + j] = v as i64;
                    }
                }
                i += 4;
            }
            Encoding::Null => {
                i += 1;
            }
        }
    }
    Ok(raw)
}

impl<'a> FrameDecoder<'a> {
    /// Decoder over the frame bytes that follow `header`
    pub fn new(header: &'a BlackboxHeader, frames: &'a [u8]) -> Self {
        Self {
            header,
            stream: ByteStream::new(frames),
            main: vec![0; header.intra.len()],
            prev: vec![0; header.intra.len()],
            prev2: vec![0; header.intra.len()],
            have_history: false,
            gps: vec![0; header.gps.len()],
            have_gps: false,
            home: vec![0; header.gps_home.len()],
            slow: vec![0; header.slow.len()],
            last_main_time: 0,
            time_index: header.intra.index_of("time"),
        }
    }

    pub fn header(&self) -> &BlackboxHeader {
        self.header
    }

    /// Latest main frame values (I/P field order)
    pub fn main(&self) -> &[i64] {
        &self.main
    }

    pub fn gps(&self) -> &[i64] {
        &self.gps
    }

    pub fn home(&self) -> &[i64] {
        &self.home
    }

    pub fn slow(&self) -> &[i64] {
        &self.slow
    }

    /// Main loop time of the latest main frame, microseconds since boot
    pub fn main_time(&self) -> i64 {
        self.last_main_time
    }

    fn predict(
        &self,
        def: &FrameDef,
        raw: &[i64],
        prev: Option<&[i64]>,
        prev2: Option<&[i64]>,
    ) -> Vec<i64> {
        let mut out = vec![0i64; raw.len()];
        for i in 0..raw.len() {
            let at = |v: Option<&[i64]>| v.and_then(|v| v.get(i).copied()).unwrap_or(0);
            let prediction = match def.field(i).0 {
                Predictor::Zero => 0,
                Predictor::Previous => at(prev),
                Predictor::StraightLine => match prev2 {
                    Some(_) => 2 * at(prev) - at(prev2),
                    None => at(prev),
                },
                Predictor::Average2 => match prev2 {
                    Some(_) => (at(prev) + at(prev2)) / 2,
                    None => at(prev),
                },
                Predictor::MinThrottle => self.header.min_throttle,
                Predictor::Motor0 => def
                    .index_of("motor[0]")
                    .filter(|&m| m < i)
                    .map(|m| out[m])
                    .unwrap_or(0),
                Predictor::Increment => at(prev) + 1,
                Predictor::HomeCoord => {
                    let axis = if def.names.get(i).is_some_and(|n| n.ends_with("[1]")) { 1 } else { 0 };
                    self.home.get(axis).copied().unwrap_or(0)
                }
                Predictor::Centre1500 => 1500,
                Predictor::VbatRef => self.header.vbat_ref,
                Predictor::LastMainFrameTime => self.last_main_time,
                Predictor::MinMotor => self.header.min_motor,
            };
            out[i] = prediction.wrapping_add(raw[i]);
        }
        out
    }

    fn finish_main(&mut self, values: Vec<i64>, intra: bool) {
        if intra {
            self.prev2 = values.clone();
        } else {
            self.prev2 = std::mem::replace(&mut self.prev, values.clone());
        }
        self.prev = values.clone();
        if let Some(t) = self.time_index.and_then(|i| values.get(i).copied()) {
            self.last_main_time = t;
        }
        self.main = values;
        self.have_history = true;
    }

    fn read_event(&mut self) -> Result<Event> {
        let kind = self.stream.read_byte()?;
        let event = match kind {
            EVENT_SYNC_BEEP => {
                self.stream.read_unsigned_vb()?;
                Event::SyncBeep
            }
            EVENT_INFLIGHT_ADJUSTMENT => {
                let function = self.stream.read_byte()?;
                if function & 0x80 != 0 {
                    for _ in 0..4 {
                        self.stream.read_byte()?;
                    }
                } else {
                    self.stream.read_signed_vb()?;
                }
                Event::InflightAdjustment
            }
            EVENT_LOGGING_RESUME => {
                self.stream.read_unsigned_vb()?;
                self.stream.read_unsigned_vb()?;
                self.have_history = false;
                Event::LoggingResume
            }
            EVENT_DISARM => Event::Disarm(self.stream.read_unsigned_vb()?),
            EVENT_FLIGHT_MODE => {
                let flags = self.stream.read_unsigned_vb()?;
                self.stream.read_unsigned_vb()?;
                Event::FlightMode(flags)
            }
            EVENT_LOG_END => {
                let text = self.stream.read_cstring(END_OF_LOG.len() + 1);
                if text.as_bytes() != END_OF_LOG {
                    warn!("Log end event without end marker: {:?}", text);
                }
                Event::LogEnd
            }
            other => {
                return Err(FlightLogError::Truncated(format!("unknown event type {}", other)));
            }
        };
        Ok(event)
    }

    /// Decode the next frame
    ///
    /// # Returns
    ///
    /// * `Ok(None)` at the end of the entry
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if the data ends inside a frame or an event type
    /// is unknown
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(marker) = self.stream.peek() else {
            return Ok(None);
        };
        self.stream.read_byte()?;
        let header = self.header;

        let frame = match marker {
            b'I' => {
                let raw = read_raw(&mut self.stream, &header.intra)?;
                let values = self.predict(&header.intra, &raw, None, None);
                self.finish_main(values, true);
                Frame::Main { intra: true }
            }
            b'P' => {
                let raw = read_raw(&mut self.stream, &header.inter)?;
                if !self.have_history {
                    Frame::Skipped
                } else {
                    let values = self.predict(&header.inter, &raw, Some(&self.prev), Some(&self.prev2));
                    self.finish_main(values, false);
                    Frame::Main { intra: false }
                }
            }
            b'G' => {
                let raw = read_raw(&mut self.stream, &header.gps)?;
                let prev = self.have_gps.then_some(self.gps.as_slice());
                self.gps = self.predict(&header.gps, &raw, prev, None);
                self.have_gps = true;
                Frame::Gps
            }
            b'H' => {
                let raw = read_raw(&mut self.stream, &header.gps_home)?;
                self.home = self.predict(&header.gps_home, &raw, Some(&self.home), None);
                Frame::Home
            }
            b'S' => {
                let raw = read_raw(&mut self.stream, &header.slow)?;
                self.slow = self.predict(&header.slow, &raw, Some(&self.slow), None);
                Frame::Slow
            }
            b'E' => Frame::Event(self.read_event()?),
            other => {
                self.have_history = false;
                Frame::Corrupt(other)
            }
        };
        Ok(Some(frame))
    }
}

/// Field positions resolved once per header
#[derive(Debug, Clone, Default)]
struct FieldIndex {
    time: Option<usize>,
    vbat: Option<usize>,
    amperage: Option<usize>,
    rssi: Option<usize>,
    throttle: Option<usize>,
    roll: Option<usize>,
    pitch: Option<usize>,
    heading: Option<usize>,
    baro_alt: Option<usize>,
    nav_alt: Option<usize>,
    gps_time: Option<usize>,
    fix: Option<usize>,
    numsat: Option<usize>,
    lat: Option<usize>,
    lon: Option<usize>,
    galt: Option<usize>,
    speed: Option<usize>,
    course: Option<usize>,
    hdop: Option<usize>,
    mode_flags: Option<usize>,
    failsafe_phase: Option<usize>,
}

impl FieldIndex {
    fn new(h: &BlackboxHeader) -> Self {
        Self {
            time: h.intra.index_of("time"),
            vbat: h.intra.index_of("vbat"),
            amperage: h.intra.index_of("amperage"),
            rssi: h.intra.index_of("rssi"),
            throttle: h.intra.index_of("rcCommand[3]"),
            roll: h.intra.index_of("attitude[0]"),
            pitch: h.intra.index_of("attitude[1]"),
            heading: h.intra.index_of("attitude[2]"),
            baro_alt: h.intra.index_of("BaroAlt"),
            nav_alt: h.intra.index_of("navPos[2]"),
            gps_time: h.gps.index_of("time"),
            fix: h.gps.index_of("GPS_fixType"),
            numsat: h.gps.index_of("GPS_numSat"),
            lat: h.gps.index_of("GPS_coord[0]"),
            lon: h.gps.index_of("GPS_coord[1]"),
            galt: h.gps.index_of("GPS_altitude"),
            speed: h.gps.index_of("GPS_speed"),
            course: h.gps.index_of("GPS_ground_course"),
            hdop: h.gps.index_of("GPS_hdop"),
            mode_flags: h.slow.index_of("flightModeFlags"),
            failsafe_phase: h.slow.index_of("failsafePhase"),
        }
    }
}

fn value(values: &[i64], index: Option<usize>) -> Option<i64> {
    index.and_then(|i| values.get(i).copied())
}

/// Everything decoded from one entry
#[derive(Debug, Default)]
struct DecodedEntry {
    records: Vec<LogRecord>,
    first_time: Option<i64>,
    last_time: i64,
    ended: bool,
    corrupt: bool,
    disarm: Option<String>,
}

fn parse_start_time(header: &BlackboxHeader) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(header.start_datetime.trim()).ok()?;
    // Flight controllers without a clock log year 0
    if parsed.timestamp() <= 0 {
        return None;
    }
    Some(parsed.with_timezone(&Utc))
}

fn decode_entry(header: &BlackboxHeader, frames: &[u8], want_records: bool) -> DecodedEntry {
    let idx = FieldIndex::new(header);
    let base = parse_start_time(header).unwrap_or_default();
    let mut decoder = FrameDecoder::new(header, frames);
    let mut out = DecodedEntry::default();
    let mut energy = 0.0;
    let mut energy_time: Option<i64> = None;
    let mut first_galt: Option<f64> = None;

    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("Blackbox decode stopped: {}", e);
                out.corrupt = true;
                break;
            }
        };

        match frame {
            Frame::Main { .. } => {
                let t = decoder.main_time();
                out.first_time.get_or_insert(t);
                out.last_time = t;
                if let Some(cur) = value(decoder.main(), idx.amperage) {
                    if let Some(prev_t) = energy_time {
                        let dt_us = (t - prev_t).max(0) as f64;
                        energy += (cur as f64 / 100.0) * dt_us / 3_600_000.0;
                    }
                    energy_time = Some(t);
                }
            }
            Frame::Gps if want_records => {
                let main = decoder.main();
                let gps = decoder.gps();
                let slow = decoder.slow();
                let t = value(gps, idx.gps_time).unwrap_or(decoder.main_time());
                let start = out.first_time.unwrap_or(t);

                let mut rec = LogRecord {
                    utc: base + chrono::Duration::microseconds(t - start),
                    lat: value(gps, idx.lat).unwrap_or(0) as f64 / 10_000_000.0,
                    lon: value(gps, idx.lon).unwrap_or(0) as f64 / 10_000_000.0,
                    numsat: value(gps, idx.numsat).unwrap_or(0).clamp(0, 255) as u8,
                    fix: match value(gps, idx.fix).unwrap_or(0) {
                        0 => FixType::NoFix,
                        1 => FixType::Fix2D,
                        _ => FixType::Fix3D,
                    },
                    speed: value(gps, idx.speed).unwrap_or(0) as f64 / 100.0,
                    course: (value(gps, idx.course).unwrap_or(0) / 10).rem_euclid(360) as u16,
                    hdop: value(gps, idx.hdop).unwrap_or(0).clamp(0, u16::MAX as i64) as u16,
                    volts: value(main, idx.vbat).unwrap_or(0) as f64 / 100.0,
                    amps: value(main, idx.amperage).unwrap_or(0) as f64 / 100.0,
                    energy,
                    rssi: (value(main, idx.rssi).unwrap_or(0).clamp(0, 1023) * 100 / 1023) as u8,
                    throttle: ((value(main, idx.throttle).unwrap_or(1000) - 1000) / 10).clamp(0, 100) as i32,
                    roll: value(main, idx.roll).unwrap_or(0) as f64 / 10.0,
                    pitch: value(main, idx.pitch).unwrap_or(0) as f64 / 10.0,
                    status: Status::ARMED,
                    ..Default::default()
                };

                rec.heading = match value(main, idx.heading) {
                    Some(h) => (h / 10).rem_euclid(360) as u16,
                    None => rec.course,
                };

                if let Some(galt) = value(gps, idx.galt) {
                    rec.galt = galt as f64;
                }
                rec.alt = if let Some(baro) = value(main, idx.baro_alt) {
                    baro as f64 / 100.0
                } else if let Some(nav) = value(main, idx.nav_alt) {
                    nav as f64 / 100.0
                } else if rec.galt > UNKNOWN_ALTITUDE && rec.fix == FixType::Fix3D {
                    rec.galt - *first_galt.get_or_insert(rec.galt)
                } else {
                    0.0
                };

                let (mode, failsafe) = inav_mode(
                    value(slow, idx.mode_flags).unwrap_or(0),
                    value(slow, idx.failsafe_phase).unwrap_or(0),
                );
                rec.mode = mode;
                rec.status.set(Status::FAILSAFE, failsafe);

                out.records.push(rec);
            }
            Frame::Event(Event::Disarm(code)) => out.disarm = Some(disarm_reason(code).to_string()),
            Frame::Event(Event::LogEnd) => {
                out.ended = true;
                break;
            }
            Frame::Corrupt(byte) => {
                if !out.corrupt {
                    debug!("Unexpected frame byte 0x{:02X}, resyncing", byte);
                }
                out.corrupt = true;
            }
            _ => {}
        }
    }

    out
}

/// Blackbox file
#[derive(Debug)]
pub struct BlackboxLog {
    path: PathBuf,
    data: Vec<u8>,
}

impl BlackboxLog {
    /// Read a blackbox file into memory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path)?;
        Ok(Self { path, data })
    }

    /// Byte offsets of each entry's `H Product:` line
    ///
    /// Entries are concatenated directly, so the marker may follow the
    /// previous entry's final frame byte.
    fn entry_offsets(&self) -> Vec<usize> {
        self.data
            .windows(PRODUCT_MARKER.len())
            .enumerate()
            .filter(|(_, w)| *w == PRODUCT_MARKER)
            .map(|(i, _)| i)
            .collect()
    }

    fn entry(&self, meta: &LogMeta) -> Result<&[u8]> {
        self.data
            .get(meta.start..meta.end)
            .ok_or(FlightLogError::NoSuchEntry(meta.index))
    }
}

impl FlightLog for BlackboxLog {
    fn metas(&mut self) -> Result<Vec<LogMeta>> {
        let offsets = self.entry_offsets();
        if offsets.is_empty() {
            return Err(FlightLogError::Truncated(format!("{}: no blackbox header", self.path.display())));
        }

        let logname = file_label(&self.path);
        let mut metas = Vec::with_capacity(offsets.len());
        for (n, &start) in offsets.iter().enumerate() {
            let end = offsets.get(n + 1).copied().unwrap_or(self.data.len());
            let bytes = &self.data[start..end];
            let mut meta = LogMeta {
                index: n + 1,
                logname: logname.clone(),
                start,
                end,
                size: (end - start) as u64,
                ..Default::default()
            };

            match BlackboxHeader::parse(bytes) {
                Ok((header, _)) => {
                    meta.firmware = header.firmware.clone();
                    meta.craft = header.craft.clone();
                    if let Some(t) = parse_start_time(&header) {
                        meta.date = t.format("%Y-%m-%d %H:%M:%S").to_string();
                    }
                    meta.flags.insert(MetaFlags::VALID);
                    if !bytes.windows(END_OF_LOG.len()).any(|w| w == END_OF_LOG) {
                        meta.flags.insert(MetaFlags::SUSPECT);
                    }
                }
                Err(e) => {
                    warn!("{} entry {}: {}", logname, n + 1, e);
                    meta.flags.insert(MetaFlags::SUSPECT);
                }
            }
            metas.push(meta);
        }
        Ok(metas)
    }

    fn reader(&mut self, meta: &LogMeta, ctx: &PipelineContext<'_>) -> Result<Vec<LogSegment>> {
        let bytes = self.entry(meta)?;
        let (header, offset) = BlackboxHeader::parse(bytes)?;
        let decoded = decode_entry(&header, &bytes[offset..], true);

        let mut meta = meta.clone();
        if decoded.corrupt || !decoded.ended {
            meta.flags.insert(MetaFlags::SUSPECT);
        }
        if decoded.disarm.is_some() {
            meta.disarm = decoded.disarm.clone();
        }
        info!(
            "{}: {} GPS records{}",
            meta.display_name(),
            decoded.records.len(),
            if meta.is_suspect() { " (suspect)" } else { "" }
        );

        Ok(build_segments(ctx, &meta, decoded.records))
    }

    fn dump(&mut self, out: &mut dyn Write) -> Result<()> {
        let metas = self.metas()?;
        for meta in metas.iter().filter(|m| m.is_valid()) {
            let bytes = self.entry(meta)?;
            let (header, offset) = BlackboxHeader::parse(bytes)?;
            writeln!(out, "# Log {} ({})", meta.index, header.firmware)?;
            let mut decoder = FrameDecoder::new(&header, &bytes[offset..]);

            while let Ok(Some(frame)) = decoder.next_frame() {
                let (tag, def, values) = match frame {
                    Frame::Main { intra } => (if intra { 'I' } else { 'P' }, &header.intra, decoder.main()),
                    Frame::Gps => ('G', &header.gps, decoder.gps()),
                    Frame::Home => ('H', &header.gps_home, decoder.home()),
                    Frame::Slow => ('S', &header.slow, decoder.slow()),
                    Frame::Event(ev) => {
                        writeln!(out, "E {:?}", ev)?;
                        continue;
                    }
                    Frame::Skipped | Frame::Corrupt(_) => continue,
                };
                let fields: Vec<String> = def
                    .names
                    .iter()
                    .zip(values)
                    .map(|(name, v)| format!("{}={}", name, v))
                    .collect();
                writeln!(out, "{} {}", tag, fields.join(" "))?;
            }
        }
        Ok(())
    }

    fn durations(&mut self, metas: &mut [LogMeta]) -> Result<()> {
        for meta in metas.iter_mut().filter(|m| m.is_valid()) {
            let bytes = self.entry(meta)?;
            let Ok((header, offset)) = BlackboxHeader::parse(bytes) else {
                continue;
            };
            let decoded = decode_entry(&header, &bytes[offset..], false);
            if let Some(first) = decoded.first_time {
                meta.duration = std::time::Duration::from_micros((decoded.last_time - first).max(0) as u64);
            }
            if decoded.corrupt || !decoded.ended {
                meta.flags.insert(MetaFlags::SUSPECT);
            }
            if decoded.disarm.is_some() {
                meta.disarm = decoded.disarm;
            }
        }
        Ok(())
    }
}
