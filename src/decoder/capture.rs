//! # LTM Capture Decoder
//!
//! Reads a recorded LTM telemetry stream. The file starts with the
//! [`CAPTURE_MAGIC`] bytes followed by chunks:
//!
//! ```text
//! | time: f64 LE (unix seconds) | len: u16 LE | dir: u8 | payload: len bytes |
//! ```
//!
//! Only inbound chunks (`dir == b'i'`) carry vehicle telemetry. Their
//! payloads are concatenated into one byte stream and run through
//! [`LtmStreamParser`], so frames may straddle chunk boundaries.
//!
//! A capture usually spans several flights; each armed period is one log
//! entry. Entry bounds are indices into the inbound frame sequence, so two
//! periods sharing a chunk stay apart, and decoding an entry replays every
//! earlier frame for origin and telemetry context.

use bytes::Buf;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::blackbox::disarm_reason;
use super::{build_segments, file_label, FlightLog};
use crate::error::{FlightLogError, Result};
use crate::ltm::decoder::LtmStreamParser;
use crate::ltm::protocol::{mode_from_ltm, LtmFrame};
use crate::segment::PipelineContext;
use crate::types::{FixType, FlightMode, LogMeta, LogRecord, LogSegment, MetaFlags, Status, UNKNOWN_ALTITUDE};

/// Capture file signature
pub const CAPTURE_MAGIC: &[u8] = b"LTMRAW";

/// Direction byte of vehicle-to-ground chunks
pub const DIR_INBOUND: u8 = b'i';

/// Chunk header: time (8) + length (2) + direction (1)
const CHUNK_HEADER_SIZE: usize = 11;

/// One captured read or write
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Capture time, unix seconds
    pub time: f64,
    pub dir: u8,
    pub payload: Vec<u8>,
}

impl Chunk {
    pub fn utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros((self.time * 1_000_000.0) as i64).unwrap_or_default()
    }
}

/// Split capture bytes into chunks
///
/// # Returns
///
/// * `(Vec<Chunk>, bool)` - Chunks, and whether the capture ended inside
///   a chunk
///
/// # Errors
///
/// Returns `Truncated` if the capture signature is missing
pub fn parse_chunks(data: &[u8]) -> Result<(Vec<Chunk>, bool)> {
    let Some(mut buf) = data.strip_prefix(CAPTURE_MAGIC) else {
        return Err(FlightLogError::Truncated("missing LTMRAW capture signature".to_string()));
    };

    let mut chunks = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < CHUNK_HEADER_SIZE {
            return Ok((chunks, true));
        }
        let time = buf.get_f64_le();
        let len = buf.get_u16_le() as usize;
        let dir = buf.get_u8();
        if buf.remaining() < len {
            return Ok((chunks, true));
        }
        let payload = buf[..len].to_vec();
        buf.advance(len);
        chunks.push(Chunk { time, dir, payload });
    }
    Ok((chunks, false))
}

/// Latest value of each LTM frame type, merged into records
#[derive(Debug, Default)]
struct TelemetryState {
    rec: LogRecord,
    origin_alt: Option<f64>,
    disarm: Option<u8>,
}

impl TelemetryState {
    /// Apply a frame; returns a record for each GPS frame
    fn apply(&mut self, frame: &LtmFrame, utc: DateTime<Utc>) -> Option<LogRecord> {
        match frame {
            LtmFrame::Gps(g) => {
                let rec = &mut self.rec;
                rec.utc = utc;
                rec.lat = g.lat;
                rec.lon = g.lon;
                rec.speed = g.speed as f64;
                rec.alt = g.alt;
                rec.numsat = g.numsat;
                rec.fix = match g.fix {
                    3 => FixType::Fix3D,
                    2 => FixType::Fix2D,
                    _ => FixType::NoFix,
                };
                rec.galt = match self.origin_alt {
                    Some(home) => home + g.alt,
                    None => UNKNOWN_ALTITUDE,
                };
                return Some(rec.clone());
            }
            LtmFrame::Attitude(a) => {
                self.rec.pitch = a.pitch as f64;
                self.rec.roll = a.roll as f64;
                self.rec.heading = (a.heading as i32).rem_euclid(360) as u16;
                self.rec.course = self.rec.heading;
            }
            LtmFrame::Status(s) => {
                self.rec.volts = s.vbat_mv as f64 / 1000.0;
                self.rec.energy = s.mah as f64;
                self.rec.rssi = (s.rssi as u32 * 100 / 255) as u8;
                self.rec.mode = if s.failsafe { FlightMode::Failsafe } else { mode_from_ltm(s.mode) };
                self.rec.status.set(Status::ARMED, s.armed);
                self.rec.status.set(Status::FAILSAFE, s.failsafe);
            }
            LtmFrame::Origin(o) => {
                if o.fix {
                    self.origin_alt = Some(o.alt);
                }
            }
            LtmFrame::Extra(x) => {
                self.rec.hdop = x.hdop;
                self.rec.status.set(Status::HW_FAIL, x.hw_status != 0);
                self.disarm = Some(x.disarm_reason);
            }
            LtmFrame::Nav => {}
        }
        None
    }
}

/// Inbound frames with their chunk index and time, plus parser errors
fn inbound_frames(chunks: &[Chunk]) -> (Vec<(usize, DateTime<Utc>, LtmFrame)>, usize) {
    let mut parser = LtmStreamParser::new();
    let mut frames = Vec::new();
    for (i, chunk) in chunks.iter().enumerate().filter(|(_, c)| c.dir == DIR_INBOUND) {
        let utc = chunk.utc();
        frames.extend(parser.push(&chunk.payload).into_iter().map(|f| (i, utc, f)));
    }
    (frames, parser.errors())
}

/// LTM telemetry capture file
#[derive(Debug)]
pub struct CaptureLog {
    path: PathBuf,
    data: Vec<u8>,
}

impl CaptureLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path)?;
        Ok(Self { path, data })
    }

    fn chunks(&self) -> Result<(Vec<Chunk>, bool)> {
        let (chunks, truncated) = parse_chunks(&self.data)?;
        if truncated {
            warn!("{}: capture ends inside a chunk", self.path.display());
        }
        Ok((chunks, truncated))
    }
}

impl FlightLog for CaptureLog {
    fn metas(&mut self) -> Result<Vec<LogMeta>> {
        let (chunks, truncated) = self.chunks()?;
        let (frames, errors) = inbound_frames(&chunks);
        let logname = file_label(&self.path);

        // Armed periods as frame ranges
        let mut periods: Vec<(usize, usize)> = Vec::new();
        let mut armed_at: Option<usize> = None;
        for (i, (_, _, frame)) in frames.iter().enumerate() {
            if let LtmFrame::Status(s) = frame {
                match (s.armed, armed_at) {
                    (true, None) => armed_at = Some(i),
                    (false, Some(start)) => {
                        periods.push((start, i + 1));
                        armed_at = None;
                    }
                    _ => {}
                }
            }
        }
        if let Some(start) = armed_at {
            periods.push((start, frames.len()));
        }
        if periods.is_empty() && !chunks.is_empty() {
            periods.push((0, frames.len()));
        }

        let metas = periods
            .into_iter()
            .enumerate()
            .map(|(n, (start, end))| {
                let mut meta = LogMeta { index: n + 1, logname: logname.clone(), start, end, ..Default::default() };
                if let (Some(first), Some(last)) = (frames.get(start), end.checked_sub(1).and_then(|e| frames.get(e))) {
                    meta.size = chunks[first.0..=last.0].iter().map(|c| c.payload.len() as u64).sum();
                    meta.date = first.1.format("%Y-%m-%d %H:%M:%S").to_string();
                    meta.duration = (last.1 - first.1).to_std().unwrap_or_default();
                    meta.flags.insert(MetaFlags::VALID);
                }
                if truncated || errors > 0 {
                    meta.flags.insert(MetaFlags::SUSPECT);
                }
                meta
            })
            .collect();
        Ok(metas)
    }

    fn reader(&mut self, meta: &LogMeta, ctx: &PipelineContext<'_>) -> Result<Vec<LogSegment>> {
        let (chunks, _) = self.chunks()?;
        let (frames, errors) = inbound_frames(&chunks);
        if meta.start > meta.end || meta.end > frames.len() {
            return Err(FlightLogError::NoSuchEntry(meta.index));
        }

        let mut state = TelemetryState::default();
        let mut records = Vec::new();
        for (i, (_, utc, frame)) in frames[..meta.end].iter().enumerate() {
            if let Some(rec) = state.apply(frame, *utc) {
                if i >= meta.start {
                    records.push(rec);
                }
            }
        }

        let mut meta = meta.clone();
        if errors > 0 {
            debug!("{}: skipped {} corrupt LTM bytes", meta.display_name(), errors);
            meta.flags.insert(MetaFlags::SUSPECT);
        }
        if let Some(code) = state.disarm.filter(|_| !state.rec.is_armed()) {
            meta.disarm = Some(disarm_reason(code as u32).to_string());
        }
        Ok(build_segments(ctx, &meta, records))
    }

    fn dump(&mut self, out: &mut dyn Write) -> Result<()> {
        let (chunks, _) = self.chunks()?;
        let (frames, _) = inbound_frames(&chunks);
        for (_, utc, frame) in frames {
            writeln!(out, "{} {:?}", utc.format("%H:%M:%S%.3f"), frame)?;
        }
        Ok(())
    }

    fn durations(&mut self, metas: &mut [LogMeta]) -> Result<()> {
        let (chunks, _) = self.chunks()?;
        let (frames, _) = inbound_frames(&chunks);
        for meta in metas.iter_mut() {
            if let Some(range) = frames.get(meta.start..meta.end) {
                if let (Some(first), Some(last)) = (range.first(), range.last()) {
                    meta.duration = (last.1 - first.1).to_std().unwrap_or_default();
                }
            }
        }
        Ok(())
    }
}
