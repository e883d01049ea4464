//! # LTM Frame Decoder
//!
//! Decodes complete LTM frames, and extracts frames from a raw byte stream
//! that may contain noise or other protocols between them.

use bytes::Buf;
use tracing::debug;

use super::crc::ltm_checksum;
use super::protocol::*;
use crate::error::{FlightLogError, Result};

/// Decode a complete LTM frame
///
/// # Arguments
///
/// * `frame` - Complete frame bytes (`$T`, function, payload, checksum)
///
/// # Returns
///
/// * `Result<LtmFrame>` - Decoded frame, or error if invalid
///
/// # Errors
///
/// Returns error if:
/// - Frame is too short
/// - Header is incorrect
/// - Function byte is unknown
/// - Checksum fails
pub fn decode_frame(frame: &[u8]) -> Result<LtmFrame> {
    if frame.len() < LTM_FRAME_OVERHEAD {
        return Err(FlightLogError::LtmProtocol("Frame too short".to_string()));
    }

    if frame[..2] != LTM_HEADER {
        return Err(FlightLogError::LtmProtocol(format!(
            "Invalid header: 0x{:02X} 0x{:02X}",
            frame[0], frame[1]
        )));
    }

    let function = frame[2];
    let size = payload_size(function).ok_or_else(|| {
        FlightLogError::LtmProtocol(format!("Unknown frame function: 0x{:02X}", function))
    })?;

    if frame.len() < LTM_FRAME_OVERHEAD + size {
        return Err(FlightLogError::LtmProtocol(format!(
            "Frame too short: expected {} bytes, got {}",
            LTM_FRAME_OVERHEAD + size,
            frame.len()
        )));
    }

    let payload = &frame[3..3 + size];
    let received = frame[3 + size];
    let calculated = ltm_checksum(payload);
    if calculated != received {
        return Err(FlightLogError::LtmProtocol(format!(
            "Checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
            calculated, received
        )));
    }

    decode_payload(function, payload)
}

/// Decode a payload whose checksum has already been verified
pub fn decode_payload(function: u8, payload: &[u8]) -> Result<LtmFrame> {
    check_payload(function, payload)?;
    let mut buf = payload;

    let frame = match function {
        LTM_FRAME_GPS => {
            let lat = buf.get_i32_le() as f64 / 10_000_000.0;
            let lon = buf.get_i32_le() as f64 / 10_000_000.0;
            let speed = buf.get_u8();
            let alt = buf.get_i32_le() as f64 / 100.0;
            let sats = buf.get_u8();
            LtmFrame::Gps(GpsFrame { lat, lon, speed, alt, numsat: sats >> 2, fix: sats & 0x03 })
        }
        LTM_FRAME_ATTITUDE => LtmFrame::Attitude(AttitudeFrame {
            pitch: buf.get_i16_le(),
            roll: buf.get_i16_le(),
            heading: buf.get_i16_le(),
        }),
        LTM_FRAME_STATUS => {
            let mut status = StatusFrame {
                vbat_mv: buf.get_u16_le(),
                mah: buf.get_u16_le(),
                rssi: buf.get_u8(),
                airspeed: buf.get_u8(),
                ..Default::default()
            };
            status.apply_status_byte(buf.get_u8());
            LtmFrame::Status(status)
        }
        LTM_FRAME_ORIGIN => LtmFrame::Origin(OriginFrame {
            lat: buf.get_i32_le() as f64 / 10_000_000.0,
            lon: buf.get_i32_le() as f64 / 10_000_000.0,
            alt: buf.get_i32_le() as f64 / 100.0,
            osd: buf.get_u8() != 0,
            fix: buf.get_u8() != 0,
        }),
        LTM_FRAME_EXTRA => LtmFrame::Extra(ExtraFrame {
            hdop: buf.get_u16_le(),
            hw_status: buf.get_u8(),
            counter: buf.get_u8(),
            disarm_reason: buf.get_u8(),
        }),
        _ => LtmFrame::Nav,
    };

    Ok(frame)
}

/// Incremental frame extractor for raw telemetry streams
///
/// Bytes are pushed in arbitrary chunks; complete, checksum-valid frames
/// are returned in order. Anything that does not parse is skipped one byte
/// at a time until the next `$T` header.
#[derive(Debug, Default)]
pub struct LtmStreamParser {
    buffer: Vec<u8>,
    errors: usize,
}

impl LtmStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of corrupt frames or noise bytes skipped so far
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Feed bytes and collect every frame they complete
    pub fn push(&mut self, data: &[u8]) -> Vec<LtmFrame> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();
        let mut pos = 0;

        while pos < self.buffer.len() {
            let rest = &self.buffer[pos..];
            if rest[0] != LTM_HEADER[0] {
                pos += 1;
                self.errors += 1;
                continue;
            }
            if rest.len() < 3 {
                break;
            }
            if rest[1] != LTM_HEADER[1] {
                pos += 1;
                self.errors += 1;
                continue;
            }
            let Some(size) = payload_size(rest[2]) else {
                pos += 1;
                self.errors += 1;
                continue;
            };
            let total = LTM_FRAME_OVERHEAD + size;
            if rest.len() < total {
                break;
            }
            match decode_frame(&rest[..total]) {
                Ok(frame) => {
                    frames.push(frame);
                    pos += total;
                }
                Err(e) => {
                    debug!("Skipping corrupt LTM frame: {}", e);
                    self.errors += 1;
                    pos += 1;
                }
            }
        }

        self.buffer.drain(..pos);
        frames
    }
}
