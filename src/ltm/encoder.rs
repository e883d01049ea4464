//! # LTM Frame Encoder
//!
//! Encodes telemetry values into complete LTM frames.

use bytes::{BufMut, BytesMut};

use super::crc::ltm_checksum;
use super::protocol::*;

/// Wrap a payload into a complete LTM frame
///
/// # Arguments
///
/// * `function` - Frame function byte (`G`, `A`, `S`, ...)
/// * `payload` - Frame payload
///
/// # Returns
///
/// * `Vec<u8>` - `$T` + function + payload + checksum
///
/// # Examples
///
/// ```
/// use flightlog_replay::ltm::encoder::encode_frame;
///
/// let frame = encode_frame(b'A', &[1, 0, 2, 0, 3, 0]);
/// assert_eq!(&frame[..3], b"$TA");
/// assert_eq!(frame.len(), 10);
/// ```
pub fn encode_frame(function: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(LTM_FRAME_OVERHEAD + payload.len());
    frame.put_slice(&LTM_HEADER);
    frame.put_u8(function);
    frame.put_slice(payload);
    frame.put_u8(ltm_checksum(payload));
    frame.to_vec()
}

/// Encode a GPS frame (14-byte payload)
pub fn encode_gps(gps: &GpsFrame) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(LTM_GPS_PAYLOAD_SIZE);
    payload.put_i32_le(scale_coordinate(gps.lat));
    payload.put_i32_le(scale_coordinate(gps.lon));
    payload.put_u8(gps.speed);
    payload.put_i32_le((gps.alt * 100.0) as i32);
    payload.put_u8((gps.numsat.min(63) << 2) | (gps.fix & 0x03));
    encode_frame(LTM_FRAME_GPS, &payload)
}

/// Encode an attitude frame (6-byte payload)
pub fn encode_attitude(att: &AttitudeFrame) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(LTM_ATTITUDE_PAYLOAD_SIZE);
    payload.put_i16_le(att.pitch);
    payload.put_i16_le(att.roll);
    payload.put_i16_le(att.heading);
    encode_frame(LTM_FRAME_ATTITUDE, &payload)
}

/// Encode a status frame (7-byte payload)
pub fn encode_status(status: &StatusFrame) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(LTM_STATUS_PAYLOAD_SIZE);
    payload.put_u16_le(status.vbat_mv);
    payload.put_u16_le(status.mah);
    payload.put_u8(status.rssi);
    payload.put_u8(status.airspeed);
    payload.put_u8(status.status_byte());
    encode_frame(LTM_FRAME_STATUS, &payload)
}

/// Encode an origin (home) frame (14-byte payload)
pub fn encode_origin(origin: &OriginFrame) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(LTM_ORIGIN_PAYLOAD_SIZE);
    payload.put_i32_le(scale_coordinate(origin.lat));
    payload.put_i32_le(scale_coordinate(origin.lon));
    payload.put_i32_le((origin.alt * 100.0) as i32);
    payload.put_u8(origin.osd as u8);
    payload.put_u8(origin.fix as u8);
    encode_frame(LTM_FRAME_ORIGIN, &payload)
}

/// Encode an extra frame (6-byte payload)
pub fn encode_extra(extra: &ExtraFrame) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(LTM_EXTRA_PAYLOAD_SIZE);
    payload.put_u16_le(extra.hdop);
    payload.put_u8(extra.hw_status);
    payload.put_u8(extra.counter);
    payload.put_u8(extra.disarm_reason);
    payload.put_u8(0);
    encode_frame(LTM_FRAME_EXTRA, &payload)
}

/// Degrees to the wire's degrees × 10^7
fn scale_coordinate(deg: f64) -> i32 {
    (deg * 10_000_000.0).round() as i32
}
