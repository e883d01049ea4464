//! # LTM Protocol Constants and Types
//!
//! Frame layout: `$` `T` function payload checksum, where the checksum is
//! the XOR of the payload bytes. All multi-byte fields are little-endian.

use crate::error::{FlightLogError, Result};
use crate::types::FlightMode;

/// LTM frame header
pub const LTM_HEADER: [u8; 2] = *b"$T";

/// Header (2) + function (1) + checksum (1)
pub const LTM_FRAME_OVERHEAD: usize = 4;

/// GPS frame function byte
pub const LTM_FRAME_GPS: u8 = b'G';

/// Attitude frame function byte
pub const LTM_FRAME_ATTITUDE: u8 = b'A';

/// Status frame function byte
pub const LTM_FRAME_STATUS: u8 = b'S';

/// Origin (home) frame function byte
pub const LTM_FRAME_ORIGIN: u8 = b'O';

/// Navigation frame function byte
pub const LTM_FRAME_NAV: u8 = b'N';

/// Extra (hdop, hardware status) frame function byte
pub const LTM_FRAME_EXTRA: u8 = b'X';

/// GPS payload size
pub const LTM_GPS_PAYLOAD_SIZE: usize = 14;

/// Attitude payload size
pub const LTM_ATTITUDE_PAYLOAD_SIZE: usize = 6;

/// Status payload size
pub const LTM_STATUS_PAYLOAD_SIZE: usize = 7;

/// Origin payload size
pub const LTM_ORIGIN_PAYLOAD_SIZE: usize = 14;

/// Navigation payload size
pub const LTM_NAV_PAYLOAD_SIZE: usize = 6;

/// Extra payload size
pub const LTM_EXTRA_PAYLOAD_SIZE: usize = 6;

/// LTM mode number used for flight modes LTM cannot express
pub const LTM_MODE_UNKNOWN: u8 = 19;

/// Payload size for a frame function byte
///
/// # Returns
///
/// * `Option<usize>` - Payload size, or `None` for an unknown function
pub fn payload_size(function: u8) -> Option<usize> {
    match function {
        LTM_FRAME_GPS => Some(LTM_GPS_PAYLOAD_SIZE),
        LTM_FRAME_ATTITUDE => Some(LTM_ATTITUDE_PAYLOAD_SIZE),
        LTM_FRAME_STATUS => Some(LTM_STATUS_PAYLOAD_SIZE),
        LTM_FRAME_ORIGIN => Some(LTM_ORIGIN_PAYLOAD_SIZE),
        LTM_FRAME_NAV => Some(LTM_NAV_PAYLOAD_SIZE),
        LTM_FRAME_EXTRA => Some(LTM_EXTRA_PAYLOAD_SIZE),
        _ => None,
    }
}

/// GPS frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsFrame {
    /// Latitude in degrees (sent as degrees × 10^7)
    pub lat: f64,

    /// Longitude in degrees (sent as degrees × 10^7)
    pub lon: f64,

    /// Ground speed in m/s
    pub speed: u8,

    /// Relative altitude in metres (sent as cm)
    pub alt: f64,

    /// Satellites in view
    pub numsat: u8,

    /// Fix type (0 none, 1 no fix, 2 2D, 3 3D)
    pub fix: u8,
}

/// Attitude frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttitudeFrame {
    /// Pitch in degrees
    pub pitch: i16,

    /// Roll in degrees
    pub roll: i16,

    /// Heading in degrees
    pub heading: i16,
}

/// Status frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFrame {
    /// Battery voltage in millivolts
    pub vbat_mv: u16,

    /// Consumed capacity in mAh
    pub mah: u16,

    /// RSSI (0-255)
    pub rssi: u8,

    /// Airspeed in m/s
    pub airspeed: u8,

    /// Armed flag (status bit 0)
    pub armed: bool,

    /// Failsafe flag (status bit 1)
    pub failsafe: bool,

    /// LTM flight mode number (status bits 2-7)
    pub mode: u8,
}

impl StatusFrame {
    /// Pack armed/failsafe/mode into the status byte
    pub fn status_byte(&self) -> u8 {
        (self.armed as u8) | ((self.failsafe as u8) << 1) | (self.mode << 2)
    }

    /// Unpack a status byte into armed/failsafe/mode
    pub fn apply_status_byte(&mut self, status: u8) {
        self.armed = status & 0x01 != 0;
        self.failsafe = status & 0x02 != 0;
        self.mode = status >> 2;
    }
}

/// Origin (home) frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OriginFrame {
    /// Home latitude in degrees
    pub lat: f64,

    /// Home longitude in degrees
    pub lon: f64,

    /// Home altitude in metres (sent as cm)
    pub alt: f64,

    /// OSD enabled
    pub osd: bool,

    /// Home fix valid
    pub fix: bool,
}

/// Extra frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtraFrame {
    /// HDOP × 100
    pub hdop: u16,

    /// Hardware status (0 = healthy)
    pub hw_status: u8,

    /// Rolling frame counter
    pub counter: u8,

    /// Disarm reason code
    pub disarm_reason: u8,
}

/// A decoded LTM frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LtmFrame {
    Gps(GpsFrame),
    Attitude(AttitudeFrame),
    Status(StatusFrame),
    Origin(OriginFrame),
    Extra(ExtraFrame),
    /// Navigation frames are recognized but carry nothing the model uses
    Nav,
}

/// Map a flight mode to its LTM mode number
///
/// Modes LTM has no number for map to [`LTM_MODE_UNKNOWN`].
pub fn mode_to_ltm(mode: FlightMode) -> u8 {
    match mode {
        FlightMode::Manual => 0,
        FlightMode::Angle => 2,
        FlightMode::Horizon => 3,
        FlightMode::Acro => 4,
        FlightMode::AltitudeHold => 8,
        FlightMode::PositionHold => 9,
        FlightMode::Waypoint => 10,
        FlightMode::ReturnToHome => 13,
        FlightMode::Cruise2D | FlightMode::Cruise3D => 18,
        FlightMode::Launch => 20,
        FlightMode::Failsafe => LTM_MODE_UNKNOWN,
    }
}

/// Map an LTM mode number to a flight mode; unmapped numbers give Acro
pub fn mode_from_ltm(mode: u8) -> FlightMode {
    match mode {
        0 => FlightMode::Manual,
        1 | 4 => FlightMode::Acro,
        2 => FlightMode::Angle,
        3 => FlightMode::Horizon,
        8 => FlightMode::AltitudeHold,
        9 => FlightMode::PositionHold,
        10 => FlightMode::Waypoint,
        13 => FlightMode::ReturnToHome,
        18 => FlightMode::Cruise2D,
        20 => FlightMode::Launch,
        _ => FlightMode::Acro,
    }
}

/// Validate that a payload has the size its function requires
///
/// # Errors
///
/// Returns error if the function is unknown or the payload is too short
pub fn check_payload(function: u8, payload: &[u8]) -> Result<()> {
    let size = payload_size(function).ok_or_else(|| {
        FlightLogError::LtmProtocol(format!("Unknown frame function: 0x{:02X}", function))
    })?;
    if payload.len() < size {
        return Err(FlightLogError::LtmProtocol(format!(
            "{} payload too short: {} bytes",
            function as char,
            payload.len()
        )));
    }
    Ok(())
}
