//! # Serial Output Module
//!
//! Serial port used by the LTM generator to feed a ground station or
//! antenna tracker.
//!
//! This module handles:
//! - Opening the configured device at an LTM baud rate (8N1)
//! - Writing complete frames and flushing after each
//! - Falling back through a list of candidate devices

pub mod port_trait;

pub use port_trait::{SerialPortIO, TokioSerialPort, WriterPort};

use crate::error::{FlightLogError, Result};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Default LTM baud rate
pub const LTM_DEFAULT_BAUD_RATE: u32 = 115_200;

/// Device name that sends the LTM stream to stdout instead of a serial port
pub const LTM_STDOUT_DEVICE: &str = "-";

/// Baud rates LTM receivers commonly support
pub const LTM_BAUD_RATES: &[u32] = &[2400, 4800, 9600, 19_200, 38_400, 57_600, 115_200];

/// Device paths tried when none is configured (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-serial adapters (most common for telemetry radios)
    "/dev/ttyACM0", // USB CDC devices
];

/// LTM serial output handle
pub struct LtmSerial {
    port: TokioSerialPort,
    device_path: String,
    baud_rate: u32,
}

impl std::fmt::Debug for LtmSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LtmSerial")
            .field("device_path", &self.device_path)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl LtmSerial {
    /// Open the given device, or the default candidates if `device` is empty
    ///
    /// # Arguments
    ///
    /// * `device` - Device path (e.g. "/dev/ttyUSB0"), empty for auto-detect
    /// * `baud_rate` - Line speed
    ///
    /// # Errors
    ///
    /// Returns error if no candidate device can be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flightlog_replay::serial::LtmSerial;
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let serial = LtmSerial::open("/dev/ttyUSB0", 115_200)?;
    ///     println!("LTM on {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(device: &str, baud_rate: u32) -> Result<Self> {
        if device.is_empty() {
            Self::open_with_paths(DEFAULT_DEVICE_PATHS, baud_rate)
        } else {
            Self::open_with_paths(&[device], baud_rate)
        }
    }

    /// Open the first device in `paths` that succeeds
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try
    /// * `baud_rate` - Line speed
    ///
    /// # Returns
    ///
    /// * `Result<LtmSerial>` - Connected serial port or error
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened LTM output at {} ({} baud)", path, baud_rate);
                    return Ok(Self {
                        port: TokioSerialPort::new(port),
                        device_path: path.to_string(),
                        baud_rate,
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(FlightLogError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| FlightLogError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Device path of the opened port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Configured line speed
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Give up the handle, keeping only the I/O half for the generator task
    pub fn into_port(self) -> TokioSerialPort {
        self.port
    }
}

/// Write one frame and flush
///
/// # Errors
///
/// Returns `FlightLogError::Serial` if the write or flush fails
pub async fn send_frame<P: SerialPortIO + ?Sized>(port: &mut P, frame: &[u8]) -> Result<()> {
    port.write_all(frame)
        .await
        .map_err(|e| FlightLogError::Serial(format!("Failed to write frame: {}", e)))?;

    port.flush()
        .await
        .map_err(|e| FlightLogError::Serial(format!("Failed to flush serial port: {}", e)))?;

    debug!("Sent LTM frame ({} bytes)", frame.len());
    Ok(())
}
