//! # Channel Sink and LTM Generator
//!
//! The producer side of the concurrent replay pushes events into an
//! unbounded channel; [`LtmGenerator`] drains it on its own task and turns
//! each event into LTM frames on a serial port.

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use super::{RecordSink, ReplayEvent};
use crate::error::{FlightLogError, Result};
use crate::ltm::encoder::{encode_attitude, encode_extra, encode_gps, encode_origin, encode_status};
use crate::ltm::protocol::{
    mode_to_ltm, AttitudeFrame, ExtraFrame, GpsFrame, OriginFrame, StatusFrame, LTM_MODE_UNKNOWN,
};
use crate::serial::{send_frame, SerialPortIO};
use crate::types::{FixType, LogRecord, Status};

/// Send half: delivers events into the channel without blocking
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ReplayEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its consumer reads from
    pub fn new() -> (Self, UnboundedReceiver<ReplayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn deliver(&mut self, event: ReplayEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| FlightLogError::ChannelClosed)
    }
}

/// Channel consumer writing LTM frames
///
/// Per record: G, A and S frames, plus an X frame every fifth record. Home
/// events become O frames. Mission events are ignored since LTM has no
/// waypoint upload.
pub struct LtmGenerator<P> {
    port: P,
    frames: usize,
    counter: u8,
}

impl<P: SerialPortIO> LtmGenerator<P> {
    pub fn new(port: P) -> Self {
        Self { port, frames: 0, counter: 0 }
    }

    /// Frames written so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_port(self) -> P {
        self.port
    }

    /// Drain the channel until the producer closes it
    ///
    /// # Errors
    ///
    /// Returns error if a frame cannot be written
    pub async fn run(&mut self, mut rx: UnboundedReceiver<ReplayEvent>) -> Result<usize> {
        while let Some(event) = rx.recv().await {
            if let ReplayEvent::End = event {
                break;
            }
            self.handle(event).await?;
        }
        info!("LTM generator finished after {} frames", self.frames);
        Ok(self.frames)
    }

    async fn handle(&mut self, event: ReplayEvent) -> Result<()> {
        match event {
            ReplayEvent::Home(home) => {
                let origin = OriginFrame {
                    lat: home.lat,
                    lon: home.lon,
                    alt: home.alt,
                    osd: true,
                    fix: home.is_set(),
                };
                self.write(&encode_origin(&origin)).await
            }
            ReplayEvent::Record { index, record, .. } => {
                self.write(&encode_gps(&gps_frame(&record))).await?;
                self.write(&encode_attitude(&attitude_frame(&record))).await?;
                self.write(&encode_status(&status_frame(&record))).await?;
                if index % 5 == 0 {
                    let extra = ExtraFrame {
                        hdop: record.hdop,
                        hw_status: record.status.contains(Status::HW_FAIL) as u8,
                        counter: self.counter,
                        disarm_reason: 0,
                    };
                    self.counter = self.counter.wrapping_add(1);
                    self.write(&encode_extra(&extra)).await?;
                }
                Ok(())
            }
            ReplayEvent::Mission(mission) => {
                debug!("Ignoring {} mission items on LTM output", mission.len());
                Ok(())
            }
            ReplayEvent::Start | ReplayEvent::Mode { .. } | ReplayEvent::End => Ok(()),
        }
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        send_frame(&mut self.port, frame).await?;
        self.frames += 1;
        Ok(())
    }
}

fn gps_frame(rec: &LogRecord) -> GpsFrame {
    GpsFrame {
        lat: rec.lat,
        lon: rec.lon,
        speed: rec.speed.round().clamp(0.0, 255.0) as u8,
        alt: rec.alt,
        numsat: rec.numsat,
        fix: match rec.fix {
            FixType::NoFix => 0,
            FixType::Fix2D => 2,
            FixType::Fix3D => 3,
        },
    }
}

fn attitude_frame(rec: &LogRecord) -> AttitudeFrame {
    AttitudeFrame {
        pitch: rec.pitch as i16,
        roll: rec.roll as i16,
        heading: rec.heading as i16,
    }
}

fn status_frame(rec: &LogRecord) -> StatusFrame {
    StatusFrame {
        vbat_mv: (rec.volts * 1000.0).clamp(0.0, u16::MAX as f64) as u16,
        mah: rec.energy.clamp(0.0, u16::MAX as f64) as u16,
        rssi: ((rec.rssi as u32 * 255) / 100).min(255) as u8,
        airspeed: 0,
        armed: rec.is_armed(),
        failsafe: rec.is_failsafe(),
        mode: if rec.is_failsafe() { LTM_MODE_UNKNOWN } else { mode_to_ltm(rec.mode) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltm::decoder::LtmStreamParser;
    use crate::ltm::protocol::LtmFrame;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::types::{FlightMode, HomeFlags, HomePosition};
    use std::io;
    use std::time::Duration;

    fn record(index: usize) -> ReplayEvent {
        ReplayEvent::Record {
            index,
            elapsed: Duration::from_secs(index as u64),
            record: LogRecord {
                lat: 54.1,
                lon: -4.6,
                alt: 30.0,
                speed: 9.6,
                numsat: 12,
                fix: FixType::Fix3D,
                volts: 12.4,
                heading: 180,
                status: Status::ARMED,
                mode: FlightMode::PositionHold,
                ..Default::default()
            },
            cells: 3,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_closed_receiver() {
        let (mut sink, rx) = ChannelSink::new();
        drop(rx);
        let result = sink.deliver(ReplayEvent::Start).await;
        assert!(matches!(result, Err(FlightLogError::ChannelClosed)), "Got {:?}", result);
    }

    #[tokio::test]
    async fn test_generator_writes_record_frames() {
        let port = MockSerialPort::new();
        let (mut sink, rx) = ChannelSink::new();
        sink.deliver(ReplayEvent::Start).await.unwrap();
        sink.deliver(record(0)).await.unwrap();
        sink.deliver(record(1)).await.unwrap();
        drop(sink);

        let mut generator = LtmGenerator::new(port.clone());
        let frames = generator.run(rx).await.unwrap();

        assert_eq!(frames, 7, "G+A+S+X for the first record, G+A+S for the second");

        let mut parser = LtmStreamParser::new();
        let decoded = parser.push(&port.stream());
        assert_eq!(decoded.len(), 7);
        assert_eq!(parser.errors(), 0);

        match decoded[0] {
            LtmFrame::Gps(g) => {
                assert_eq!(g.speed, 10, "Speed rounded to m/s");
                assert_eq!(g.numsat, 12);
                assert_eq!(g.fix, 3);
            }
            other => panic!("Expected GPS frame first, got {:?}", other),
        }
        match decoded[2] {
            LtmFrame::Status(s) => {
                assert_eq!(s.vbat_mv, 12_400);
                assert!(s.armed);
                assert_eq!(s.mode, 9, "Position hold");
            }
            other => panic!("Expected status frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generator_home_becomes_origin() {
        let port = MockSerialPort::new();
        let (mut sink, rx) = ChannelSink::new();
        let home = HomePosition { lat: 54.0, lon: -4.5, alt: 20.0, flags: HomeFlags::ARM_HOME_KNOWN };
        sink.deliver(ReplayEvent::Home(home)).await.unwrap();
        sink.deliver(ReplayEvent::End).await.unwrap();

        let mut generator = LtmGenerator::new(port.clone());
        generator.run(rx).await.unwrap();

        let decoded = LtmStreamParser::new().push(&port.stream());
        match decoded.as_slice() {
            [LtmFrame::Origin(o)] => {
                assert!(o.fix);
                assert!((o.alt - 20.0).abs() < 0.01);
            }
            other => panic!("Expected one origin frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generator_stops_on_write_error() {
        let port = MockSerialPort::new();
        port.set_write_error(io::ErrorKind::BrokenPipe);
        let (mut sink, rx) = ChannelSink::new();
        sink.deliver(record(0)).await.unwrap();
        drop(sink);

        let result = LtmGenerator::new(port).run(rx).await;
        assert!(matches!(result, Err(FlightLogError::Serial(_))), "Got {:?}", result);
    }

    #[test]
    fn test_failsafe_uses_unknown_ltm_mode() {
        let rec = LogRecord {
            status: Status::ARMED | Status::FAILSAFE,
            mode: FlightMode::Angle,
            ..Default::default()
        };
        let status = status_frame(&rec);
        assert!(status.failsafe);
        assert_eq!(status.mode, LTM_MODE_UNKNOWN);
    }
}
