//! # Replay Engine
//!
//! Re-emits a segment's records at the cadence of their original
//! timestamps. Before each record the engine waits for the time gap to the
//! previous one (the first record goes out immediately), then hands events
//! to a [`RecordSink`].
//!
//! Two sink shapes exist:
//! - [`publish::PublishSink`]: synchronous, each frame is published and
//!   acknowledged inside the pacing loop
//! - [`channel::ChannelSink`]: events go into a channel drained by an
//!   [`channel::LtmGenerator`] running on its own task
//!
//! Besides the per-record event, the engine publishes a mode event whenever
//! the flight mode changes, mode and home every `announce_interval`
//! records, and the mission (if any) every second announcement.

pub mod bullet;
pub mod channel;
pub mod clock;
pub mod publish;

pub use bullet::{BulletEncoder, BulletVersion};
pub use channel::{ChannelSink, LtmGenerator};
pub use clock::{Clock, LogicalClock, TokioClock};
pub use publish::{LinePublisher, PublishSink, Publisher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{FlightLogError, Result};
use crate::mission::Mission;
use crate::serial::SerialPortIO;
use crate::types::{FlightMode, HomePosition, LogRecord, LogSegment, Status};

/// Default number of records between mode/home announcements
pub const DEFAULT_ANNOUNCE_INTERVAL: usize = 10;

/// Nominal per-cell voltage window `[min, max]`
const CELL_MIN_VOLTS: f64 = 3.0;
const CELL_MAX_VOLTS: f64 = 4.22;

/// Largest pack the inference will consider
const MAX_CELLS: u8 = 9;

/// Something that happens during a replay
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    /// Replay begins
    Start,

    /// Current flight mode context
    Mode {
        mode: FlightMode,
        failsafe: bool,
        hw_fail: bool,
        cells: u8,
    },

    /// Segment home position
    Home(HomePosition),

    /// Loaded mission
    Mission(Arc<Mission>),

    /// One paced record
    Record {
        /// Position in the segment
        index: usize,
        /// Time since the segment's first record
        elapsed: Duration,
        record: LogRecord,
        /// Inferred cell count (0 = unknown)
        cells: u8,
    },

    /// Replay finished
    End,
}

/// Consumer of replay events
#[async_trait]
pub trait RecordSink: Send {
    /// Accept one event; the engine waits for this to return
    async fn deliver(&mut self, event: ReplayEvent) -> Result<()>;
}

/// Infer battery cell count from a pack voltage
///
/// Tries 1 to 9 cells and returns the first whose window
/// `[3.0 × n, 4.22 × n]` (bounds inclusive) contains `volts`.
///
/// # Examples
///
/// ```
/// use flightlog_replay::replay::infer_cells;
///
/// assert_eq!(infer_cells(11.1), Some(3));
/// assert_eq!(infer_cells(22.2), Some(6));
/// assert_eq!(infer_cells(0.0), None);
/// ```
pub fn infer_cells(volts: f64) -> Option<u8> {
    (1..=MAX_CELLS).find(|&n| {
        let n = n as f64;
        volts >= CELL_MIN_VOLTS * n && volts <= CELL_MAX_VOLTS * n
    })
}

/// Replay settings
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    /// Records between mode/home announcements (mission every second one)
    pub announce_interval: usize,

    /// Mission to re-publish, already obfuscated if privacy is on
    pub mission: Option<Arc<Mission>>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { announce_interval: DEFAULT_ANNOUNCE_INTERVAL, mission: None }
    }
}

/// Outcome of one replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records delivered
    pub records: usize,

    /// Cell count the replay settled on
    pub cells: u8,
}

/// Timestamp-paced replay driver
pub struct ReplayEngine<C> {
    clock: C,
    config: ReplayConfig,
}

impl<C: Clock> ReplayEngine<C> {
    pub fn new(clock: C, config: ReplayConfig) -> Self {
        Self { clock, config }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replay one segment into a sink
    ///
    /// # Errors
    ///
    /// Stops at the first sink error and returns it
    pub async fn run<S: RecordSink + ?Sized>(&self, segment: &LogSegment, sink: &mut S) -> Result<ReplayReport> {
        let interval = self.config.announce_interval.max(1);
        let Some(first) = segment.records.first() else {
            sink.deliver(ReplayEvent::End).await?;
            return Ok(ReplayReport::default());
        };
        let start = first.utc;

        info!(
            "Replaying {} records of {} ({:?})",
            segment.records.len(),
            segment.meta.display_name(),
            segment.duration()
        );
        sink.deliver(ReplayEvent::Start).await?;

        let mut cells = 0u8;
        let mut last_time: Option<DateTime<Utc>> = None;
        let mut last_mode: Option<(FlightMode, bool)> = None;

        for (i, rec) in segment.records.iter().enumerate() {
            if let Some(prev) = last_time {
                let delta = (rec.utc - prev).to_std().unwrap_or_default();
                if !delta.is_zero() {
                    self.clock.sleep(delta).await;
                }
            }
            last_time = Some(rec.utc);

            if cells == 0 {
                if let Some(n) = infer_cells(rec.volts) {
                    debug!("Battery inferred as {}S from {:.2}V", n, rec.volts);
                    cells = n;
                }
            }

            let mode_event = ReplayEvent::Mode {
                mode: rec.mode,
                failsafe: rec.is_failsafe(),
                hw_fail: rec.status.contains(Status::HW_FAIL),
                cells,
            };

            let mode_key = (rec.mode, rec.is_failsafe());
            if last_mode != Some(mode_key) {
                last_mode = Some(mode_key);
                sink.deliver(mode_event.clone()).await?;
            }

            if i % interval == 0 {
                sink.deliver(mode_event).await?;
                sink.deliver(ReplayEvent::Home(segment.home)).await?;
                if let Some(mission) = &self.config.mission {
                    if i % (2 * interval) == 0 {
                        sink.deliver(ReplayEvent::Mission(Arc::clone(mission))).await?;
                    }
                }
            }

            sink.deliver(ReplayEvent::Record {
                index: i,
                elapsed: (rec.utc - start).to_std().unwrap_or_default(),
                record: rec.clone(),
                cells,
            })
            .await?;
        }

        sink.deliver(ReplayEvent::End).await?;
        Ok(ReplayReport { records: segment.records.len(), cells })
    }
}

/// Run a replay through the channel-fed sink
///
/// The engine runs as the producer task and the LTM generator as the
/// consumer task; they share nothing but the channel.
///
/// # Returns
///
/// * `Result<(ReplayReport, usize)>` - Producer report and LTM frames written
pub async fn replay_to_ltm<C, P>(engine: ReplayEngine<C>, segment: LogSegment, port: P) -> Result<(ReplayReport, usize)>
where
    C: Clock + 'static,
    P: SerialPortIO + 'static,
{
    let (mut sink, rx) = ChannelSink::new();

    let producer = tokio::spawn(async move { engine.run(&segment, &mut sink).await });
    let consumer = tokio::spawn(async move {
        let mut generator = LtmGenerator::new(port);
        generator.run(rx).await
    });

    let outcome = consumer
        .await
        .map_err(|e| FlightLogError::Serial(format!("LTM generator task failed: {}", e)))
        .and_then(|result| result);
    let frames = match outcome {
        Ok(frames) => frames,
        Err(e) => {
            // The producer must not outlive a failed output
            producer.abort();
            let _ = producer.await;
            return Err(e);
        }
    };
    let report = producer.await.map_err(|_| FlightLogError::ChannelClosed)??;

    Ok((report, frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::types::{FixType, HomeFlags, LogMeta};
    use chrono::{TimeZone, Utc};

    /// Sink collecting every event
    #[derive(Default)]
    struct CollectSink {
        events: Vec<ReplayEvent>,
    }

    #[async_trait]
    impl RecordSink for CollectSink {
        async fn deliver(&mut self, event: ReplayEvent) -> Result<()> {
            self.events.push(event);
            Ok(())
        }
    }

    impl CollectSink {
        fn count(&self, f: impl Fn(&ReplayEvent) -> bool) -> usize {
            self.events.iter().filter(|e| f(e)).count()
        }
    }

    fn segment(offsets_ms: &[i64], volts: f64) -> LogSegment {
        let t0 = Utc.with_ymd_and_hms(2022, 3, 4, 10, 0, 0).unwrap();
        let records = offsets_ms
            .iter()
            .map(|ms| LogRecord {
                utc: t0 + chrono::Duration::milliseconds(*ms),
                lat: 54.0,
                lon: -4.5,
                fix: FixType::Fix3D,
                numsat: 10,
                volts,
                status: Status::ARMED,
                ..Default::default()
            })
            .collect();
        LogSegment {
            part: 1,
            home: HomePosition { lat: 54.0, lon: -4.5, alt: 10.0, flags: HomeFlags::ARM_HOME_KNOWN },
            records,
            stats: Default::default(),
            meta: LogMeta { index: 1, logname: "test".into(), ..Default::default() },
        }
    }

    fn mission() -> Arc<Mission> {
        Arc::new(Mission::from_json(r#"{"mission":[{"action":"WAYPOINT","lat":54.0,"lon":-4.5,"alt":20}]}"#).unwrap())
    }

    #[test]
    fn test_infer_cells_boundaries() {
        assert_eq!(infer_cells(11.1), Some(3), "9.0 <= 11.1 <= 12.66");
        assert_eq!(infer_cells(22.2), Some(6), "Above 5S maximum of 21.1");
        assert_eq!(infer_cells(3.0), Some(1), "Lower bound inclusive");
        assert_eq!(infer_cells(4.22), Some(1), "Upper bound inclusive");
        assert_eq!(infer_cells(12.66), Some(3), "3S upper bound beats 4S");
        assert_eq!(infer_cells(4.5), None, "Between 1S max and 2S min");
        assert_eq!(infer_cells(2.9), None);
        assert_eq!(infer_cells(40.0), None, "Beyond 9S");
    }

    #[tokio::test]
    async fn test_pacing_follows_timestamp_deltas() {
        let clock = LogicalClock::new();
        let engine = ReplayEngine::new(clock.clone(), ReplayConfig::default());
        let mut sink = CollectSink::default();

        engine.run(&segment(&[0, 200, 700, 700, 1700], 11.1), &mut sink).await.unwrap();

        assert_eq!(
            clock.sleeps().await,
            vec![Duration::from_millis(200), Duration::from_millis(500), Duration::from_secs(1)],
            "First record immediate, zero gaps skipped"
        );
    }

    #[tokio::test]
    async fn test_event_order_and_counts() {
        let engine = ReplayEngine::new(LogicalClock::new(), ReplayConfig { announce_interval: 2, mission: None });
        let mut sink = CollectSink::default();

        let report = engine.run(&segment(&[0, 100, 200, 300, 400], 16.0), &mut sink).await.unwrap();

        assert_eq!(report.records, 5);
        assert_eq!(report.cells, 4);
        assert_eq!(sink.events.first(), Some(&ReplayEvent::Start));
        assert_eq!(sink.events.last(), Some(&ReplayEvent::End));
        assert_eq!(sink.count(|e| matches!(e, ReplayEvent::Record { .. })), 5);
        assert_eq!(sink.count(|e| matches!(e, ReplayEvent::Home(_))), 3, "Records 0, 2 and 4");
        assert_eq!(sink.count(|e| matches!(e, ReplayEvent::Mode { .. })), 4, "Initial change plus 3 announcements");
        assert_eq!(sink.count(|e| matches!(e, ReplayEvent::Mission(_))), 0);
    }

    #[tokio::test]
    async fn test_mission_every_second_announcement() {
        let config = ReplayConfig { announce_interval: 2, mission: Some(mission()) };
        let engine = ReplayEngine::new(LogicalClock::new(), config);
        let mut sink = CollectSink::default();

        engine.run(&segment(&[0, 100, 200, 300, 400, 500], 16.0), &mut sink).await.unwrap();

        assert_eq!(sink.count(|e| matches!(e, ReplayEvent::Mission(_))), 2, "Records 0 and 4");
    }

    #[tokio::test]
    async fn test_mode_change_announced() {
        let mut seg = segment(&[0, 100, 200], 11.1);
        seg.records[2].mode = FlightMode::ReturnToHome;
        let engine = ReplayEngine::new(LogicalClock::new(), ReplayConfig { announce_interval: 100, mission: None });
        let mut sink = CollectSink::default();

        engine.run(&seg, &mut sink).await.unwrap();

        let modes: Vec<FlightMode> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                ReplayEvent::Mode { mode, .. } => Some(*mode),
                _ => None,
            })
            .collect();
        assert_eq!(modes, vec![FlightMode::Acro, FlightMode::Acro, FlightMode::ReturnToHome]);
    }

    #[tokio::test]
    async fn test_cells_held_once_inferred() {
        let mut seg = segment(&[0, 100, 200], 0.0);
        seg.records[1].volts = 11.1;
        seg.records[2].volts = 16.0;
        let engine = ReplayEngine::new(LogicalClock::new(), ReplayConfig::default());
        let mut sink = CollectSink::default();

        engine.run(&seg, &mut sink).await.unwrap();

        let cells: Vec<u8> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                ReplayEvent::Record { cells, .. } => Some(*cells),
                _ => None,
            })
            .collect();
        assert_eq!(cells, vec![0, 3, 3], "Unknown until a voltage fits, then fixed");
    }

    #[tokio::test]
    async fn test_record_elapsed_from_segment_start() {
        let engine = ReplayEngine::new(LogicalClock::new(), ReplayConfig::default());
        let mut sink = CollectSink::default();
        engine.run(&segment(&[0, 2500], 11.1), &mut sink).await.unwrap();

        let elapsed: Vec<Duration> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                ReplayEvent::Record { elapsed, .. } => Some(*elapsed),
                _ => None,
            })
            .collect();
        assert_eq!(elapsed, vec![Duration::ZERO, Duration::from_millis(2500)]);
    }

    #[tokio::test]
    async fn test_empty_segment_only_ends() {
        let engine = ReplayEngine::new(LogicalClock::new(), ReplayConfig::default());
        let mut sink = CollectSink::default();
        let report = engine.run(&segment(&[], 0.0), &mut sink).await.unwrap();
        assert_eq!(report.records, 0);
        assert_eq!(sink.events, vec![ReplayEvent::End]);
    }

    #[tokio::test]
    async fn test_publish_sink_end_to_end() {
        let engine = ReplayEngine::new(LogicalClock::new(), ReplayConfig::default());
        let mut sink = PublishSink::new(LinePublisher::new(Vec::<u8>::new()), BulletEncoder::default());

        engine.run(&segment(&[0, 1000], 11.1), &mut sink).await.unwrap();

        let text = String::from_utf8(sink.into_publisher().into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], bullet::INITIAL_FRAME);
        assert_eq!(lines[1], "bcc:3,ftm:11,css:3,hwh:1,");
        assert_eq!(lines[2], "bcc:3,ftm:11,css:3,hwh:1,");
        assert!(lines[3].starts_with("cs:JRandomUAV,hla:540000000"), "{}", lines[3]);
        assert!(lines[4].starts_with("flt:0,ont:60,"), "{}", lines[4]);
        assert!(lines[5].starts_with("flt:1,ont:61,"), "{}", lines[5]);
        assert_eq!(lines.len(), 6);
    }

    #[tokio::test]
    async fn test_replay_to_ltm_preserves_order() {
        let port = MockSerialPort::new();
        let engine = ReplayEngine::new(LogicalClock::new(), ReplayConfig::default());

        let (report, frames) = replay_to_ltm(engine, segment(&[0, 100, 200], 11.1), port.clone())
            .await
            .unwrap();

        assert_eq!(report.records, 3);
        assert_eq!(frames, 1 + 4 + 3 + 3, "Origin, then G/A/S(+X) per record");

        let written = port.frames();
        assert_eq!(&written[0][..3], b"$TO", "Home announced before first record");
        assert_eq!(&written[1][..3], b"$TG");
    }

    #[tokio::test]
    async fn test_replay_to_ltm_write_error_stops_producer() {
        let port = MockSerialPort::new();
        port.set_write_error(std::io::ErrorKind::BrokenPipe);
        let mission = mission();
        let config = ReplayConfig { announce_interval: 10, mission: Some(Arc::clone(&mission)) };
        // An hour between records keeps the producer parked in its sleep
        let engine = ReplayEngine::new(TokioClock, config);

        let result = replay_to_ltm(engine, segment(&[0, 3_600_000], 11.1), port).await;

        assert!(result.is_err());
        assert_eq!(Arc::strong_count(&mission), 1, "Producer task dropped with its engine");
    }
}
