//! # Segment Builder
//!
//! Turns a raw decoded record stream into [`LogSegment`]s.
//!
//! ## States
//!
//! ```text
//! AwaitingHome ──(3D fix, >5 sats)──▶ Accumulating
//!      ▲                                  │
//!      └──── split (time gap) / finish ───┘
//! ```
//!
//! While awaiting home, records are kept unconditioned. Once home is known
//! every record gets bearing, range and cumulative distance, and the
//! segment [`Stats`] are updated. A time gap larger than the configured
//! split threshold finalizes the current segment and starts a fresh one at
//! the record that crossed the gap.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::geo::{course_distance, ElevationService, Obfuscator};
use crate::types::{
    HomeFlags, HomePosition, LogMeta, LogRecord, LogSegment, Stats, METRES_PER_NM,
    UNKNOWN_ALTITUDE,
};

/// Segmentation settings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentConfig {
    /// Split when consecutive records are more than this many seconds apart (0 = never)
    pub split_secs: u64,

    /// Home altitude override in metres
    pub home_alt: Option<f64>,

    /// Drop disarmed ground records (decoders that can tell armed state)
    pub only_armed: bool,
}

/// Everything a decoder needs to build segments
#[derive(Clone, Copy)]
pub struct PipelineContext<'a> {
    pub config: SegmentConfig,
    pub obfuscator: Obfuscator,
    pub elevation: &'a dyn ElevationService,
}

impl<'a> PipelineContext<'a> {
    pub fn new(config: SegmentConfig, obfuscator: Obfuscator, elevation: &'a dyn ElevationService) -> Self {
        Self { config, obfuscator, elevation }
    }
}

impl std::fmt::Debug for PipelineContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("obfuscator", &self.obfuscator)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderState {
    AwaitingHome,
    Accumulating,
}

/// Incremental segment builder
///
/// Feed records with [`SegmentBuilder::push`]; a finalized segment is
/// returned whenever a split occurs. Call [`SegmentBuilder::finish`] at end
/// of stream to collect the last one.
pub struct SegmentBuilder<'a> {
    ctx: PipelineContext<'a>,
    meta: LogMeta,
    state: BuilderState,
    home: HomePosition,
    records: Vec<LogRecord>,
    stats: Stats,
    start: Option<DateTime<Utc>>,
    last_time: Option<DateTime<Utc>>,
    last_pos: Option<(f64, f64)>,
    part: usize,
}

impl<'a> SegmentBuilder<'a> {
    /// Create a builder for one log entry
    pub fn new(ctx: PipelineContext<'a>, meta: LogMeta) -> Self {
        Self {
            ctx,
            meta,
            state: BuilderState::AwaitingHome,
            home: HomePosition::default(),
            records: Vec::new(),
            stats: Stats::default(),
            start: None,
            last_time: None,
            last_pos: None,
            part: 1,
        }
    }

    /// Home position of the segment in progress
    pub fn home(&self) -> &HomePosition {
        &self.home
    }

    /// Statistics of the segment in progress
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Records accumulated in the segment in progress
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add one record
    ///
    /// # Returns
    ///
    /// * `Option<LogSegment>` - The previous segment, if this record's time
    ///   gap triggered a split
    pub fn push(&mut self, mut rec: LogRecord) -> Option<LogSegment> {
        if rec.lat != 0.0 || rec.lon != 0.0 {
            let (lat, lon) = self.ctx.obfuscator.apply(rec.lat, rec.lon);
            rec.lat = lat;
            rec.lon = lon;
        }

        if let Some(last) = self.last_time {
            if rec.utc < last {
                warn!("Out of order timestamp {} (previous {}), clamping", rec.utc, last);
                rec.utc = last;
            }
        }

        let split = self.check_split(&rec);
        let completed = if split { self.take_segment() } else { None };

        let start = *self.start.get_or_insert(rec.utc);

        if self.state == BuilderState::AwaitingHome && rec.is_home_quality() {
            self.establish_home(&rec);
        }

        if self.state == BuilderState::Accumulating {
            let (cse, nm) = course_distance(self.home.lat, self.home.lon, rec.lat, rec.lon);
            rec.bearing = cse as i32;
            rec.range = nm * METRES_PER_NM;

            if let Some((plat, plon)) = self.last_pos {
                if plat != rec.lat || plon != rec.lon {
                    let (_, d) = course_distance(plat, plon, rec.lat, rec.lon);
                    self.stats.distance += d * METRES_PER_NM;
                }
            }
            rec.distance = self.stats.distance;

            let elapsed = (rec.utc - start).to_std().unwrap_or_default();
            self.stats.observe(&rec, elapsed);
        }

        self.last_pos = Some((rec.lat, rec.lon));
        self.last_time = Some(rec.utc);
        self.records.push(rec);

        completed
    }

    /// Finalize at end of stream
    ///
    /// # Returns
    ///
    /// * `Option<LogSegment>` - The last segment, or `None` if no home fix
    ///   was ever established
    pub fn finish(mut self) -> Option<LogSegment> {
        self.take_segment()
    }

    fn check_split(&self, rec: &LogRecord) -> bool {
        if self.ctx.config.split_secs == 0 {
            return false;
        }
        let Some(last) = self.last_time else {
            return false;
        };
        let gap = (rec.utc - last).to_std().unwrap_or_default();
        if gap > Duration::from_secs(self.ctx.config.split_secs)
            && self.home.is_set()
            && !self.records.is_empty()
        {
            info!(
                "Splitting at {} after {}s gap",
                rec.utc.format("%Y-%m-%d %H:%M:%S"),
                gap.as_secs()
            );
            return true;
        }
        false
    }

    fn establish_home(&mut self, rec: &LogRecord) {
        self.home.lat = rec.lat;
        self.home.lon = rec.lon;
        self.home.flags = HomeFlags::ARM_HOME_KNOWN;

        if let Some(alt) = self.ctx.config.home_alt {
            self.home.alt = alt;
            self.home.flags.insert(HomeFlags::ALTITUDE_KNOWN);
        } else if rec.galt > UNKNOWN_ALTITUDE {
            self.home.alt = rec.galt;
            self.home.flags.insert(HomeFlags::ALTITUDE_KNOWN);
        } else {
            match self.ctx.elevation.elevation(rec.lat, rec.lon) {
                Ok(alt) => {
                    self.home.alt = alt;
                    self.home.flags.insert(HomeFlags::ALTITUDE_KNOWN);
                }
                Err(e) => debug!("Home altitude unknown: {}", e),
            }
        }

        if self.meta.date.is_empty() || self.part > 1 {
            self.meta.date = rec.utc.format("%Y-%m-%d %H:%M:%S").to_string();
        }
        self.last_pos = Some((rec.lat, rec.lon));
        self.state = BuilderState::Accumulating;
        debug!("Home established at {:.6} {:.6}", self.home.lat, self.home.lon);
    }

    /// Hand off the current segment (if deliverable) and reset to AwaitingHome
    fn take_segment(&mut self) -> Option<LogSegment> {
        let records = std::mem::take(&mut self.records);
        let home = std::mem::take(&mut self.home);
        let stats = std::mem::take(&mut self.stats);
        self.state = BuilderState::AwaitingHome;
        self.start = None;
        self.last_pos = None;

        if !home.is_set() || records.is_empty() {
            return None;
        }

        let mut meta = self.meta.clone();
        meta.duration = match (records.first(), records.last()) {
            (Some(first), Some(last)) => (last.utc - first.utc).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };
        let segment = LogSegment { part: self.part, home, records, stats, meta };
        self.part += 1;
        Some(segment)
    }
}
