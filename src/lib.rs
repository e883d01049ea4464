//! # Flightlog Replay Library
//!
//! Decode FPV flight logs, derive flight statistics and replay them as live
//! telemetry.
//!
//! A log file goes through:
//!
//! ```text
//! file ─▶ decoder ─▶ catalog (entries) ─▶ reader ─▶ SegmentBuilder ─▶ LogSegment
//!                                                                   ├─▶ export (JSONL + GeoJSON)
//!                                                                   └─▶ ReplayEngine ─▶ bullet frames / LTM serial
//! ```

pub mod catalog;
pub mod config;
pub mod decoder;
pub mod error;
pub mod export;
pub mod geo;
pub mod ltm;
pub mod mission;
pub mod replay;
pub mod segment;
pub mod serial;
pub mod types;
pub mod units;
