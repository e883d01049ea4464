//! # LTM Protocol Module
//!
//! Implementation of the Lightweight Telemetry (LTM) protocol used by
//! ground stations and OSDs.
//!
//! This module handles:
//! - Frame encoding for replay output (G, A, S, O, X frames)
//! - Frame decoding and stream resynchronization for telemetry captures
//! - XOR checksum calculation
//! - Mapping between LTM mode numbers and [`crate::types::FlightMode`]

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
