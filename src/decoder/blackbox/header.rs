//! Blackbox text header
//!
//! Each entry starts with `H key:value` lines describing the frame layouts:
//!
//! ```text
//! H Product:Blackbox flight data recorder by Nicholas Sherlock
//! H Field I name:loopIteration,time,vbat,...
//! H Field I signed:0,0,0,...
//! H Field I predictor:0,0,9,...
//! H Field I encoding:1,1,1,...
//! ```
//!
//! P frames reuse the I frame names with their own predictors and
//! encodings.

use std::collections::HashMap;
use tracing::debug;

use super::stream::Encoding;
use crate::error::{FlightLogError, Result};

/// Predictor applied before a field's stored delta is added
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    Zero,
    Previous,
    StraightLine,
    Average2,
    MinThrottle,
    Motor0,
    Increment,
    HomeCoord,
    Centre1500,
    VbatRef,
    LastMainFrameTime,
    MinMotor,
}

impl Predictor {
    /// Header number to predictor; unknown numbers predict zero
    pub fn from_number(n: i64) -> Self {
        match n {
            1 => Predictor::Previous,
            2 => Predictor::StraightLine,
            3 => Predictor::Average2,
            4 => Predictor::MinThrottle,
            5 => Predictor::Motor0,
            6 => Predictor::Increment,
            7 => Predictor::HomeCoord,
            8 => Predictor::Centre1500,
            9 => Predictor::VbatRef,
            10 => Predictor::LastMainFrameTime,
            11 => Predictor::MinMotor,
            _ => Predictor::Zero,
        }
    }
}

/// Layout of one frame type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDef {
    pub names: Vec<String>,
    pub signed: Vec<bool>,
    pub predictors: Vec<Predictor>,
    pub encodings: Vec<Encoding>,
}

impl FrameDef {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a named field
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    fn predictor(&self, i: usize) -> Predictor {
        self.predictors.get(i).copied().unwrap_or(Predictor::Zero)
    }

    fn encoding(&self, i: usize) -> Encoding {
        self.encodings.get(i).copied().unwrap_or(Encoding::Null)
    }

    /// Predictor and encoding for field `i`
    pub fn field(&self, i: usize) -> (Predictor, Encoding) {
        (self.predictor(i), self.encoding(i))
    }
}

/// Parsed header of one log entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlackboxHeader {
    pub product: String,
    pub firmware: String,
    pub craft: String,
    pub start_datetime: String,
    pub data_version: u32,
    pub min_throttle: i64,
    pub min_motor: i64,
    pub vbat_ref: i64,
    pub intra: FrameDef,
    pub inter: FrameDef,
    pub gps: FrameDef,
    pub gps_home: FrameDef,
    pub slow: FrameDef,
    /// Everything else, verbatim
    pub extra: HashMap<String, String>,
}

fn parse_numbers(value: &str) -> Vec<i64> {
    value.split(',').map(|v| v.trim().parse().unwrap_or(0)).collect()
}

impl BlackboxHeader {
    /// Parse header lines from the start of an entry
    ///
    /// # Returns
    ///
    /// * `Result<(BlackboxHeader, usize)>` - The header and the offset of
    ///   the first frame byte
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if the entry ends inside the header or declares
    /// no main frame fields
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let mut header = BlackboxHeader { data_version: 2, ..Default::default() };
        let mut pos = 0;

        while data.get(pos) == Some(&b'H') && data.get(pos + 1) == Some(&b' ') {
            let Some(len) = data[pos..].iter().position(|&b| b == b'\n') else {
                return Err(FlightLogError::Truncated("header line not terminated".to_string()));
            };
            let line = String::from_utf8_lossy(&data[pos + 2..pos + len]);
            header.apply_line(line.trim_end_matches('\r'));
            pos += len + 1;
        }

        if header.intra.is_empty() {
            return Err(FlightLogError::Truncated("no main frame field definitions".to_string()));
        }
        if pos >= data.len() {
            return Err(FlightLogError::Truncated("log ends after header".to_string()));
        }

        // P frames share the I frame's field names and signedness
        header.inter.names = header.intra.names.clone();
        header.inter.signed = header.intra.signed.clone();

        debug!(
            "Blackbox header: {} main, {} GPS, {} slow fields, data at {}",
            header.intra.len(),
            header.gps.len(),
            header.slow.len(),
            pos
        );
        Ok((header, pos))
    }

    fn apply_line(&mut self, line: &str) {
        let Some((key, value)) = line.split_once(':') else {
            return;
        };

        if let Some(rest) = key.strip_prefix("Field ") {
            let mut parts = rest.splitn(2, ' ');
            let (Some(kind), Some(attr)) = (parts.next(), parts.next()) else {
                return;
            };
            let def = match kind {
                "I" => &mut self.intra,
                "P" => &mut self.inter,
                "G" => &mut self.gps,
                "H" => &mut self.gps_home,
                "S" => &mut self.slow,
                _ => return,
            };
            match attr {
                "name" => def.names = value.split(',').map(|s| s.trim().to_string()).collect(),
                "signed" => def.signed = parse_numbers(value).into_iter().map(|v| v != 0).collect(),
                "predictor" => def.predictors = parse_numbers(value).into_iter().map(Predictor::from_number).collect(),
                "encoding" => def.encodings = parse_numbers(value).into_iter().map(Encoding::from_number).collect(),
                _ => {}
            }
            return;
        }

        match key {
            "Product" => self.product = value.to_string(),
            "Firmware revision" => self.firmware = value.to_string(),
            "Craft name" => self.craft = value.to_string(),
            "Log start datetime" => self.start_datetime = value.to_string(),
            "Data version" => self.data_version = value.trim().parse().unwrap_or(2),
            "minthrottle" => self.min_throttle = value.trim().parse().unwrap_or(0),
            "vbatref" => self.vbat_ref = value.trim().parse().unwrap_or(0),
            "motorOutput" => self.min_motor = parse_numbers(value).first().copied().unwrap_or(0),
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "H Product:Blackbox flight data recorder by Nicholas Sherlock\n\
H Data version:2\n\
H Firmware revision:INAV 7.1.0 (abc123) MATEKF405\n\
H Craft name:Wing\n\
H Log start datetime:2023-07-14T09:30:00.000+00:00\n\
H minthrottle:1000\n\
H vbatref:1620\n\
H motorOutput:1050,2000\n\
H Field I name:loopIteration,time,vbat\n\
H Field I signed:0,0,0\n\
H Field I predictor:0,0,9\n\
H Field I encoding:1,1,1\n\
H Field P predictor:6,2,1\n\
H Field P encoding:9,0,0\n\
H Field G name:time,GPS_numSat\n\
H Field G predictor:10,0\n\
H Field G encoding:1,1\n";

    #[test]
    fn test_parse_header() {
        let mut data = HEADER.as_bytes().to_vec();
        data.push(b'I');
        let (header, pos) = BlackboxHeader::parse(&data).unwrap();

        assert_eq!(pos, HEADER.len(), "Frames start right after the header");
        assert_eq!(header.craft, "Wing");
        assert!(header.firmware.starts_with("INAV 7.1.0"));
        assert_eq!(header.min_throttle, 1000);
        assert_eq!(header.min_motor, 1050);
        assert_eq!(header.vbat_ref, 1620);
        assert_eq!(header.intra.names, vec!["loopIteration", "time", "vbat"]);
        assert_eq!(header.intra.field(2), (Predictor::VbatRef, Encoding::UnsignedVb));
        assert_eq!(header.inter.names, header.intra.names, "P frames inherit names");
        assert_eq!(header.inter.field(0), (Predictor::Increment, Encoding::Null));
        assert_eq!(header.gps.index_of("GPS_numSat"), Some(1));
    }

    #[test]
    fn test_header_without_frames_is_truncated() {
        let result = BlackboxHeader::parse(HEADER.as_bytes());
        assert!(matches!(result, Err(FlightLogError::Truncated(_))), "Got {:?}", result);
    }

    #[test]
    fn test_header_without_fields_is_truncated() {
        let result = BlackboxHeader::parse(b"H Product:Blackbox\nI");
        assert!(matches!(result, Err(FlightLogError::Truncated(_))));
    }

    #[test]
    fn test_unterminated_header_line() {
        let result = BlackboxHeader::parse(b"H Product:Blackbox\nH Field I name:time");
        assert!(matches!(result, Err(FlightLogError::Truncated(_))));
    }

    #[test]
    fn test_unknown_numbers_default() {
        assert_eq!(Predictor::from_number(99), Predictor::Zero);
        assert_eq!(Encoding::from_number(42), Encoding::Null);
    }
}
