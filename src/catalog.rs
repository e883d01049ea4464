//! # Meta Catalog
//!
//! Lists the log entries inside a source file and renders the operator
//! text for them:
//!
//! - meta listing lines: `index,name,date,start,end,seconds,flags`
//! - key-aligned summaries: `%-8.8s : value`, keys padded and cut to
//!   eight characters

use std::io::Write;
use tracing::{info, warn};

use crate::decoder::FlightLog;
use crate::error::Result;
use crate::types::{LogMeta, LogSegment};

/// Width keys are padded and truncated to
pub const KEY_WIDTH: usize = 8;

/// Format one `key : value` line
///
/// # Examples
///
/// ```
/// use flightlog_replay::catalog::format_line;
///
/// assert_eq!(format_line("Log", "LOG001.TXT"), "Log      : LOG001.TXT");
/// assert_eq!(format_line("Distances", "1"), "Distance : 1");
/// ```
pub fn format_line(key: &str, value: &str) -> String {
    let key: String = key.chars().take(KEY_WIDTH).collect();
    format!("{:<width$} : {}", key, value, width = KEY_WIDTH)
}

/// Write ordered key/value pairs as aligned lines
pub fn write_summary(out: &mut dyn Write, lines: &[(String, String)]) -> std::io::Result<()> {
    for (key, value) in lines {
        writeln!(out, "{}", format_line(key, value))?;
    }
    Ok(())
}

/// One machine-readable meta listing line
pub fn meta_line(meta: &LogMeta) -> String {
    format!(
        "{},{},{},{},{},{},{:x}",
        meta.index,
        meta.logname,
        meta.date,
        meta.start,
        meta.end,
        meta.duration.as_secs(),
        meta.flags.bits()
    )
}

/// Enumerate a file's entries with durations filled in
///
/// # Arguments
///
/// * `log` - Opened decoder
/// * `index` - 0 for every entry, otherwise the 1-based entry to keep
///
/// # Errors
///
/// Returns error if the decoder cannot scan the file
pub fn catalog(log: &mut dyn FlightLog, index: usize) -> Result<Vec<LogMeta>> {
    let mut metas = log.metas()?;
    log.durations(&mut metas)?;

    for meta in metas.iter().filter(|m| m.is_suspect()) {
        warn!("{}: log may be corrupt", meta.display_name());
    }
    if index > 0 {
        metas.retain(|m| m.index == index);
    }
    info!("{} log entries selected", metas.len());
    Ok(metas)
}

/// Write meta listing lines
pub fn write_metas(out: &mut dyn Write, metas: &[LogMeta]) -> std::io::Result<()> {
    for meta in metas {
        writeln!(out, "{}", meta_line(meta))?;
    }
    Ok(())
}

/// Meta and stats summary of a finished segment
pub fn segment_summary(segment: &LogSegment) -> Vec<(String, String)> {
    let mut lines = segment.meta.summary();
    if segment.part > 1 {
        lines.push(("Part".to_string(), segment.part.to_string()));
    }
    lines.extend(segment.stats.summary(segment.duration()));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HomePosition, LogRecord, MetaFlags, Stats};
    use std::time::Duration;

    fn meta() -> LogMeta {
        let mut meta = LogMeta {
            index: 2,
            logname: "LOG00007.TXT".to_string(),
            date: "2023-07-14 09:30:00".to_string(),
            firmware: "INAV 7.1.0".to_string(),
            start: 100,
            end: 900,
            duration: Duration::from_secs(125),
            ..Default::default()
        };
        meta.flags.insert(MetaFlags::VALID);
        meta
    }

    #[test]
    fn test_format_line_pads_and_truncates() {
        assert_eq!(format_line("Flight", "x"), "Flight   : x");
        assert_eq!(format_line("Firmware", "y"), "Firmware : y");
        assert_eq!(format_line("MaxSpeedTime", "z"), "MaxSpeed : z", "Keys cut at eight characters");
    }

    #[test]
    fn test_meta_line() {
        let mut m = meta();
        assert_eq!(meta_line(&m), "2,LOG00007.TXT,2023-07-14 09:30:00,100,900,125,1");
        m.flags.insert(MetaFlags::SUSPECT);
        assert!(meta_line(&m).ends_with(",3"), "Flags printed as hex bits");
    }

    #[test]
    fn test_summary_text() {
        let mut out = Vec::new();
        write_summary(&mut out, &meta().summary()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Log      : LOG00007.TXT / 2\n\
             Flight   : 2023-07-14 09:30:00\n\
             Firmware : INAV 7.1.0\n\
             Duration : 02:05\n"
        );
    }

    #[test]
    fn test_segment_summary_includes_stats() {
        let segment = LogSegment {
            part: 2,
            home: HomePosition::default(),
            records: vec![LogRecord::default()],
            stats: Stats { max_alt: 42.0, distance: 1500.0, ..Default::default() },
            meta: meta(),
        };
        let lines = segment_summary(&segment);
        let keys: Vec<&str> = lines.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"Part"));
        assert!(keys.contains(&"MaxAlt"));
        assert!(!keys.contains(&"MaxAmps"), "No current recorded");
        assert_eq!(lines.last().map(|(_, v)| v.as_str()), Some("00:00"));
    }

    #[test]
    fn test_catalog_selects_index() {
        use crate::decoder::OtxLog;
        use std::io::Write as _;

        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(b"Date,Time,GPS\n2022-01-01,10:00:00.000,1 2\n2022-01-01,10:00:05.000,1 2\n").unwrap();
        file.flush().unwrap();

        let mut log = OtxLog::open(file.path()).unwrap();
        let metas = catalog(&mut log, 0).unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].duration, Duration::from_secs(5));

        let none = catalog(&mut log, 2).unwrap();
        assert!(none.is_empty(), "No second entry in a CSV log");
    }
}
