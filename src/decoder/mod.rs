//! # Format Decoders
//!
//! Four source formats sit behind one capability trait, [`FlightLog`]:
//!
//! | Format | Module | Entries per file |
//! |--------|--------|------------------|
//! | Blackbox binary | [`blackbox`] | one per `H Product:` header |
//! | OpenTX/EdgeTX telemetry CSV | [`otx`] | one |
//! | LTM telemetry capture | [`capture`] | one per arm/disarm cycle |
//! | Autopilot text log | [`aplog`] | one per arm/disarm cycle |
//!
//! [`LogReader`] is the closed set of decoders; [`LogFormat::sniff`] picks
//! one by content, falling back to the file extension.

pub mod aplog;
pub mod blackbox;
pub mod capture;
pub mod otx;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{FlightLogError, Result};
use crate::segment::{PipelineContext, SegmentBuilder};
use crate::types::{LogMeta, LogRecord, LogSegment};

pub use aplog::ApLog;
pub use blackbox::BlackboxLog;
pub use capture::{CaptureLog, CAPTURE_MAGIC};
pub use otx::OtxLog;

/// Bytes read from the start of a file when sniffing
const SNIFF_LEN: usize = 512;

/// Capability every decoder provides
pub trait FlightLog {
    /// Cheap scan listing the log entries in the file
    fn metas(&mut self) -> Result<Vec<LogMeta>>;

    /// Decode one entry into segments
    ///
    /// An empty result means the entry decoded but never had a usable fix.
    fn reader(&mut self, meta: &LogMeta, ctx: &PipelineContext<'_>) -> Result<Vec<LogSegment>>;

    /// Write a raw field-by-field listing
    fn dump(&mut self, out: &mut dyn Write) -> Result<()>;

    /// Fill in each entry's duration by scanning its timestamps
    fn durations(&mut self, metas: &mut [LogMeta]) -> Result<()>;
}

/// Supported source formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Blackbox,
    OtxCsv,
    Capture,
    ApLog,
}

impl LogFormat {
    pub fn name(self) -> &'static str {
        match self {
            LogFormat::Blackbox => "blackbox",
            LogFormat::OtxCsv => "otx-csv",
            LogFormat::Capture => "ltm-capture",
            LogFormat::ApLog => "ap-text",
        }
    }

    /// Classify file content
    pub fn from_content(head: &[u8]) -> Option<Self> {
        if head.starts_with(blackbox::PRODUCT_MARKER) {
            return Some(LogFormat::Blackbox);
        }
        if head.starts_with(CAPTURE_MAGIC) {
            return Some(LogFormat::Capture);
        }
        let text = String::from_utf8_lossy(head);
        let text = text.trim_start_matches('\u{feff}');
        if text.starts_with("FMT,") {
            return Some(LogFormat::ApLog);
        }
        let first = text.lines().next().unwrap_or_default();
        let columns: Vec<&str> = first.split(',').map(str::trim).collect();
        if columns.contains(&"Date") && columns.contains(&"Time") {
            return Some(LogFormat::OtxCsv);
        }
        None
    }

    /// Classify by file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "bbl" | "bfl" | "bbs" | "txt" => Some(LogFormat::Blackbox),
            "csv" => Some(LogFormat::OtxCsv),
            "ltm" | "raw" => Some(LogFormat::Capture),
            "log" => Some(LogFormat::ApLog),
            _ => None,
        }
    }

    /// Identify a file's format, content first
    ///
    /// # Errors
    ///
    /// Returns `UnknownFormat` if neither content nor extension match, or
    /// an I/O error if the file cannot be read
    pub fn sniff(path: &Path) -> Result<Self> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(path)?.take(SNIFF_LEN as u64).read_to_end(&mut head)?;

        let format = Self::from_content(&head)
            .or_else(|| Self::from_extension(path))
            .ok_or_else(|| FlightLogError::UnknownFormat(path.display().to_string()))?;
        debug!("{} sniffed as {}", path.display(), format.name());
        Ok(format)
    }
}

/// The closed set of decoders
#[derive(Debug)]
pub enum LogReader {
    Blackbox(BlackboxLog),
    Otx(OtxLog),
    Capture(CaptureLog),
    ApLog(ApLog),
}

impl LogReader {
    /// Open a file with the decoder its content calls for
    ///
    /// # Errors
    ///
    /// Returns error if the format is unknown or the file unreadable
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = match LogFormat::sniff(path)? {
            LogFormat::Blackbox => LogReader::Blackbox(BlackboxLog::open(path)?),
            LogFormat::OtxCsv => LogReader::Otx(OtxLog::open(path)?),
            LogFormat::Capture => LogReader::Capture(CaptureLog::open(path)?),
            LogFormat::ApLog => LogReader::ApLog(ApLog::open(path)?),
        };
        Ok(reader)
    }

    pub fn format(&self) -> LogFormat {
        match self {
            LogReader::Blackbox(_) => LogFormat::Blackbox,
            LogReader::Otx(_) => LogFormat::OtxCsv,
            LogReader::Capture(_) => LogFormat::Capture,
            LogReader::ApLog(_) => LogFormat::ApLog,
        }
    }

    fn inner(&mut self) -> &mut dyn FlightLog {
        match self {
            LogReader::Blackbox(r) => r,
            LogReader::Otx(r) => r,
            LogReader::Capture(r) => r,
            LogReader::ApLog(r) => r,
        }
    }
}

impl FlightLog for LogReader {
    fn metas(&mut self) -> Result<Vec<LogMeta>> {
        self.inner().metas()
    }

    fn reader(&mut self, meta: &LogMeta, ctx: &PipelineContext<'_>) -> Result<Vec<LogSegment>> {
        self.inner().reader(meta, ctx)
    }

    fn dump(&mut self, out: &mut dyn Write) -> Result<()> {
        self.inner().dump(out)
    }

    fn durations(&mut self, metas: &mut [LogMeta]) -> Result<()> {
        self.inner().durations(metas)
    }
}

/// Run decoded records through a segment builder
///
/// Shared by every decoder once it has produced its record stream.
pub fn build_segments<I>(ctx: &PipelineContext<'_>, meta: &LogMeta, records: I) -> Vec<LogSegment>
where
    I: IntoIterator<Item = LogRecord>,
{
    let mut builder = SegmentBuilder::new(*ctx, meta.clone());
    let mut segments = Vec::new();
    for rec in records {
        if let Some(segment) = builder.push(rec) {
            segments.push(segment);
        }
    }
    segments.extend(builder.finish());

    if segments.is_empty() {
        warn!("{}: no usable GPS fix", meta.display_name());
    }
    segments
}

/// File name used as the display name of its entries
pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::Builder;

    fn temp_with(suffix: &str, content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_sniff_by_content() {
        assert_eq!(LogFormat::from_content(b"H Product:Blackbox flight data"), Some(LogFormat::Blackbox));
        assert_eq!(LogFormat::from_content(b"LTMRAW\x01"), Some(LogFormat::Capture));
        assert_eq!(LogFormat::from_content(b"FMT, 128, 89, FMT"), Some(LogFormat::ApLog));
        assert_eq!(LogFormat::from_content(b"Date,Time,GPS,Alt(ft)\n"), Some(LogFormat::OtxCsv));
        assert_eq!(LogFormat::from_content(b"hello world"), None);
    }

    #[test]
    fn test_content_beats_extension() {
        let file = temp_with(".log", b"Date,Time,GPS\n2022-01-01,10:00:00.000,0 0\n");
        assert_eq!(LogFormat::sniff(file.path()).unwrap(), LogFormat::OtxCsv);
    }

    #[test]
    fn test_extension_fallback() {
        let file = temp_with(".csv", b"");
        assert_eq!(LogFormat::sniff(file.path()).unwrap(), LogFormat::OtxCsv);
    }

    #[test]
    fn test_unknown_format_is_fatal() {
        let file = temp_with(".xyz", b"nothing to see");
        let result = LogReader::open(file.path());
        assert!(matches!(result, Err(FlightLogError::UnknownFormat(_))), "Got {:?}", result);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = LogFormat::sniff(Path::new("/nonexistent/flight.csv"));
        assert!(matches!(result, Err(FlightLogError::Io(_))));
    }

    #[test]
    fn test_open_dispatches_by_format() {
        let file = temp_with(".csv", b"Date,Time,GPS\n");
        let reader = LogReader::open(file.path()).unwrap();
        assert_eq!(reader.format(), LogFormat::OtxCsv);
    }
}
