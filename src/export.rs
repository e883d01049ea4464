//! # Static Export
//!
//! Writes a finished segment to disk as two files next to each other in the
//! output directory:
//!
//! - `<stem>[.<index>].jsonl`: the track, one serialized [`LogRecord`] per line
//! - `<stem>[.<index>].geojson`: a `FeatureCollection` with the home point and
//!   the track line
//!
//! The index suffix only appears for the second and later entries of a
//! multi-entry file, and for split parts (`.<index>.<part>`).

use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::types::{format_elapsed, HomeFlags, LogRecord, LogSegment};

/// Track file extension
pub const TRACK_EXTENSION: &str = "jsonl";

/// Summary geometry extension
pub const GEOJSON_EXTENSION: &str = "geojson";

/// Files written for one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub track: PathBuf,
    pub geojson: PathBuf,
}

/// Base name (without extension) for a segment's output files
///
/// # Examples
///
/// ```
/// use flightlog_replay::export::output_stem;
/// use std::path::Path;
///
/// assert_eq!(output_stem(Path::new("/logs/LOG00042.TXT"), 1, 1), "LOG00042");
/// assert_eq!(output_stem(Path::new("/logs/LOG00042.TXT"), 3, 1), "LOG00042.3");
/// assert_eq!(output_stem(Path::new("flight.csv"), 1, 2), "flight.1.2");
/// ```
pub fn output_stem(source: &Path, index: usize, part: usize) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flight".to_string());

    match (index, part) {
        (_, p) if p > 1 => format!("{}.{}.{}", stem, index, p),
        (i, _) if i > 1 => format!("{}.{}", stem, i),
        _ => stem,
    }
}

/// Write records as JSON lines
///
/// # Errors
///
/// Returns error if a record cannot be serialized or the writer fails
pub fn write_track(out: &mut dyn Write, records: &[LogRecord]) -> Result<()> {
    for rec in records {
        serde_json::to_writer(&mut *out, rec)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// GeoJSON `FeatureCollection` for a segment
///
/// Coordinates are `[lon, lat, alt]`; the track line carries the summary
/// as properties.
pub fn geojson(segment: &LogSegment) -> Value {
    let line: Vec<Value> = segment
        .records
        .iter()
        .filter(|r| r.lat != 0.0 || r.lon != 0.0)
        .map(|r| json!([r.lon, r.lat, r.alt]))
        .collect();

    let stats = &segment.stats;
    json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [segment.home.lon, segment.home.lat, segment.home.alt],
                },
                "properties": {
                    "name": "Home",
                    "altitude_known": segment.home.flags.contains(HomeFlags::ALTITUDE_KNOWN),
                },
            },
            {
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": line,
                },
                "properties": {
                    "name": segment.meta.display_name(),
                    "part": segment.part,
                    "date": segment.meta.date,
                    "firmware": segment.meta.firmware,
                    "duration": format_elapsed(segment.duration()),
                    "distance": stats.distance,
                    "max_alt": stats.max_alt,
                    "max_speed": stats.max_speed,
                    "max_range": stats.max_range,
                    "max_current": stats.max_current,
                    "suspect": segment.meta.is_suspect(),
                },
            },
        ],
    })
}

/// Write a segment's track and GeoJSON into `output_dir`
///
/// # Arguments
///
/// * `segment` - Finished segment
/// * `source` - Input log file the segment was decoded from
/// * `output_dir` - Directory receiving the files (created if missing)
///
/// # Errors
///
/// Returns error if the directory or files cannot be written
pub fn export_segment(segment: &LogSegment, source: &Path, output_dir: &Path) -> Result<ExportPaths> {
    std::fs::create_dir_all(output_dir)?;
    let stem = output_stem(source, segment.meta.index, segment.part);
    let paths = ExportPaths {
        track: output_dir.join(format!("{}.{}", stem, TRACK_EXTENSION)),
        geojson: output_dir.join(format!("{}.{}", stem, GEOJSON_EXTENSION)),
    };

    let mut track = BufWriter::new(File::create(&paths.track)?);
    write_track(&mut track, &segment.records)?;

    let mut geo = BufWriter::new(File::create(&paths.geojson)?);
    serde_json::to_writer_pretty(&mut geo, &geojson(segment))?;
    geo.flush()?;

    info!(
        "Exported {} records to {} and {}",
        segment.records.len(),
        paths.track.display(),
        paths.geojson.display()
    );
    Ok(paths)
}
