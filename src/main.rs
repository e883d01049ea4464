//! # Flightlog Replay
//!
//! Decode FPV flight logs, print their summaries, export tracks and replay
//! them as live telemetry.
//!
//! ```bash
//! flightlog-replay flightlog.toml LOG00042.TXT otx-2023-07-14.csv
//! ```
//!
//! Every file named after the configuration is processed in turn. A file
//! that cannot be decoded is reported and skipped; the batch carries on.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use flightlog_replay::catalog;
use flightlog_replay::config::{Config, ReplayMode};
use flightlog_replay::decoder::{FlightLog, LogReader};
use flightlog_replay::export::export_segment;
use flightlog_replay::geo::{NoElevation, Obfuscator};
use flightlog_replay::mission::Mission;
use flightlog_replay::replay::{
    replay_to_ltm, BulletEncoder, LinePublisher, PublishSink, ReplayConfig, ReplayEngine, TokioClock,
};
use flightlog_replay::segment::PipelineContext;
use flightlog_replay::serial::{LtmSerial, WriterPort, LTM_STDOUT_DEVICE};
use flightlog_replay::types::LogSegment;

/// Rolling log file name prefix (a date suffix is appended daily)
const LOG_FILE_PREFIX: &str = "flightlog-replay.log";

/// Printed when arguments are missing
const USAGE: &str = "usage: flightlog-replay <config.toml> <logfile>...";

/// Split the command line into the configuration path and log files
fn parse_args(args: &[String]) -> Option<(PathBuf, Vec<PathBuf>)> {
    let (config, files) = args.split_first()?;
    if files.is_empty() {
        return None;
    }
    Some((PathBuf::from(config), files.iter().map(PathBuf::from).collect()))
}

/// Console logging to stderr, plus a daily rolling file when configured
///
/// # Returns
///
/// The file writer guard, which must live until exit
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Main entry point for Flightlog Replay
///
/// # Control Flow
///
/// 1. Load and validate the configuration, then set up logging
/// 2. Load the mission (if configured), obfuscated like the flight
/// 3. For each log file: catalog, decode, summarize, export and replay
/// 4. Ctrl+C stops the batch at any point
///
/// # Errors
///
/// Returns error if the configuration or mission cannot be loaded. Errors
/// in individual log files are reported and do not stop the batch.
#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((config_path, files)) = parse_args(&args) else {
        bail!(USAGE);
    };

    let config = Config::load(&config_path)
        .with_context(|| format!("Cannot load configuration {}", config_path.display()))?;
    let _guard = init_logging(&config)?;

    info!("Flightlog Replay v{} starting...", env!("CARGO_PKG_VERSION"));

    let obfuscator = config.obfuscator();
    let mission = match &config.replay.mission {
        Some(path) => {
            let mut mission = Mission::load(path)
                .with_context(|| format!("Cannot load mission {}", path.display()))?;
            mission.obfuscate(&obfuscator);
            Some(Arc::new(mission))
        }
        None => None,
    };

    tokio::select! {
        failed = run_batch(&config, &files, obfuscator, mission) => {
            if failed > 0 {
                warn!("{} of {} files failed", failed, files.len());
            }
        }

        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}

/// Process every file, returning how many failed
async fn run_batch(config: &Config, files: &[PathBuf], obfuscator: Obfuscator, mission: Option<Arc<Mission>>) -> usize {
    let elevation = NoElevation;
    let ctx = PipelineContext::new(config.segment_config(), obfuscator, &elevation);

    let mut failed = 0;
    for path in files {
        if let Err(e) = process_file(config, &ctx, path, mission.clone()).await {
            error!("{}: {:#}", path.display(), e);
            failed += 1;
        }
    }
    failed
}

/// Decode one file and send its segments to the configured outputs
async fn process_file(
    config: &Config,
    ctx: &PipelineContext<'_>,
    path: &Path,
    mission: Option<Arc<Mission>>,
) -> Result<()> {
    let mut log = LogReader::open(path)?;
    info!("{}: {} log", path.display(), log.format().name());

    if config.output.dump {
        log.dump(&mut std::io::stdout().lock())?;
        return Ok(());
    }

    let metas = catalog::catalog(&mut log, config.pipeline.index)?;
    if config.output.metas {
        catalog::write_metas(&mut std::io::stdout().lock(), &metas)?;
        return Ok(());
    }
    if metas.is_empty() {
        warn!("{}: no log entries selected", path.display());
        return Ok(());
    }

    for meta in &metas {
        if !meta.is_valid() {
            warn!("{}: no decodable data, skipping", meta.display_name());
            continue;
        }

        let segments = log.reader(meta, ctx)?;
        for segment in segments {
            catalog::write_summary(&mut std::io::stdout().lock(), &catalog::segment_summary(&segment))?;
            if config.output.summary_only {
                continue;
            }
            if config.output.export {
                export_segment(&segment, path, &config.pipeline.output_dir)?;
            }
            replay(config, segment, mission.clone()).await?;
        }
    }
    Ok(())
}

/// Replay one segment to the configured destination
async fn replay(config: &Config, segment: LogSegment, mission: Option<Arc<Mission>>) -> Result<()> {
    let replay_config = ReplayConfig { announce_interval: config.replay.announce_interval, mission };
    let engine = ReplayEngine::new(TokioClock, replay_config);

    match config.replay_mode() {
        ReplayMode::None => {}
        ReplayMode::Publish => {
            let encoder = BulletEncoder::new(config.bullet_version(), &config.replay.callsign);
            let report = match &config.replay.publish_path {
                Some(out) => {
                    let file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(out)
                        .await
                        .with_context(|| format!("Cannot open {}", out.display()))?;
                    let mut sink = PublishSink::new(LinePublisher::new(file), encoder);
                    engine.run(&segment, &mut sink).await?
                }
                None => {
                    let mut sink = PublishSink::new(LinePublisher::new(tokio::io::stdout()), encoder);
                    engine.run(&segment, &mut sink).await?
                }
            };
            info!("Published {} records ({}S battery)", report.records, report.cells);
        }
        ReplayMode::Ltm if config.ltm.device == LTM_STDOUT_DEVICE => {
            let port = WriterPort::new(tokio::io::stdout());
            let (report, frames) = replay_to_ltm(engine, segment, port).await?;
            info!("Replayed {} records as {} LTM frames to stdout", report.records, frames);
        }
        ReplayMode::Ltm => {
            let serial = LtmSerial::open(&config.ltm.device, config.ltm.baud_rate)?;
            info!("LTM output at {} ({} baud)", serial.device_path(), serial.baud_rate());
            let (report, frames) = replay_to_ltm(engine, segment, serial.into_port()).await?;
            info!("Replayed {} records as {} LTM frames", report.records, frames);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let (config, files) = parse_args(&args(&["fl.toml", "a.csv", "b.TXT"])).unwrap();
        assert_eq!(config, PathBuf::from("fl.toml"));
        assert_eq!(files, vec![PathBuf::from("a.csv"), PathBuf::from("b.TXT")]);
    }

    #[test]
    fn test_parse_args_requires_log_file() {
        assert!(parse_args(&args(&[])).is_none());
        assert!(parse_args(&args(&["fl.toml"])).is_none(), "A config alone is not enough");
    }

    #[test]
    fn test_usage_names_binary() {
        assert!(USAGE.contains(env!("CARGO_PKG_NAME")), "Usage should name the binary");
    }

    #[test]
    fn test_log_file_prefix() {
        assert!(LOG_FILE_PREFIX.ends_with(".log"));
    }
}
