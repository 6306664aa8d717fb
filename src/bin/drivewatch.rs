//! drivewatch - driver monitoring client tools
//!
//! # Usage
//!
//! ```text
//! drivewatch config                     # Print the effective configuration
//! drivewatch replay frames.jsonl        # Run recorded telemetry through the alert rules
//! drivewatch replay frames.jsonl --interval-ms 33
//! drivewatch history                    # List finished monitoring sessions
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use drivewatch_client::{ClientConfig, JsonlSummaryStore, SummaryStore};
use drivewatch_core::{ActiveAlert, AlertEvaluator};
use drivewatch_protocol::parse_metrics_frame;

// ============================================================================
// CLI Arguments
// ============================================================================

/// drivewatch - real-time driver monitoring
#[derive(Parser, Debug)]
#[command(name = "drivewatch", version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration as TOML
    Config,
    /// Evaluate recorded telemetry frames (one JSON object per line)
    Replay {
        /// File of telemetry frames, or "-" for stdin
        file: PathBuf,

        /// Simulated time between consecutive frames
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },
    /// List finished monitoring sessions
    History {
        /// Show only the most recent N sessions
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("drivewatch=info".parse()?)
                .add_directive("drivewatch_client=info".parse()?)
                .add_directive("drivewatch_protocol=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = ClientConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    debug!(signaling_url = %config.signaling_url, "Configuration loaded");

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Config => {
            let text = config.to_toml_string().context("Failed to render configuration")?;
            write!(out, "{text}")?;
        }
        Command::Replay { file, interval_ms } => {
            let reader: Box<dyn BufRead> = if file.as_os_str() == "-" {
                Box::new(BufReader::new(io::stdin()))
            } else {
                let handle = File::open(&file)
                    .with_context(|| format!("Failed to open {}", file.display()))?;
                Box::new(BufReader::new(handle))
            };
            let interval = i64::try_from(interval_ms)
                .ok()
                .and_then(Duration::try_milliseconds)
                .with_context(|| format!("--interval-ms {interval_ms} is out of range"))?;
            let report = replay(reader, interval, Utc::now())?;
            print_replay(&mut out, &report)?;
        }
        Command::History { limit } => {
            let store = JsonlSummaryStore::new(config.summary_path());
            let summaries = store.load_all().context("Failed to read session history")?;
            print_history(&mut out, &summaries, limit)?;
        }
    }

    Ok(())
}

// ============================================================================
// Replay
// ============================================================================

/// Outcome of replaying a telemetry recording.
#[derive(Debug, Default)]
struct ReplayReport {
    frames: u64,
    skipped: u64,
    /// Fired alerts with the offset of the frame that fired them.
    fired: Vec<(Duration, ActiveAlert)>,
    evaluator: Option<AlertEvaluator>,
}

/// Feeds each line through the default alert rules on a simulated clock.
fn replay<R: BufRead>(reader: R, interval: Duration, start: DateTime<Utc>) -> Result<ReplayReport> {
    let mut evaluator = AlertEvaluator::with_defaults();
    let mut report = ReplayReport::default();
    let mut offset = Duration::zero();

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read telemetry")?;
        if line.trim().is_empty() {
            continue;
        }

        let frame = match parse_metrics_frame(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping unreadable frame");
                report.skipped += 1;
                continue;
            }
        };

        let now = start
            .checked_add_signed(offset)
            .with_context(|| format!("Simulated clock overflowed at line {}", index + 1))?;
        for alert in evaluator.evaluate_at(&frame, now) {
            report.fired.push((offset, alert));
        }
        report.frames += 1;
        offset = offset
            .checked_add(&interval)
            .with_context(|| format!("Simulated clock overflowed at line {}", index + 1))?;
    }

    report.evaluator = Some(evaluator);
    Ok(report)
}

fn print_replay<W: Write>(out: &mut W, report: &ReplayReport) -> io::Result<()> {
    for (offset, alert) in &report.fired {
        let secs = offset.num_milliseconds() as f64 / 1000.0;
        writeln!(
            out,
            "[{secs:>8.1}s] {:<8} {:<20} {}",
            alert.priority.label(),
            alert.id.as_str(),
            alert.message
        )?;
    }

    writeln!(
        out,
        "{} frames, {} skipped, {} alerts",
        report.frames,
        report.skipped,
        report.fired.len()
    )?;
    if let Some(evaluator) = &report.evaluator {
        for (id, count) in evaluator.firing_counts() {
            writeln!(out, "  {id}: {count}")?;
        }
    }
    Ok(())
}

// ============================================================================
// History
// ============================================================================

fn print_history<W: Write>(
    out: &mut W,
    summaries: &[drivewatch_core::SessionSummary],
    limit: Option<usize>,
) -> io::Result<()> {
    if summaries.is_empty() {
        writeln!(out, "No sessions recorded.")?;
        return Ok(());
    }

    let skip = limit.map_or(0, |n| summaries.len().saturating_sub(n));
    for summary in summaries.iter().skip(skip) {
        let started = summary.started_at.format("%Y-%m-%d %H:%M:%S");
        let client = summary.client_id.as_deref().unwrap_or("-");
        write!(
            out,
            "{started}  {:>8}  {client:<12}  {:>6} frames  {:>3} alerts",
            summary.duration_display(),
            summary.frames_received,
            summary.total_alerts()
        )?;
        if let Some(error) = &summary.error {
            write!(out, "  ({error})")?;
        }
        writeln!(out)?;
    }
    Ok(())
}
