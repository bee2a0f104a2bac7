//! SkiScore command-line host.
//!
//! Replays recorded GPS tracks through the tracking engine and shows the
//! stored session history.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skiscore_core::{AppError, Config};
use skiscore_sessions::SqliteSessionStore;
use skiscore_tracker::{format_elapsed, ReplaySource, SessionStore, TrackerEvent, TrackingEngine};
use tokio::sync::broadcast::error::RecvError;

const PERSIST_WAIT: Duration = Duration::from_secs(10);

/// SkiScore: ski run tracking
#[derive(Parser, Debug)]
#[command(name = "skiscore")]
#[command(version, about = "Ski run tracking from GPS fixes")]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded track (one JSON fix per line) as a live session
    Replay {
        /// Track file
        file: PathBuf,

        /// Playback speed multiplier
        #[arg(long, default_value_t = 1.0)]
        speedup: f64,

        /// Do not add the session to the history
        #[arg(long)]
        no_save: bool,

        /// Print an emergency message with the last known position at the end
        #[arg(long)]
        sos: bool,
    },

    /// List stored sessions and season totals
    History {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    skiscore_core::init()?;

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}", e.user_message());
        return Err(e.into());
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let (config, _) = Config::load_validated(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay { file, speedup, no_save, sos } => {
            replay(&config, &file, speedup, no_save, sos).await?;
        }
        Commands::History { json } => {
            history(&config, json)?;
        }
    }

    Ok(())
}

async fn replay(
    config: &Config,
    file: &Path,
    speedup: f64,
    no_save: bool,
    sos: bool,
) -> Result<(), AppError> {
    if !(speedup.is_finite() && speedup > 0.0) {
        return Err(AppError::Other(anyhow::anyhow!("--speedup must be a positive number")));
    }

    let source = Arc::new(
        ReplaySource::load(file)
            .with_context(|| format!("Failed to load track {}", file.display()))?
            .with_speedup(speedup),
    );
    tracing::info!("Replaying {} fixes from {}", source.len(), file.display());

    let store: Arc<dyn SessionStore> = if no_save {
        Arc::new(SqliteSessionStore::in_memory()?)
    } else {
        Arc::new(SqliteSessionStore::open(config)?)
    };

    let engine = TrackingEngine::new(source.clone(), store, config.tracking.clone());
    let printer = tokio::spawn(print_events(engine.subscribe(), no_save));

    engine.start().await?;

    tokio::select! {
        _ = source.finished() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, finishing session");
        }
    }

    let record = engine.stop().await?;

    match tokio::time::timeout(PERSIST_WAIT, printer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Event printer failed: {}", e),
        Err(_) => tracing::warn!("Timed out waiting for the session to be stored"),
    }

    if let Some(record) = record {
        println!("{}", serde_json::to_string(&record).map_err(anyhow::Error::from)?);
        tracing::info!(
            "Session {}: {:.2} km, max {:.1} km/h, avg {:.1} km/h",
            format_elapsed(record.duration_ms),
            record.total_distance_km,
            record.max_speed_kmh,
            record.avg_speed_kmh
        );
    }

    if sos {
        println!("{}", engine.emergency_message());
    }

    Ok(())
}

/// Print events as JSON lines until the store reports back.
async fn print_events(
    mut events: tokio::sync::broadcast::Receiver<TrackerEvent>,
    quiet_persist: bool,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {} snapshots", skipped);
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        let done = !matches!(event, TrackerEvent::Snapshot(_));
        if !(done && quiet_persist) {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to encode event: {}", e),
            }
        }

        if done {
            return;
        }
    }
}

fn history(config: &Config, json: bool) -> Result<(), AppError> {
    let store = SqliteSessionStore::open(config)?;
    let sessions = store.list()?;
    let summary = store.season_summary()?;

    if json {
        let output = serde_json::json!({ "sessions": sessions, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&output).map_err(anyhow::Error::from)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    println!(
        "{:>4}  {:<16}  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}",
        "#", "Date (UTC)", "Time", "km", "Max", "Avg", "Alt m"
    );
    for session in &sessions {
        let record = &session.record;
        let date = chrono::DateTime::from_timestamp_millis(record.start_timestamp_ms)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:>4}  {:<16}  {:>8}  {:>8.2}  {:>8.1}  {:>8.1}  {:>8.0}",
            session.id,
            date,
            format_elapsed(record.duration_ms),
            record.total_distance_km,
            record.max_speed_kmh,
            record.avg_speed_kmh,
            record.last_altitude_m
        );
    }

    println!();
    println!(
        "Season: {} sessions over {} days, {:.1} km, best {:.1} km/h",
        summary.sessions, summary.days_on_snow, summary.total_distance_km, summary.best_max_speed_kmh
    );

    Ok(())
}
