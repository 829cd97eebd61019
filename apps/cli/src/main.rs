mod session;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use engine::{EngineConfig, LiveEngine};
use history_io::MemoryHistoryStore;
use ingest_replay::{ReplayConfig, ReplaySource};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Replays recorded telemetry through the live engine and keeps the lap
/// history up to date.
#[derive(Parser, Debug)]
#[command(name = "delta-engineer", version)]
struct Args {
    /// Recorded samples, one JSON object per line
    #[arg(long)]
    samples: PathBuf,
    /// Lap history CSV (default: <config dir>/delta-engineer/laps.csv)
    #[arg(long)]
    history: Option<PathBuf>,
    /// Engine config JSON
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 60.0)]
    rate_hz: f64,
}

fn default_history_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|d| d.join("delta-engineer").join("laps.csv"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(p) => EngineConfig::load(p)?,
        None => EngineConfig::default(),
    };
    let history_path = args
        .history
        .clone()
        .or_else(default_history_path)
        .context("no --history given and no config directory")?;

    let store = Arc::new(if history_path.exists() {
        MemoryHistoryStore::load_csv(&history_path)
            .with_context(|| format!("load history {}", history_path.display()))?
    } else {
        MemoryHistoryStore::new()
    });
    info!(laps = store.len(), path = %history_path.display(), "history loaded");

    let engine = LiveEngine::new(cfg, store.clone());
    let src = ReplaySource::from_path(&args.samples, ReplayConfig::with_rate_hz(args.rate_hz));
    let h = session::run_source(src, engine, store.clone())?;

    h.source.await?.context("replay")?;
    let snapshot = tokio::task::spawn_blocking(move || h.pump.join())
        .await?
        .map_err(|_| anyhow!("tick thread panicked"))?;
    let stored = h
        .writer
        .join()
        .map_err(|_| anyhow!("lap writer panicked"))?;

    if let Some(dir) = history_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    store.save_csv(&history_path)?;
    info!(new_laps = stored, total = store.len(), "history saved");

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
