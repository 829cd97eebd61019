//! Replays recorded telemetry (one JSON `TelemetrySample` per line) as a live
//! source, paced at a fixed tick interval.

use anyhow::Context;
use ingest_core::*;
use std::path::PathBuf;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
    time::{self, Duration},
};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// Time between emitted samples
    pub interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        // 60 Hz, the rate most shared-memory sources update at
        Self { interval: Duration::from_micros(16_667) }
    }
}

impl ReplayConfig {
    pub fn with_rate_hz(hz: f64) -> Self {
        if hz > 0.0 && hz.is_finite() {
            Self { interval: Duration::from_secs_f64(1.0 / hz) }
        } else {
            Self::default()
        }
    }
}

enum Recording {
    File(PathBuf),
    Samples(Vec<TelemetrySample>),
}

pub struct ReplaySource {
    recording: Recording,
    cfg: ReplayConfig,
}

impl ReplaySource {
    pub fn from_path(path: impl Into<PathBuf>, cfg: ReplayConfig) -> Self {
        Self { recording: Recording::File(path.into()), cfg }
    }

    pub fn from_samples(samples: Vec<TelemetrySample>, cfg: ReplayConfig) -> Self {
        Self { recording: Recording::Samples(samples), cfg }
    }
}

#[async_trait::async_trait]
impl TelemetrySource for ReplaySource {
    async fn run(&self, tx: TelemetryTx) -> Result<(), IngestError> {
        let mut tick = time::interval(self.cfg.interval);
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        match &self.recording {
            Recording::Samples(samples) => {
                for s in samples {
                    tick.tick().await;
                    if tx.send(s.clone()).is_err() {
                        debug!("replay receiver dropped");
                        return Ok(());
                    }
                }
            }
            Recording::File(path) => {
                let f = File::open(path)
                    .await
                    .with_context(|| format!("open {}", path.display()))?;
                let mut lines = BufReader::new(f).lines();
                let mut line_no = 0u64;
                while let Some(line) = lines.next_line().await.context("read recording")? {
                    line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let sample: TelemetrySample = match serde_json::from_str(&line) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(line = line_no, error = %e, "skipping malformed sample");
                            continue;
                        }
                    };
                    tick.tick().await;
                    if tx.send(sample).is_err() {
                        debug!("replay receiver dropped");
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}
