use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use engine::{EngineSnapshot, LiveEngine};
use history_io::HistoryStore;
use ingest_core::{channel, IngestError, TelemetryRx, TelemetrySource};
use model::LapRecord;
use tracing::{debug, warn};

pub struct SessionHandles {
    pub source: tokio::task::JoinHandle<Result<(), IngestError>>,
    /// Ends once the source is exhausted; yields the final engine state.
    pub pump: JoinHandle<EngineSnapshot>,
    /// Ends after the pump; yields the number of laps stored.
    pub writer: JoinHandle<usize>,
}

/// Runs `src` on the tokio runtime and feeds its samples through `engine` on
/// a dedicated tick thread. Finished laps go to `store` from a writer thread.
pub fn run_source<S: TelemetrySource + 'static>(
    src: S,
    mut engine: LiveEngine,
    store: Arc<dyn HistoryStore>,
) -> anyhow::Result<SessionHandles> {
    let (tx, rx): (_, TelemetryRx) = channel();
    let source = tokio::spawn(async move { src.run(tx).await });

    let (lap_tx, lap_rx) = crossbeam_channel::unbounded::<LapRecord>();
    let writer = thread::Builder::new()
        .name("lap-writer".into())
        .spawn(move || {
            let mut stored = 0;
            for lap in lap_rx {
                match store.insert_lap(lap) {
                    Ok(()) => stored += 1,
                    Err(e) => warn!(error = %e, "lap not stored"),
                }
            }
            stored
        })?;

    let pump = thread::Builder::new()
        .name("tick".into())
        .spawn(move || {
            let mut ticks = 0u64;
            for sample in rx {
                ticks += 1;
                if let Some(lap) = engine.update(sample).finished_lap {
                    let _ = lap_tx.send(lap);
                }
            }
            debug!(ticks, "source drained");
            if !engine.settle(Duration::from_secs(10)) {
                warn!("background work still running at shutdown");
            }
            engine.snapshot()
        })?;

    Ok(SessionHandles { source, pump, writer })
}
