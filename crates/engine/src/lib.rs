//! Live derived state for a racing telemetry stream.
//!
//! [`LiveEngine`] is fed one [`TelemetrySample`](ingest_core::TelemetrySample)
//! per tick. It runs the [`EventStateMachine`], keeps bounded per-lap
//! statistics windows, and maintains the [`PressurePredictor`] models, whose
//! refits run in the background against a
//! [`HistoryStore`](history_io::HistoryStore).

pub mod config;
pub mod events;
pub mod live;
pub mod predictor;

pub use config::{AxlePressures, EngineConfig, IdealPressures};
pub use events::{EventState, EventStateMachine, FinishedLap};
pub use live::{EngineSnapshot, LapWheelStats, LiveEngine, Predictions, TickOutcome};
pub use predictor::{PredictorConfig, PressurePredictor, RefitKey, Regime};
