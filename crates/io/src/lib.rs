//! Lap history: the query/insert contract the engine depends on, an
//! in-memory store, and CSV / NDJSON persistence of `LapRecord`s.

use model::{BrakeDucts, GripBucket, PrevLap, RainIntensity, TrainingRow, Wheel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod files;
mod memory;

pub use files::{export_csv, export_ndjson, import_csv, import_ndjson};
pub use memory::MemoryHistoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrevSessionQuery {
    pub car: String,
    pub track: String,
    pub limit: usize,
    pub grip: GripBucket,
}

/// Weather part of a training query: dry laps are grouped by grip, wet laps
/// by rain intensity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherBucket {
    Grip(GripBucket),
    Rain(RainIntensity),
}

/// Which laps are representative enough to learn input pressures from.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingFilter {
    /// Laps `1..=skip_first_laps` of a stint are excluded.
    pub skip_first_laps: u32,
    /// The last `skip_last_laps` laps of a stint are excluded.
    pub skip_last_laps: u32,
    pub max_pressure_loss: f64,
    pub max_air_temp_drift: f64,
    pub max_track_temp_drift: f64,
}

impl Default for TrainingFilter {
    fn default() -> Self {
        Self {
            skip_first_laps: 2,
            skip_last_laps: 1,
            max_pressure_loss: 0.1,
            max_air_temp_drift: 1.0,
            max_track_temp_drift: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainingQuery {
    pub wheel: Wheel,
    pub car: String,
    pub track: String,
    pub brake_ducts: BrakeDucts,
    pub compound: String,
    pub weather: WeatherBucket,
    pub filter: TrainingFilter,
}

/// Read/insert contract of the lap history. Implementations are called from
/// worker threads only, never from the per-tick path.
pub trait HistoryStore: Send + Sync {
    /// Valid fuel laps for `car`/`track` in the grip bucket, newest first.
    fn prev_session_data(&self, q: &PrevSessionQuery) -> Result<Vec<PrevLap>, StoreError>;

    fn input_pressure_training_data(
        &self,
        q: &TrainingQuery,
    ) -> Result<Vec<TrainingRow>, StoreError>;

    fn insert_lap(&self, lap: model::LapRecord) -> Result<(), StoreError>;
}

impl<S: HistoryStore + ?Sized> HistoryStore for std::sync::Arc<S> {
    fn prev_session_data(&self, q: &PrevSessionQuery) -> Result<Vec<PrevLap>, StoreError> {
        (**self).prev_session_data(q)
    }

    fn input_pressure_training_data(
        &self,
        q: &TrainingQuery,
    ) -> Result<Vec<TrainingRow>, StoreError> {
        (**self).input_pressure_training_data(q)
    }

    fn insert_lap(&self, lap: model::LapRecord) -> Result<(), StoreError> {
        (**self).insert_lap(lap)
    }
}
