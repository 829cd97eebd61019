//! Core telemetry sample and source traits used by the derived-state engine

use model::{BrakeDucts, RainIntensity, SessionType, TrackGrip, Wheels};
use serde::{Deserialize, Serialize};

mod capabilities;

pub use capabilities::{AvailableFields, MenuDetection, SourceCapabilities, UiVisibility};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    #[default]
    Acc,
    Lmu,
    Ams2,
}

/// One telemetry tick. Produced by a source, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TelemetrySample {
    pub game: Game,
    pub session_uid: String,
    pub frame: u64,
    pub sim_time_s: f64,
    pub car: String,
    pub track: String,
    pub session_type: SessionType,

    // vehicle
    pub speed_kph: f64,
    pub fuel: f64,
    pub engine_map: i32,
    pub in_pit_lane: bool,
    pub in_pit_box: bool,
    pub in_garage: bool,
    pub is_paused: bool,

    // tyres & brakes
    pub tyre_pressure: Wheels<f64>,
    pub tyre_temp: Wheels<f64>,
    pub brake_temp: Wheels<f64>,
    pub input_pressure: Wheels<f64>, // cold pressure of the fitted set
    pub tyre_compound: String,
    pub brake_ducts: BrakeDucts,

    // conditions
    pub air_temp: f64,
    pub track_temp: f64,
    pub track_grip: TrackGrip,
    pub rain_intensity: RainIntensity,
    pub rain_forecast: RainIntensity,

    // session / lap counters
    pub completed_laps: u32,
    pub last_lap_time_s: f64,
    pub session_time_left_s: f64,
    pub remaining_laps: u32,
}

impl TelemetrySample {
    /// A tick whose core scalars are NaN cannot drive any transition.
    pub fn is_malformed(&self) -> bool {
        self.speed_kph.is_nan()
            || self.air_temp.is_nan()
            || self.track_temp.is_nan()
            || self.fuel.is_nan()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Msg(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TelemetryTx = crossbeam_channel::Sender<TelemetrySample>;
pub type TelemetryRx = crossbeam_channel::Receiver<TelemetrySample>;

/// Trait for any live source connector
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn run(&self, tx: TelemetryTx) -> Result<(), IngestError>;
}

pub fn channel() -> (TelemetryTx, TelemetryRx) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let s: TelemetrySample =
            serde_json::from_str(r#"{"speed_kph": 120.5, "completed_laps": 3, "game": "lmu"}"#)
                .unwrap();
        assert_eq!(s.completed_laps, 3);
        assert_eq!(s.game, Game::Lmu);
        assert_eq!(s.rain_intensity, RainIntensity::None);
        assert!(!s.is_malformed());
    }

    #[test]
    fn nan_scalars_mark_sample_malformed() {
        let s = TelemetrySample {
            speed_kph: f64::NAN,
            ..TelemetrySample::default()
        };
        assert!(s.is_malformed());
    }

    #[test]
    fn channel_carries_samples() {
        let (tx, rx) = channel();
        tx.send(TelemetrySample {
            frame: 7,
            ..TelemetrySample::default()
        })
        .unwrap();
        assert_eq!(rx.recv().unwrap().frame, 7);
    }
}
