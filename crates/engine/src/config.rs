use std::path::Path;

use anyhow::Context;
use ingest_core::{Game, SourceCapabilities};
use serde::{Deserialize, Serialize};

use crate::predictor::{PredictorConfig, Regime};

/// Hot pressure targets for one axle pair, psi.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxlePressures {
    pub front: f64,
    pub rear: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdealPressures {
    pub dry: AxlePressures,
    pub wet: AxlePressures,
}

impl Default for IdealPressures {
    fn default() -> Self {
        Self {
            dry: AxlePressures { front: 27.6, rear: 27.6 },
            wet: AxlePressures { front: 30.5, rear: 30.5 },
        }
    }
}

impl IdealPressures {
    pub fn for_regime(&self, regime: Regime) -> AxlePressures {
        if regime.is_wet() {
            self.wet
        } else {
            self.dry
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Laps kept by every per-lap statistics window.
    pub window_capacity: usize,
    pub game: Game,
    /// Replaces the preset resolved from `game` when set.
    pub capabilities: Option<SourceCapabilities>,
    pub ideal_pressure: IdealPressures,
    pub predictor: PredictorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: 10,
            game: Game::default(),
            capabilities: None,
            ideal_pressure: IdealPressures::default(),
            predictor: PredictorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        anyhow::ensure!(cfg.window_capacity > 0, "window_capacity must be positive");
        anyhow::ensure!(
            cfg.predictor.regularization.is_finite() && cfg.predictor.regularization >= 0.0,
            "predictor.regularization must be a non-negative number"
        );
        Ok(cfg)
    }

    pub fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
            .clone()
            .unwrap_or_else(|| SourceCapabilities::for_game(self.game))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"game": "ams2", "predictor": {{"regularization": 0.5}}, "ideal_pressure": {{"wet": {{"front": 30.0, "rear": 29.5}}}}}}"#
        )
        .unwrap();
        let cfg = EngineConfig::load(f.path()).unwrap();
        assert_eq!(cfg.window_capacity, 10);
        assert_eq!(cfg.predictor.regularization, 0.5);
        assert_eq!(cfg.predictor.min_training_rows, 4);
        assert_eq!(cfg.predictor.filter.skip_first_laps, 2);
        assert_eq!(cfg.ideal_pressure.dry.front, 27.6);
        assert_eq!(cfg.ideal_pressure.for_regime(Regime::NowWet).rear, 29.5);
        assert_eq!(cfg.capabilities().pressure_loss_threshold, 1.0);
    }

    #[test]
    fn explicit_capabilities_win() {
        let mut caps = SourceCapabilities::for_game(Game::Lmu);
        caps.pressure_loss_threshold = 0.3;
        let cfg = EngineConfig {
            capabilities: Some(caps.clone()),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.capabilities(), caps);
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"window_capacity": 0}}"#).unwrap();
        assert!(EngineConfig::load(f.path()).is_err());
    }
}
