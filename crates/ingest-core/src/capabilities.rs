use serde::{Deserialize, Serialize};

use crate::{Game, TelemetrySample};

/// How a source signals that the player is in the garage/menu.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MenuDetection {
    /// The source exposes an explicit in-garage flag.
    GarageFlag,
    /// The source reports an ambient temperature of exactly zero outside the car.
    ZeroAirTemp,
}

/// Whether the driving UI is visible, for sources that do not report it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UiVisibility {
    Always,
    /// Visible only while the ambient temperature reads above zero.
    PositiveAirTemp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableFields {
    pub engine_map: bool,
    pub brake_temp: bool,
    pub input_pressure: bool,
    pub rain_forecast: bool,
}

impl Default for AvailableFields {
    fn default() -> Self {
        Self {
            engine_map: true,
            brake_temp: true,
            input_pressure: true,
            rain_forecast: true,
        }
    }
}

/// Per-source thresholds and feature flags, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceCapabilities {
    pub game: Game,
    pub menu_detection: MenuDetection,
    pub ui_visibility: UiVisibility,
    /// Tick-to-tick hot pressure drop that counts as pressure loss.
    pub pressure_loss_threshold: f64,
    pub moving_speed_kph: f64,
    pub fields: AvailableFields,
}

impl SourceCapabilities {
    pub fn for_game(game: Game) -> Self {
        match game {
            Game::Acc => Self {
                game,
                menu_detection: MenuDetection::ZeroAirTemp,
                ui_visibility: UiVisibility::PositiveAirTemp,
                pressure_loss_threshold: 0.1,
                moving_speed_kph: 1.0,
                fields: AvailableFields::default(),
            },
            Game::Lmu => Self {
                game,
                menu_detection: MenuDetection::GarageFlag,
                ui_visibility: UiVisibility::Always,
                pressure_loss_threshold: 0.1,
                moving_speed_kph: 1.0,
                fields: AvailableFields {
                    rain_forecast: false,
                    ..AvailableFields::default()
                },
            },
            // noisy pressures around off-track excursions
            Game::Ams2 => Self {
                game,
                menu_detection: MenuDetection::GarageFlag,
                ui_visibility: UiVisibility::Always,
                pressure_loss_threshold: 1.0,
                moving_speed_kph: 1.0,
                fields: AvailableFields {
                    engine_map: false,
                    input_pressure: false,
                    rain_forecast: false,
                    ..AvailableFields::default()
                },
            },
        }
    }

    pub fn in_menu(&self, s: &TelemetrySample) -> bool {
        match self.menu_detection {
            MenuDetection::GarageFlag => s.in_garage,
            MenuDetection::ZeroAirTemp => s.air_temp == 0.0,
        }
    }

    pub fn ui_visible(&self, s: &TelemetrySample) -> bool {
        match self.ui_visibility {
            UiVisibility::Always => true,
            UiVisibility::PositiveAirTemp => s.air_temp > 0.0,
        }
    }

    pub fn is_moving(&self, s: &TelemetrySample) -> bool {
        s.speed_kph > self.moving_speed_kph
    }
}

impl Default for SourceCapabilities {
    fn default() -> Self {
        Self::for_game(Game::default())
    }
}
