//! Value types shared by the derived-state engine, the statistics crate and
//! the lap history store.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Wheel {
    FL,
    FR,
    RL,
    RR,
}

impl Wheel {
    pub const ALL: [Wheel; 4] = [Wheel::FL, Wheel::FR, Wheel::RL, Wheel::RR];

    pub fn axle(self) -> Axle {
        match self {
            Wheel::FL | Wheel::FR => Axle::Front,
            Wheel::RL | Wheel::RR => Axle::Rear,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Wheel::FL => "fl",
            Wheel::FR => "fr",
            Wheel::RL => "rl",
            Wheel::RR => "rr",
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Axle {
    Front,
    Rear,
}

/// One value per wheel.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Wheels<T> {
    pub fl: T,
    pub fr: T,
    pub rl: T,
    pub rr: T,
}

impl<T> Wheels<T> {
    pub fn new(fl: T, fr: T, rl: T, rr: T) -> Self {
        Self { fl, fr, rl, rr }
    }

    pub fn from_fn(mut f: impl FnMut(Wheel) -> T) -> Self {
        Self {
            fl: f(Wheel::FL),
            fr: f(Wheel::FR),
            rl: f(Wheel::RL),
            rr: f(Wheel::RR),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Wheels<U> {
        Wheels {
            fl: f(&self.fl),
            fr: f(&self.fr),
            rl: f(&self.rl),
            rr: f(&self.rr),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Wheel, &T)> {
        Wheel::ALL.into_iter().map(move |w| (w, &self[w]))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Wheel, &mut T)> {
        [
            (Wheel::FL, &mut self.fl),
            (Wheel::FR, &mut self.fr),
            (Wheel::RL, &mut self.rl),
            (Wheel::RR, &mut self.rr),
        ]
        .into_iter()
    }
}

impl<T: Clone> Wheels<T> {
    pub fn splat(v: T) -> Self {
        Self { fl: v.clone(), fr: v.clone(), rl: v.clone(), rr: v }
    }
}

impl<T> Index<Wheel> for Wheels<T> {
    type Output = T;
    fn index(&self, w: Wheel) -> &T {
        match w {
            Wheel::FL => &self.fl,
            Wheel::FR => &self.fr,
            Wheel::RL => &self.rl,
            Wheel::RR => &self.rr,
        }
    }
}

impl<T> IndexMut<Wheel> for Wheels<T> {
    fn index_mut(&mut self, w: Wheel) -> &mut T {
        match w {
            Wheel::FL => &mut self.fl,
            Wheel::FR => &mut self.fr,
            Wheel::RL => &mut self.rl,
            Wheel::RR => &mut self.rr,
        }
    }
}

/// min/max/mean/std of a set of values. All NaN when the set was empty.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct StatsSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl StatsSummary {
    pub const EMPTY: StatsSummary = StatsSummary {
        min: f64::NAN,
        max: f64::NAN,
        mean: f64::NAN,
        std: f64::NAN,
    };

    pub fn is_empty(&self) -> bool {
        self.mean.is_nan()
    }
}

impl Default for StatsSummary {
    fn default() -> Self {
        Self::EMPTY
    }
}

pub type WheelsStats = Wheels<StatsSummary>;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Practice,
    Qualifying,
    Superpole,
    Race,
    Hotlap,
    Hotstint,
    HotlapSuperpole,
    Replay,
    #[default]
    Unknown,
}

impl SessionType {
    /// Pure timing modes never produce a lap whose fuel use is comparable.
    pub fn allows_fuel_laps(self) -> bool {
        !matches!(
            self,
            SessionType::Hotlap
                | SessionType::HotlapSuperpole
                | SessionType::Superpole
                | SessionType::Replay
        )
    }
}

#[derive(
    Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RainIntensity {
    #[default]
    None,
    Drizzle,
    Light,
    Medium,
    Heavy,
    Thunderstorm,
}

impl RainIntensity {
    pub fn is_wet(self) -> bool {
        self != RainIntensity::None
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackGrip {
    Green,
    Fast,
    #[default]
    Optimum,
    Greasy,
    Damp,
    Wet,
    Flooded,
}

impl TrackGrip {
    pub fn bucket(self) -> GripBucket {
        match self {
            TrackGrip::Green | TrackGrip::Fast | TrackGrip::Optimum => GripBucket::Dry,
            TrackGrip::Greasy => GripBucket::Greasy,
            TrackGrip::Damp | TrackGrip::Wet | TrackGrip::Flooded => GripBucket::Wet,
        }
    }
}

/// Coarse grip status used to group laps that are comparable.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GripBucket {
    Dry,
    Greasy,
    Wet,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Default)]
pub struct BrakeDucts {
    pub front: u8,
    pub rear: u8,
}

/// Everything persisted about one finished lap.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LapRecord {
    #[serde(with = "uuid::serde::simple")]
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub session_uid: String,
    pub session_type: SessionType,
    pub car: String,
    pub track: String,
    #[serde(with = "uuid::serde::simple")]
    pub stint_id: Uuid,
    pub stint_lap: u32,
    pub lap_time_s: f64,
    pub fuel_used: f64,
    pub valid_fuel_lap: bool,
    pub is_in_lap: bool,
    pub is_out_lap: bool,
    pub compound: String,
    pub brake_ducts: BrakeDucts,
    pub track_grip: TrackGrip,
    pub rain_intensity: RainIntensity,
    pub rain_changed: bool,
    pub ecu_map_changed: bool,
    #[serde(with = "nan_as_null")]
    pub air_temp_start: f64,
    #[serde(with = "nan_as_null")]
    pub air_temp_end: f64,
    #[serde(with = "nan_as_null")]
    pub track_temp_start: f64,
    #[serde(with = "nan_as_null")]
    pub track_temp_end: f64,
    pub wheels: Wheels<WheelLapData>,
}

impl LapRecord {
    /// Mean hot pressure with the lap's pressure loss added back.
    pub fn adjusted_avg_pressure(&self, wheel: Wheel) -> f64 {
        let w = &self.wheels[wheel];
        w.avg_pressure + w.pressure_loss
    }

    pub fn air_temp_drift(&self) -> f64 {
        (self.air_temp_end - self.air_temp_start).abs()
    }

    pub fn track_temp_drift(&self) -> f64 {
        (self.track_temp_end - self.track_temp_start).abs()
    }

    pub fn max_pressure_loss(&self) -> f64 {
        self.wheels
            .iter()
            .map(|(_, w)| w.pressure_loss)
            .fold(0.0_f64, f64::max)
    }

    pub fn any_pressure_loss_flagged(&self) -> bool {
        self.wheels.iter().any(|(_, w)| w.pressure_loss_flagged)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct WheelLapData {
    #[serde(with = "nan_as_null")]
    pub input_pressure: f64,
    #[serde(with = "nan_as_null")]
    pub avg_pressure: f64,
    pub pressure_loss: f64,
    pub pressure_loss_flagged: bool,
    #[serde(with = "nan_as_null")]
    pub avg_tyre_temp: f64,
    #[serde(with = "nan_as_null")]
    pub avg_brake_temp: f64,
}

impl Default for WheelLapData {
    fn default() -> Self {
        Self {
            input_pressure: f64::NAN,
            avg_pressure: f64::NAN,
            pressure_loss: 0.0,
            pressure_loss_flagged: false,
            avg_tyre_temp: f64::NAN,
            avg_brake_temp: f64::NAN,
        }
    }
}

/// Serializes NaN as `null` so records with unknown values survive JSON.
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            s.serialize_none()
        } else {
            s.serialize_some(v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

/// Lap time and fuel of a previously recorded valid lap.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct PrevLap {
    pub lap_time_s: f64,
    pub fuel_used: f64,
}

/// Features are `[1, adjusted_avg_pressure, air_temp, track_temp]`, the target
/// is the cold input pressure that produced them.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct TrainingRow {
    pub features: [f64; 4],
    pub target: f64,
}

impl TrainingRow {
    pub fn from_lap(lap: &LapRecord, wheel: Wheel) -> Self {
        Self {
            features: [
                1.0,
                lap.adjusted_avg_pressure(wheel),
                lap.air_temp_start,
                lap.track_temp_start,
            ],
            target: lap.wheels[wheel].input_pressure,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.target.is_finite() && self.features.iter().all(|f| f.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lap() -> LapRecord {
        LapRecord {
            id: Uuid::new_v4(),
            recorded_at: OffsetDateTime::UNIX_EPOCH,
            session_uid: "s1".into(),
            session_type: SessionType::Practice,
            car: "car".into(),
            track: "track".into(),
            stint_id: Uuid::new_v4(),
            stint_lap: 3,
            lap_time_s: 101.2,
            fuel_used: 2.7,
            valid_fuel_lap: true,
            is_in_lap: false,
            is_out_lap: false,
            compound: "dry".into(),
            brake_ducts: BrakeDucts { front: 2, rear: 3 },
            track_grip: TrackGrip::Optimum,
            rain_intensity: RainIntensity::None,
            rain_changed: false,
            ecu_map_changed: false,
            air_temp_start: 22.0,
            air_temp_end: 22.5,
            track_temp_start: 30.0,
            track_temp_end: 29.0,
            wheels: Wheels::from_fn(|w| WheelLapData {
                input_pressure: 20.5,
                avg_pressure: 27.0,
                pressure_loss: if w == Wheel::RR { 0.3 } else { 0.0 },
                pressure_loss_flagged: w == Wheel::RR,
                avg_tyre_temp: 80.0,
                avg_brake_temp: 400.0,
            }),
        }
    }

    #[test]
    fn wheels_index_matches_fields() {
        let w = Wheels::new(1, 2, 3, 4);
        assert_eq!(w[Wheel::FL], 1);
        assert_eq!(w[Wheel::RR], 4);
        let doubled = w.map(|v| v * 2);
        assert_eq!(doubled, Wheels::new(2, 4, 6, 8));
        assert_eq!(Wheel::RL.axle(), Axle::Rear);
    }

    #[test]
    fn training_row_adds_back_pressure_loss() {
        let lap = sample_lap();
        let row = TrainingRow::from_lap(&lap, Wheel::RR);
        assert_eq!(row.features[0], 1.0);
        assert!((row.features[1] - 27.3).abs() < 1e-9);
        assert_eq!(row.target, 20.5);
        assert!(lap.any_pressure_loss_flagged());
        assert!((lap.max_pressure_loss() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn lap_record_serializes() {
        let lap = sample_lap();
        let s = serde_json::to_string(&lap).unwrap();
        let back: LapRecord = serde_json::from_str(&s).unwrap();
        assert_eq!(back.id, lap.id);
        assert_eq!(back.wheels[Wheel::RR].pressure_loss, 0.3);
    }

    #[test]
    fn unknown_values_survive_json() {
        let mut lap = sample_lap();
        lap.wheels.fl.avg_brake_temp = f64::NAN;
        let s = serde_json::to_string(&lap).unwrap();
        let back: LapRecord = serde_json::from_str(&s).unwrap();
        assert!(back.wheels.fl.avg_brake_temp.is_nan());
    }

    #[test]
    fn grip_and_session_helpers() {
        assert_eq!(TrackGrip::Fast.bucket(), GripBucket::Dry);
        assert_eq!(TrackGrip::Flooded.bucket(), GripBucket::Wet);
        assert!(!SessionType::Hotlap.allows_fuel_laps());
        assert!(SessionType::Race.allows_fuel_laps());
        assert!(RainIntensity::Light.is_wet());
    }
}
