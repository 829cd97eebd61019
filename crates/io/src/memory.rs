use std::collections::HashMap;
use std::path::Path;

use model::{LapRecord, PrevLap, TrainingRow};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{
    files, HistoryStore, PrevSessionQuery, StoreError, TrainingFilter, TrainingQuery,
    WeatherBucket,
};

/// Lap history held in memory, insertion ordered (oldest first).
#[derive(Default)]
pub struct MemoryHistoryStore {
    laps: RwLock<Vec<LapRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_laps(laps: Vec<LapRecord>) -> Self {
        Self { laps: RwLock::new(laps) }
    }

    pub fn load_csv(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::from_laps(files::import_csv(path)?))
    }

    pub fn save_csv(&self, path: &Path) -> anyhow::Result<()> {
        files::export_csv(&self.laps.read(), path)
    }

    pub fn len(&self) -> usize {
        self.laps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.laps.read().is_empty()
    }

    pub fn laps(&self) -> Vec<LapRecord> {
        self.laps.read().clone()
    }
}

fn matches_query(lap: &LapRecord, q: &TrainingQuery) -> bool {
    lap.car == q.car
        && lap.track == q.track
        && lap.brake_ducts == q.brake_ducts
        && lap.compound == q.compound
        && match q.weather {
            WeatherBucket::Grip(g) => !lap.rain_intensity.is_wet() && lap.track_grip.bucket() == g,
            WeatherBucket::Rain(r) => lap.rain_intensity == r,
        }
}

/// Representative laps only: away from stint transients, no pressure loss,
/// stable ambient conditions, no rain change.
fn is_representative(lap: &LapRecord, f: &TrainingFilter, stint_len: u32) -> bool {
    lap.stint_lap > f.skip_first_laps
        && lap.stint_lap + f.skip_last_laps <= stint_len
        && !lap.is_in_lap
        && !lap.is_out_lap
        && lap.max_pressure_loss() < f.max_pressure_loss
        && !lap.any_pressure_loss_flagged()
        && lap.air_temp_drift() <= f.max_air_temp_drift
        && lap.track_temp_drift() <= f.max_track_temp_drift
        && !lap.rain_changed
}

impl HistoryStore for MemoryHistoryStore {
    fn prev_session_data(&self, q: &PrevSessionQuery) -> Result<Vec<PrevLap>, StoreError> {
        let laps = self.laps.read();
        Ok(laps
            .iter()
            .rev()
            .filter(|l| {
                l.car == q.car
                    && l.track == q.track
                    && l.valid_fuel_lap
                    && l.lap_time_s > 0.0
                    && l.track_grip.bucket() == q.grip
            })
            .take(q.limit)
            .map(|l| PrevLap { lap_time_s: l.lap_time_s, fuel_used: l.fuel_used })
            .collect())
    }

    fn input_pressure_training_data(
        &self,
        q: &TrainingQuery,
    ) -> Result<Vec<TrainingRow>, StoreError> {
        let laps = self.laps.read();
        let mut stint_len: HashMap<Uuid, u32> = HashMap::new();
        for l in laps.iter() {
            let e = stint_len.entry(l.stint_id).or_insert(0);
            *e = (*e).max(l.stint_lap);
        }
        let rows: Vec<TrainingRow> = laps
            .iter()
            .filter(|l| matches_query(l, q))
            .filter(|l| is_representative(l, &q.filter, stint_len[&l.stint_id]))
            .map(|l| TrainingRow::from_lap(l, q.wheel))
            .filter(TrainingRow::is_finite)
            .collect();
        debug!(wheel = ?q.wheel, car = %q.car, track = %q.track, rows = rows.len(), "training rows");
        Ok(rows)
    }

    fn insert_lap(&self, lap: LapRecord) -> Result<(), StoreError> {
        self.laps.write().push(lap);
        Ok(())
    }
}
