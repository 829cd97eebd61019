//! Per-wheel cold input pressure prediction for three weather regimes.
//!
//! Every regime × wheel slot holds at most one fitted [`RidgeRegressor`].
//! Refits run on worker threads; a finished fit comes back over a channel and
//! is swapped into its slot by [`PressurePredictor::poll`], which the owning
//! tick thread calls. Until then `predict` keeps using whatever the slot
//! already held.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use analysis::RidgeRegressor;
use crossbeam_channel::{unbounded, Receiver, Sender};
use history_io::{HistoryStore, TrainingFilter, TrainingQuery, WeatherBucket};
use ingest_core::{SourceCapabilities, TelemetrySample};
use model::{Axle, BrakeDucts, Wheel, Wheels};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Dry,
    /// Raining right now.
    NowWet,
    /// Rain forecast for the upcoming window.
    FutureWet,
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::Dry, Regime::NowWet, Regime::FutureWet];

    fn index(self) -> usize {
        match self {
            Regime::Dry => 0,
            Regime::NowWet => 1,
            Regime::FutureWet => 2,
        }
    }

    pub fn is_wet(self) -> bool {
        self != Regime::Dry
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub regularization: f64,
    /// Fewer rows than this and the slot stays empty.
    pub min_training_rows: usize,
    pub filter: TrainingFilter,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            regularization: analysis::ridge::DEFAULT_REGULARIZATION,
            min_training_rows: 4,
            filter: TrainingFilter::default(),
        }
    }
}

/// What a regressor was trained for. A slot whose key differs from the
/// regime's active key is due for a refit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefitKey {
    pub car: String,
    pub track: String,
    pub brake_ducts: BrakeDucts,
    pub compound: String,
    pub weather: WeatherBucket,
}

impl RefitKey {
    /// `None` when the regime does not apply to the current conditions.
    pub fn for_regime(
        regime: Regime,
        s: &TelemetrySample,
        caps: &SourceCapabilities,
    ) -> Option<Self> {
        if s.car.is_empty() || s.track.is_empty() {
            return None;
        }
        let weather = match regime {
            Regime::Dry => WeatherBucket::Grip(s.track_grip.bucket()),
            Regime::NowWet if s.rain_intensity.is_wet() => WeatherBucket::Rain(s.rain_intensity),
            Regime::FutureWet if caps.fields.rain_forecast && s.rain_forecast.is_wet() => {
                WeatherBucket::Rain(s.rain_forecast)
            }
            _ => return None,
        };
        Some(Self {
            car: s.car.clone(),
            track: s.track.clone(),
            brake_ducts: s.brake_ducts,
            compound: s.tyre_compound.clone(),
            weather,
        })
    }

    fn query(&self, wheel: Wheel, filter: TrainingFilter) -> TrainingQuery {
        TrainingQuery {
            wheel,
            car: self.car.clone(),
            track: self.track.clone(),
            brake_ducts: self.brake_ducts,
            compound: self.compound.clone(),
            weather: self.weather,
            filter,
        }
    }
}

#[derive(Default)]
struct Slot {
    regressor: Option<Arc<RidgeRegressor>>,
    fitted_for: Option<RefitKey>,
    in_flight: bool,
    /// New laps were recorded since the last refit started.
    stale_history: bool,
}

enum RefitOutcome {
    Fitted(Arc<RidgeRegressor>),
    NotEnoughData { rows: usize },
    /// Store or solver failure. The slot keeps its model only if that model
    /// was fitted for the same key.
    Failed,
}

struct RefitResult {
    regime: Regime,
    wheel: Wheel,
    key: RefitKey,
    outcome: RefitOutcome,
}

/// One background refit of a regime. Wheels not reported by the time the job
/// is dropped (error, panic, failed spawn) are reported as `Failed`, so the
/// in-flight flags are always cleared.
struct RefitJob {
    regime: Regime,
    key: RefitKey,
    pending: Vec<Wheel>,
    tx: Sender<RefitResult>,
}

impl RefitJob {
    fn report(&mut self, wheel: Wheel, outcome: RefitOutcome) {
        self.pending.retain(|w| *w != wheel);
        let _ = self.tx.send(RefitResult {
            regime: self.regime,
            wheel,
            key: self.key.clone(),
            outcome,
        });
    }

    fn run(mut self, store: &dyn HistoryStore, cfg: &PredictorConfig) {
        for wheel in self.pending.clone() {
            let outcome = fit_wheel(store, &self.key.query(wheel, cfg.filter), cfg);
            self.report(wheel, outcome);
        }
    }
}

impl Drop for RefitJob {
    fn drop(&mut self) {
        for wheel in std::mem::take(&mut self.pending) {
            let _ = self.tx.send(RefitResult {
                regime: self.regime,
                wheel,
                key: self.key.clone(),
                outcome: RefitOutcome::Failed,
            });
        }
    }
}

fn fit_wheel(store: &dyn HistoryStore, q: &TrainingQuery, cfg: &PredictorConfig) -> RefitOutcome {
    let rows = match store.input_pressure_training_data(q) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(wheel = ?q.wheel, error = %e, "training data unavailable");
            return RefitOutcome::Failed;
        }
    };
    if rows.len() < cfg.min_training_rows.max(1) {
        return RefitOutcome::NotEnoughData { rows: rows.len() };
    }
    let (x, y): (Vec<Vec<f64>>, Vec<f64>) =
        rows.iter().map(|r| (r.features.to_vec(), r.target)).unzip();
    match RidgeRegressor::train(x, y, cfg.regularization) {
        Ok(r) => RefitOutcome::Fitted(Arc::new(r)),
        Err(e) => {
            warn!(wheel = ?q.wheel, error = %e, "input pressure fit failed");
            RefitOutcome::Failed
        }
    }
}

pub struct PressurePredictor {
    store: Arc<dyn HistoryStore>,
    cfg: PredictorConfig,
    active: [Option<RefitKey>; 3],
    slots: [Wheels<Slot>; 3],
    results_tx: Sender<RefitResult>,
    results_rx: Receiver<RefitResult>,
}

impl PressurePredictor {
    pub fn new(store: Arc<dyn HistoryStore>, cfg: PredictorConfig) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            store,
            cfg,
            active: Default::default(),
            slots: Default::default(),
            results_tx,
            results_rx,
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.cfg
    }

    pub fn active_key(&self, regime: Regime) -> Option<&RefitKey> {
        self.active[regime.index()].as_ref()
    }

    pub fn has_regressor(&self, regime: Regime, wheel: Wheel) -> bool {
        self.slots[regime.index()][wheel].regressor.is_some()
    }

    pub fn is_refitting(&self, regime: Regime) -> bool {
        self.slots[regime.index()].iter().any(|(_, s)| s.in_flight)
    }

    /// Cold pressures that should hit the ideal hot pressures, NaN where the
    /// regime has no model yet or the ambient temperature is not valid.
    pub fn predict(
        &self,
        regime: Regime,
        air_temp: f64,
        track_temp: f64,
        ideal_front: f64,
        ideal_rear: f64,
    ) -> Wheels<f64> {
        // 0 °C air means the sim has not reported conditions yet
        if air_temp == 0.0 || !air_temp.is_finite() {
            return Wheels::splat(f64::NAN);
        }
        let slots = &self.slots[regime.index()];
        Wheels::from_fn(|wheel| {
            let Some(r) = &slots[wheel].regressor else {
                return f64::NAN;
            };
            let ideal = match wheel.axle() {
                Axle::Front => ideal_front,
                Axle::Rear => ideal_rear,
            };
            r.predict(&[ideal, air_temp, track_temp]).unwrap_or(f64::NAN)
        })
    }

    /// Applies every refit that finished since the last call. Never blocks.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        for res in self.results_rx.try_iter() {
            let idx = res.regime.index();
            let slot = &mut self.slots[idx][res.wheel];
            slot.in_flight = false;
            if self.active[idx].as_ref() != Some(&res.key) {
                debug!(regime = ?res.regime, wheel = ?res.wheel, "dropping stale refit");
                continue;
            }
            match res.outcome {
                RefitOutcome::Fitted(r) => {
                    info!(
                        regime = ?res.regime,
                        wheel = ?res.wheel,
                        rows = r.row_count(),
                        "input pressure model refitted"
                    );
                    slot.regressor = Some(r);
                    applied += 1;
                }
                RefitOutcome::NotEnoughData { rows } => {
                    debug!(regime = ?res.regime, wheel = ?res.wheel, rows, "not enough training laps");
                    slot.regressor = None;
                }
                RefitOutcome::Failed => {
                    if slot.fitted_for.as_ref() != Some(&res.key) {
                        slot.regressor = None;
                    }
                    // an empty slot retries on the next ensure
                    if slot.regressor.is_none() {
                        slot.stale_history = true;
                    }
                    warn!(
                        regime = ?res.regime,
                        wheel = ?res.wheel,
                        kept_model = slot.regressor.is_some(),
                        "input pressure refit failed"
                    );
                }
            }
            slot.fitted_for = Some(res.key);
        }
        applied
    }

    /// Makes `key` the regime's active key and starts a refit for every wheel
    /// whose model does not match it. A `None` key switches the regime off.
    pub fn ensure(&mut self, regime: Regime, key: Option<RefitKey>) {
        let idx = regime.index();
        let Some(key) = key else {
            if self.active[idx].take().is_some() {
                debug!(?regime, "regime inactive");
                for (_, slot) in self.slots[idx].iter_mut() {
                    slot.regressor = None;
                    slot.fitted_for = None;
                }
            }
            return;
        };
        if self.active[idx].as_ref() != Some(&key) {
            debug!(?regime, weather = ?key.weather, "regime key changed");
            self.active[idx] = Some(key.clone());
        }
        let due = Wheel::ALL.into_iter().any(|w| {
            let s = &self.slots[idx][w];
            !s.in_flight
                && (s.fitted_for.as_ref() != Some(&key) || (s.regressor.is_none() && s.stale_history))
        });
        if due {
            self.trigger_refit(regime, key);
        }
    }

    /// Starts a background refit of `regime` for `key` on every wheel that has
    /// no refit in flight. Returns false when all four already do.
    pub fn trigger_refit(&mut self, regime: Regime, key: RefitKey) -> bool {
        let idx = regime.index();
        let wheels: Vec<Wheel> = Wheel::ALL
            .into_iter()
            .filter(|w| !self.slots[idx][*w].in_flight)
            .collect();
        if wheels.is_empty() {
            debug!(?regime, "refit already in flight");
            return false;
        }
        for w in &wheels {
            let slot = &mut self.slots[idx][*w];
            slot.in_flight = true;
            slot.stale_history = false;
        }
        self.active[idx] = Some(key.clone());

        let job = RefitJob {
            regime,
            key,
            pending: wheels,
            tx: self.results_tx.clone(),
        };
        let store = Arc::clone(&self.store);
        let cfg = self.cfg;
        let spawned = thread::Builder::new()
            .name(format!("refit-{regime:?}").to_lowercase())
            .spawn(move || job.run(store.as_ref(), &cfg));
        if let Err(e) = spawned {
            // the job was dropped with the closure and reported its wheels
            warn!(?regime, error = %e, "could not spawn refit worker");
        }
        true
    }

    /// New laps reached the store; empty slots may now have enough data.
    pub fn mark_history_changed(&mut self) {
        for regime in &mut self.slots {
            for (_, slot) in regime.iter_mut() {
                slot.stale_history = true;
            }
        }
    }

    /// Forgets every model and active key. Refits still in flight finish in
    /// the background and are discarded as stale.
    pub fn reset(&mut self) {
        self.active = Default::default();
        for regime in &mut self.slots {
            for (_, slot) in regime.iter_mut() {
                slot.regressor = None;
                slot.fitted_for = None;
            }
        }
    }

    /// Polls until no refit is in flight or `timeout` elapses. Returns whether
    /// the predictor went idle. Blocking: for shutdown and tests only.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if !Regime::ALL.into_iter().any(|r| self.is_refitting(r)) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}
