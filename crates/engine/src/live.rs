//! Per-tick orchestration: feeds samples through the event state machine,
//! accumulates lap statistics and keeps the pressure models current.
//!
//! Everything here runs on the tick thread and never waits. History reads
//! happen on short-lived worker threads whose results are drained at the
//! start of the next tick.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use analysis::{BoundedStatsWindow, OutlierPolicy, RunningWheelStats, WindowStats};
use crossbeam_channel::{unbounded, Receiver, Sender};
use history_io::{HistoryStore, PrevSessionQuery};
use ingest_core::{SourceCapabilities, TelemetrySample};
use model::{LapRecord, PrevLap, Wheel, WheelLapData, Wheels, WheelsStats};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::events::{EventState, EventStateMachine, FinishedLap};
use crate::predictor::{PressurePredictor, RefitKey, Regime};

#[derive(Clone, Debug)]
pub struct TickOutcome {
    pub state: EventState,
    /// Set on the tick a lap finished. Persisting it is up to the caller.
    pub finished_lap: Option<LapRecord>,
}

/// Per-wheel statistics of the last completed lap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LapWheelStats {
    pub pressure: WheelsStats,
    pub tyre_temp: WheelsStats,
    pub brake_temp: WheelsStats,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Predictions {
    pub dry: Wheels<f64>,
    pub now_wet: Wheels<f64>,
    pub future_wet: Wheels<f64>,
}

impl Predictions {
    pub fn get(&self, regime: Regime) -> &Wheels<f64> {
        match regime {
            Regime::Dry => &self.dry,
            Regime::NowWet => &self.now_wet,
            Regime::FutureWet => &self.future_wet,
        }
    }
}

/// Everything a display polls, in one serializable value.
#[derive(Clone, Debug, Serialize)]
pub struct EngineSnapshot {
    pub state: EventState,
    pub lap_times: WindowStats,
    pub fuel_per_lap: WindowStats,
    pub lap_pressures: Wheels<WindowStats>,
    pub lap_temps: Wheels<WindowStats>,
    pub last_lap: LapWheelStats,
    pub predictions: Predictions,
}

/// Samples of the lap in progress.
struct LapAccumulator {
    pressure: RunningWheelStats,
    tyre_temp: RunningWheelStats,
    brake_temp: RunningWheelStats,
    pressure_loss: Wheels<f64>,
    loss_flagged: Wheels<bool>,
    air_temp_start: f64,
    track_temp_start: f64,
}

impl LapAccumulator {
    fn new() -> Self {
        Self {
            pressure: RunningWheelStats::new(),
            tyre_temp: RunningWheelStats::new(),
            brake_temp: RunningWheelStats::new(),
            pressure_loss: Wheels::splat(0.0),
            loss_flagged: Wheels::splat(false),
            air_temp_start: f64::NAN,
            track_temp_start: f64::NAN,
        }
    }

    fn start(&mut self, s: &TelemetrySample) {
        *self = Self::new();
        self.air_temp_start = s.air_temp;
        self.track_temp_start = s.track_temp;
    }

    fn ingest(&mut self, prev: &TelemetrySample, cur: &TelemetrySample, caps: &SourceCapabilities) {
        self.pressure.update(&cur.tyre_pressure);
        self.tyre_temp.update(&cur.tyre_temp);
        if caps.fields.brake_temp {
            self.brake_temp.update(&cur.brake_temp);
        }
        for w in Wheel::ALL {
            let (before, now) = (prev.tyre_pressure[w], cur.tyre_pressure[w]);
            if !(before > 0.0 && now > 0.0) {
                continue;
            }
            let drop = before - now;
            if drop > caps.pressure_loss_threshold {
                if !self.loss_flagged[w] {
                    debug!(wheel = ?w, drop, "pressure loss");
                }
                self.loss_flagged[w] = true;
                self.pressure_loss[w] += drop;
            }
        }
    }

    fn wheel_stats(&self) -> LapWheelStats {
        LapWheelStats {
            pressure: self.pressure.snapshot(),
            tyre_temp: self.tyre_temp.snapshot(),
            brake_temp: self.brake_temp.snapshot(),
        }
    }
}

struct SeedResult {
    generation: u64,
    laps: Vec<PrevLap>,
}

pub struct LiveEngine {
    cfg: EngineConfig,
    caps: SourceCapabilities,
    store: Arc<dyn HistoryStore>,
    events: EventStateMachine,
    predictor: PressurePredictor,
    prev: Option<TelemetrySample>,
    lap: LapAccumulator,
    last_lap: LapWheelStats,
    lap_times: BoundedStatsWindow,
    fuel_per_lap: BoundedStatsWindow,
    lap_pressures: Wheels<BoundedStatsWindow>,
    lap_temps: Wheels<BoundedStatsWindow>,
    stint_id: Uuid,
    generation: u64,
    seed_pending: bool,
    seed_tx: Sender<SeedResult>,
    seed_rx: Receiver<SeedResult>,
}

impl LiveEngine {
    pub fn new(cfg: EngineConfig, store: Arc<dyn HistoryStore>) -> Self {
        let caps = cfg.capabilities();
        let n = cfg.window_capacity;
        let (seed_tx, seed_rx) = unbounded();
        Self {
            events: EventStateMachine::new(caps.clone()),
            predictor: PressurePredictor::new(Arc::clone(&store), cfg.predictor),
            lap_times: BoundedStatsWindow::new(n, OutlierPolicy::Upper),
            fuel_per_lap: BoundedStatsWindow::new(n, OutlierPolicy::WidePlus1),
            lap_pressures: Wheels::from_fn(|_| BoundedStatsWindow::new(n, OutlierPolicy::Both)),
            lap_temps: Wheels::from_fn(|_| BoundedStatsWindow::new(n, OutlierPolicy::Both)),
            prev: None,
            lap: LapAccumulator::new(),
            last_lap: LapWheelStats::default(),
            stint_id: Uuid::new_v4(),
            generation: 0,
            seed_pending: false,
            seed_tx,
            seed_rx,
            caps,
            store,
            cfg,
        }
    }

    pub fn update(&mut self, sample: TelemetrySample) -> TickOutcome {
        self.predictor.poll();
        self.drain_seeds();

        // a malformed sample never becomes the previous one
        if sample.is_malformed() {
            debug!(frame = sample.frame, "malformed sample ignored");
            let state = match &self.prev {
                Some(prev) => self.events.update(prev, &sample).clone(),
                None => self.events.state().clone(),
            };
            return TickOutcome { state, finished_lap: None };
        }

        let prev = self.prev.take();
        let state = match &prev {
            None => self.events.start(&sample).clone(),
            Some(p) => self.events.update(p, &sample).clone(),
        };

        if state.new_session {
            self.begin_session(&sample);
        }

        let mut finished_lap = None;
        match (&state.finished_lap, &prev) {
            (Some(fl), Some(p)) => finished_lap = Some(self.finish_lap(fl, &state, p, &sample)),
            (None, Some(p)) if state.on_track && state.moving && !state.new_session => {
                self.lap.ingest(p, &sample, &self.caps)
            }
            _ => {}
        }

        if state.new_stint && !state.new_session {
            self.stint_id = Uuid::new_v4();
        }

        if !state.in_menu {
            for regime in Regime::ALL {
                let key = RefitKey::for_regime(regime, &sample, &self.caps);
                self.predictor.ensure(regime, key);
            }
        }

        self.prev = Some(sample);
        TickOutcome { state, finished_lap }
    }

    fn begin_session(&mut self, s: &TelemetrySample) {
        self.generation += 1;
        self.stint_id = Uuid::new_v4();
        self.lap.start(s);
        self.last_lap = LapWheelStats::default();
        self.lap_times.fill(f64::NAN);
        self.fuel_per_lap.fill(f64::NAN);
        for (_, w) in self.lap_pressures.iter_mut() {
            w.fill(f64::NAN);
        }
        for (_, w) in self.lap_temps.iter_mut() {
            w.fill(f64::NAN);
        }
        self.predictor.reset();

        let query = PrevSessionQuery {
            car: s.car.clone(),
            track: s.track.clone(),
            limit: self.cfg.window_capacity,
            grip: s.track_grip.bucket(),
        };
        let store = Arc::clone(&self.store);
        let tx = self.seed_tx.clone();
        let generation = self.generation;
        self.seed_pending = true;
        let spawned = thread::Builder::new()
            .name("history-seed".into())
            .spawn(move || {
                let laps = store.prev_session_data(&query).unwrap_or_else(|e| {
                    warn!(error = %e, "no prior session data");
                    Vec::new()
                });
                let _ = tx.send(SeedResult { generation, laps });
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn history seed worker");
            self.seed_pending = false;
        }
    }

    fn drain_seeds(&mut self) {
        while let Ok(seed) = self.seed_rx.try_recv() {
            self.apply_seed(seed);
        }
    }

    /// Prior-session laps go behind whatever this session already recorded.
    fn apply_seed(&mut self, seed: SeedResult) {
        if seed.generation != self.generation {
            return;
        }
        self.seed_pending = false;
        if seed.laps.is_empty() {
            return;
        }
        debug!(laps = seed.laps.len(), "seeding lap windows from history");
        seed_window(&mut self.lap_times, seed.laps.iter().map(|l| l.lap_time_s));
        seed_window(&mut self.fuel_per_lap, seed.laps.iter().map(|l| l.fuel_used));
    }

    fn finish_lap(
        &mut self,
        fl: &FinishedLap,
        state: &EventState,
        prev: &TelemetrySample,
        cur: &TelemetrySample,
    ) -> LapRecord {
        let stats = self.lap.wheel_stats();
        let fields = self.caps.fields;
        let record = LapRecord {
            id: Uuid::new_v4(),
            recorded_at: OffsetDateTime::now_utc(),
            session_uid: cur.session_uid.clone(),
            session_type: cur.session_type,
            car: cur.car.clone(),
            track: cur.track.clone(),
            stint_id: self.stint_id,
            stint_lap: fl.stint_lap,
            lap_time_s: fl.lap_time_s,
            fuel_used: fl.fuel_used,
            valid_fuel_lap: state.save_prev_lap,
            is_in_lap: fl.is_in_lap,
            is_out_lap: fl.is_out_lap,
            compound: prev.tyre_compound.clone(),
            brake_ducts: prev.brake_ducts,
            track_grip: prev.track_grip,
            rain_intensity: prev.rain_intensity,
            rain_changed: fl.rain_changed,
            ecu_map_changed: fl.ecu_map_changed,
            air_temp_start: self.lap.air_temp_start,
            air_temp_end: cur.air_temp,
            track_temp_start: self.lap.track_temp_start,
            track_temp_end: cur.track_temp,
            wheels: Wheels::from_fn(|w| WheelLapData {
                input_pressure: if fields.input_pressure {
                    prev.input_pressure[w]
                } else {
                    f64::NAN
                },
                avg_pressure: stats.pressure[w].mean,
                pressure_loss: self.lap.pressure_loss[w],
                pressure_loss_flagged: self.lap.loss_flagged[w],
                avg_tyre_temp: stats.tyre_temp[w].mean,
                avg_brake_temp: stats.brake_temp[w].mean,
            }),
        };

        if fl.lap_time_s > 0.0 && !fl.is_in_lap && !fl.is_out_lap {
            self.lap_times.push_front(fl.lap_time_s);
        }
        if state.save_prev_lap {
            self.fuel_per_lap.push_front(fl.fuel_used);
        }
        if self.lap.pressure.count() > 0 {
            for w in Wheel::ALL {
                self.lap_pressures[w].push_front(stats.pressure[w].mean);
                self.lap_temps[w].push_front(stats.tyre_temp[w].mean);
            }
        }
        self.last_lap = stats;
        self.lap.start(cur);
        self.predictor.mark_history_changed();

        info!(
            stint_lap = fl.stint_lap,
            lap_time_s = fl.lap_time_s,
            fuel_used = fl.fuel_used,
            valid_fuel_lap = state.save_prev_lap,
            in_lap = fl.is_in_lap,
            out_lap = fl.is_out_lap,
            "lap finished"
        );
        record
    }

    pub fn state(&self) -> &EventState {
        self.events.state()
    }

    pub fn capabilities(&self) -> &SourceCapabilities {
        &self.caps
    }

    pub fn stint_id(&self) -> Uuid {
        self.stint_id
    }

    pub fn last_lap_wheels(&self) -> &LapWheelStats {
        &self.last_lap
    }

    pub fn lap_times(&self) -> &BoundedStatsWindow {
        &self.lap_times
    }

    pub fn fuel_per_lap(&self) -> &BoundedStatsWindow {
        &self.fuel_per_lap
    }

    pub fn lap_pressures(&self, wheel: Wheel) -> &BoundedStatsWindow {
        &self.lap_pressures[wheel]
    }

    pub fn lap_temps(&self, wheel: Wheel) -> &BoundedStatsWindow {
        &self.lap_temps[wheel]
    }

    pub fn predictor(&self) -> &PressurePredictor {
        &self.predictor
    }

    /// Predicted cold pressures for all regimes under the latest conditions.
    pub fn predictions(&self) -> Predictions {
        let (air, track) = self
            .prev
            .as_ref()
            .map_or((f64::NAN, f64::NAN), |s| (s.air_temp, s.track_temp));
        let predict = |regime| {
            let ideal = self.cfg.ideal_pressure.for_regime(regime);
            self.predictor
                .predict(regime, air, track, ideal.front, ideal.rear)
        };
        Predictions {
            dry: predict(Regime::Dry),
            now_wet: predict(Regime::NowWet),
            future_wet: predict(Regime::FutureWet),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state().clone(),
            lap_times: *self.lap_times.stats(),
            fuel_per_lap: *self.fuel_per_lap.stats(),
            lap_pressures: self.lap_pressures.map(|w| *w.stats()),
            lap_temps: self.lap_temps.map(|w| *w.stats()),
            last_lap: self.last_lap,
            predictions: self.predictions(),
        }
    }

    /// Blocks until history seeding and background refits settle. Shutdown
    /// and tests only.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.seed_pending {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.seed_rx.recv_timeout(left) {
                Ok(seed) => self.apply_seed(seed),
                Err(_) => break,
            }
        }
        let idle = self
            .predictor
            .wait_idle(deadline.saturating_duration_since(Instant::now()));
        idle && !self.seed_pending
    }
}

fn seed_window(window: &mut BoundedStatsWindow, prior_newest_first: impl Iterator<Item = f64>) {
    let current: Vec<f64> = window.values().filter(|v| !v.is_nan()).collect();
    let prior: Vec<f64> = prior_newest_first.collect();
    window.fill(f64::NAN);
    for v in prior.into_iter().rev().chain(current.into_iter().rev()) {
        window.push_front(v);
    }
}
