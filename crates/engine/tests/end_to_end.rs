use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use engine::{EngineConfig, LiveEngine, Regime, TickOutcome};
use history_io::{
    HistoryStore, MemoryHistoryStore, PrevSessionQuery, StoreError, TrainingQuery,
};
use ingest_core::TelemetrySample;
use model::{
    BrakeDucts, LapRecord, PrevLap, RainIntensity, SessionType, TrackGrip, TrainingRow, Wheel,
    WheelLapData, Wheels,
};
use time::OffsetDateTime;
use uuid::Uuid;

fn on_track() -> TelemetrySample {
    TelemetrySample {
        session_uid: "practice-1".into(),
        car: "gt3".into(),
        track: "spa".into(),
        session_type: SessionType::Practice,
        speed_kph: 190.0,
        fuel: 104.0,
        air_temp: 20.0,
        track_temp: 28.0,
        tyre_pressure: Wheels::new(27.4, 27.5, 27.2, 27.3),
        tyre_temp: Wheels::splat(84.0),
        brake_temp: Wheels::splat(420.0),
        input_pressure: Wheels::splat(21.5),
        tyre_compound: "dry".into(),
        brake_ducts: BrakeDucts { front: 2, rear: 2 },
        session_time_left_s: 3600.0,
        ..TelemetrySample::default()
    }
}

struct Session {
    engine: LiveEngine,
    last: TelemetrySample,
    laps: Vec<LapRecord>,
}

impl Session {
    fn new(engine: LiveEngine, first: TelemetrySample) -> Self {
        let mut s = Self { engine, last: first.clone(), laps: vec![] };
        s.engine.update(first);
        s
    }

    fn tick(&mut self, f: impl FnOnce(&mut TelemetrySample)) -> TickOutcome {
        let mut cur = self.last.clone();
        cur.frame += 1;
        cur.sim_time_s += 1.0 / 60.0;
        f(&mut cur);
        self.last = cur.clone();
        let out = self.engine.update(cur);
        if let Some(lap) = &out.finished_lap {
            self.laps.push(lap.clone());
        }
        out
    }

    /// A few on-track ticks, then the line is crossed with `fuel` left.
    fn drive_lap(&mut self, fuel: f64) -> TickOutcome {
        for _ in 0..5 {
            self.tick(|_| {});
        }
        self.tick(|s| {
            s.completed_laps += 1;
            s.last_lap_time_s = 137.5;
            s.fuel = fuel;
        })
    }
}

fn memory_engine() -> LiveEngine {
    LiveEngine::new(EngineConfig::default(), Arc::new(MemoryHistoryStore::new()))
}

#[test]
fn fuel_per_lap_from_consecutive_laps() {
    let mut s = Session::new(memory_engine(), on_track());
    for fuel in [100.0, 92.0, 85.0, 80.0] {
        let out = s.drive_lap(fuel);
        assert!(out.state.lap_finished);
        assert!(!out.state.is_in_lap && !out.state.is_out_lap);
    }

    let fuel: Vec<f64> = s
        .engine
        .fuel_per_lap()
        .values()
        .filter(|v| !v.is_nan())
        .collect();
    assert_eq!(fuel, vec![5.0, 7.0, 8.0]);
    let stats = s.engine.fuel_per_lap().stats();
    assert_eq!(stats.count, 3);
    assert!((stats.mean - 20.0 / 3.0).abs() < 1e-9);

    let valid: Vec<bool> = s.laps.iter().map(|l| l.valid_fuel_lap).collect();
    assert_eq!(valid, vec![false, true, true, true]);
    assert_eq!(s.laps[1].fuel_used, 8.0);
    assert_eq!(s.laps[3].fuel_used, 5.0);
}

#[test]
fn finished_lap_record_carries_lap_statistics() {
    let mut s = Session::new(memory_engine(), on_track());
    s.drive_lap(100.0);
    s.tick(|t| {
        t.air_temp = 21.0;
        t.track_temp = 29.5;
    });
    let out = s.drive_lap(97.0);
    let lap = out.finished_lap.unwrap();

    assert_eq!(lap.stint_lap, 2);
    assert_eq!(lap.car, "gt3");
    assert_eq!(lap.compound, "dry");
    assert_eq!(lap.air_temp_start, 20.0);
    assert_eq!(lap.air_temp_end, 21.0);
    assert_eq!(lap.track_temp_end, 29.5);
    assert_eq!(lap.wheels.rl.avg_pressure, 27.2);
    assert_eq!(lap.wheels.fr.input_pressure, 21.5);
    assert_eq!(lap.wheels.fl.avg_brake_temp, 420.0);
    assert!(!lap.wheels.rr.pressure_loss_flagged);
    assert_eq!(lap.stint_id, s.laps[0].stint_id);

    let last = s.engine.last_lap_wheels();
    assert_eq!(last.pressure.rr.mean, 27.3);
    assert_eq!(last.pressure.rr.std, 0.0);
    assert_eq!(s.engine.lap_pressures(Wheel::RR).newest(), Some(27.3));
    assert_eq!(s.engine.lap_times().newest(), Some(137.5));
}

#[test]
fn in_lap_is_not_a_fuel_lap() {
    let mut s = Session::new(memory_engine(), on_track());
    s.drive_lap(100.0);
    let out = s.tick(|t| t.in_pit_lane = true);
    assert!(out.state.entered_pit_lane && out.state.is_in_lap);
    assert!(!out.state.valid_fuel_lap);

    let out = s.drive_lap(93.0);
    let lap = out.finished_lap.unwrap();
    assert!(lap.is_in_lap && !lap.valid_fuel_lap);
    assert!(!out.state.is_in_lap);
    assert!(s.engine.fuel_per_lap().values().all(f64::is_nan));

    // leaving the pits starts a new stint
    let first_stint = lap.stint_id;
    let out = s.tick(|t| t.in_pit_lane = false);
    assert!(out.state.new_stint && out.state.is_out_lap);
    let out = s.drive_lap(90.0);
    let out_lap = out.finished_lap.unwrap();
    assert!(out_lap.is_out_lap);
    assert_eq!(out_lap.stint_lap, 1);
    assert_ne!(out_lap.stint_id, first_stint);
}

fn history_lap(stint: Uuid, stint_lap: u32, air: f64, track: f64) -> LapRecord {
    let hot = 27.0 + stint_lap as f64 * 0.1;
    LapRecord {
        id: Uuid::new_v4(),
        recorded_at: OffsetDateTime::UNIX_EPOCH,
        session_uid: "old".into(),
        session_type: SessionType::Practice,
        car: "gt3".into(),
        track: "spa".into(),
        stint_id: stint,
        stint_lap,
        lap_time_s: 138.0 + stint_lap as f64 * 0.2,
        fuel_used: 2.9,
        valid_fuel_lap: true,
        is_in_lap: false,
        is_out_lap: false,
        compound: "dry".into(),
        brake_ducts: BrakeDucts { front: 2, rear: 2 },
        track_grip: TrackGrip::Optimum,
        rain_intensity: RainIntensity::None,
        rain_changed: false,
        ecu_map_changed: false,
        air_temp_start: air,
        air_temp_end: air,
        track_temp_start: track,
        track_temp_end: track,
        wheels: Wheels::splat(WheelLapData {
            input_pressure: 0.9 * hot - 0.05 * air - 0.02 * track,
            avg_pressure: hot,
            pressure_loss: 0.0,
            pressure_loss_flagged: false,
            avg_tyre_temp: 85.0,
            avg_brake_temp: 400.0,
        }),
    }
}

fn history() -> MemoryHistoryStore {
    let store = MemoryHistoryStore::new();
    for (air, track) in [(18.0, 24.0), (22.0, 30.0), (25.0, 35.0)] {
        let stint = Uuid::new_v4();
        for n in 1..=8 {
            store.insert_lap(history_lap(stint, n, air, track)).unwrap();
        }
    }
    store
}

/// Training queries wait for one token each; a refit can be held open for as
/// many ticks as a test likes.
struct GatedStore {
    inner: MemoryHistoryStore,
    tokens: Receiver<()>,
}

impl HistoryStore for GatedStore {
    fn prev_session_data(&self, q: &PrevSessionQuery) -> Result<Vec<PrevLap>, StoreError> {
        self.inner.prev_session_data(q)
    }

    fn input_pressure_training_data(
        &self,
        q: &TrainingQuery,
    ) -> Result<Vec<TrainingRow>, StoreError> {
        self.tokens
            .recv()
            .map_err(|_| StoreError::Unavailable("gate closed".into()))?;
        self.inner.input_pressure_training_data(q)
    }

    fn insert_lap(&self, lap: LapRecord) -> Result<(), StoreError> {
        self.inner.insert_lap(lap)
    }
}

fn release(tokens: &Sender<()>, n: usize) {
    for _ in 0..n {
        tokens.send(()).unwrap();
    }
}

#[test]
fn slow_refit_never_blocks_ticks() {
    let (tokens_tx, tokens) = unbounded();
    let store = Arc::new(GatedStore { inner: history(), tokens });
    let engine = LiveEngine::new(EngineConfig::default(), store);
    let mut s = Session::new(engine, on_track());

    // the dry refit is stuck in the store; ticks keep flowing
    for _ in 0..120 {
        s.tick(|_| {});
        assert!(s.engine.predictor().is_refitting(Regime::Dry));
        assert!(s.engine.predictions().dry.fl.is_nan());
    }

    release(&tokens_tx, 4);
    assert!(s.engine.settle(Duration::from_secs(5)));
    let fitted = s.engine.predictions().dry;
    for (_, v) in fitted.iter() {
        assert!(v.is_finite());
    }
    assert!((fitted.fl - (0.9 * 27.6 - 0.05 * 20.0 - 0.02 * 28.0)).abs() < 0.5);

    // new compound: the old model keeps answering until the refit lands
    for _ in 0..30 {
        s.tick(|t| t.tyre_compound = "wet".into());
        assert!(s.engine.predictor().is_refitting(Regime::Dry));
        assert_eq!(s.engine.predictions().dry, fitted);
    }

    release(&tokens_tx, 4);
    assert!(s.engine.settle(Duration::from_secs(5)));
    // nothing recorded on that compound yet
    assert!(s.engine.predictions().dry.fl.is_nan());
    assert!(!s.engine.predictor().is_refitting(Regime::Dry));
}

#[test]
fn rain_activates_wet_regime() {
    let (tokens_tx, tokens) = unbounded();
    let store = Arc::new(GatedStore { inner: history(), tokens });
    let mut s = Session::new(LiveEngine::new(EngineConfig::default(), store), on_track());
    assert!(!s.engine.predictor().is_refitting(Regime::NowWet));

    s.tick(|t| t.rain_intensity = RainIntensity::Light);
    assert!(s.engine.predictor().active_key(Regime::NowWet).is_some());
    assert!(s.engine.predictor().is_refitting(Regime::NowWet));
    assert!(s.engine.predictor().active_key(Regime::FutureWet).is_none());

    drop(tokens_tx);
    assert!(s.engine.settle(Duration::from_secs(5)));
    assert!(s.engine.predictions().now_wet.rl.is_nan());
}

#[test]
fn new_session_seeds_windows_from_history() {
    let store = Arc::new(history());
    let mut s = Session::new(LiveEngine::new(EngineConfig::default(), store), on_track());
    assert!(s.engine.settle(Duration::from_secs(5)));

    let lap_times: Vec<f64> = s.engine.lap_times().values().collect();
    assert_eq!(lap_times.len(), 10);
    assert!(lap_times.iter().all(|v| v.is_finite()));
    // newest stored lap is the last lap of the last stint
    assert!((lap_times[0] - 139.6).abs() < 1e-9);
    assert!((s.engine.fuel_per_lap().stats().mean - 2.9).abs() < 1e-9);

    // laps driven now go in front of the seeded ones
    s.drive_lap(100.0);
    s.drive_lap(97.0);
    assert_eq!(s.engine.fuel_per_lap().newest(), Some(3.0));
    assert_eq!(s.engine.lap_times().newest(), Some(137.5));

    // a different session resets and reseeds
    let out = s.tick(|t| {
        t.session_uid = "race-1".into();
        t.session_type = SessionType::Race;
        t.completed_laps = 0;
    });
    assert!(out.state.new_session && !out.state.new_event);
    assert!(s.engine.settle(Duration::from_secs(5)));
    assert_eq!(s.engine.fuel_per_lap().newest(), Some(2.9));
}
