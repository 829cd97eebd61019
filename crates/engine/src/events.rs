//! Turns consecutive telemetry samples into session, stint and lap events.
//!
//! Level signals (`in_pit_lane`, `moving`, ...) are recomputed every tick.
//! Edge signals (`entered_*`, `exited_*`, `lap_finished`, `new_*`) are true
//! for exactly one tick. Lap-scoped latches (`is_in_lap`, `is_out_lap`,
//! `*_changed_this_lap`) only clear on the next lap boundary, session-scoped
//! latches only on a new session.

use ingest_core::{SourceCapabilities, TelemetrySample};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventState {
    // levels
    pub in_menu: bool,
    pub in_pit_lane: bool,
    pub in_pit_box: bool,
    pub on_track: bool,
    pub moving: bool,
    pub ui_visible: bool,
    pub paused: bool,

    // edges
    pub entered_menu: bool,
    pub exited_menu: bool,
    pub entered_pit_lane: bool,
    pub exited_pit_lane: bool,
    pub entered_pit_box: bool,
    pub exited_pit_box: bool,
    pub lap_finished: bool,
    pub new_session: bool,
    pub new_event: bool,
    pub new_stint: bool,
    pub save_prev_lap: bool,

    // latches
    pub valid_fuel_lap: bool,
    pub time_limited_session: bool,
    pub lap_limited_session: bool,
    pub is_in_lap: bool,
    pub is_out_lap: bool,
    pub ecu_map_changed_this_lap: bool,
    pub rain_intensity_changed_this_lap: bool,

    /// 1-based lap within the current stint.
    pub stint_lap: u32,
    pub fuel_at_lap_start: f64,
    /// What the lap looked like when it ended; only set on `lap_finished`.
    pub finished_lap: Option<FinishedLap>,
}

/// Lap-scoped flags captured before the lap boundary clears them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FinishedLap {
    pub stint_lap: u32,
    pub lap_time_s: f64,
    pub fuel_at_start: f64,
    pub fuel_used: f64,
    pub valid_fuel_lap: bool,
    pub is_in_lap: bool,
    pub is_out_lap: bool,
    pub ecu_map_changed: bool,
    pub rain_changed: bool,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            in_menu: false,
            in_pit_lane: false,
            in_pit_box: false,
            on_track: false,
            moving: false,
            ui_visible: false,
            paused: false,
            entered_menu: false,
            exited_menu: false,
            entered_pit_lane: false,
            exited_pit_lane: false,
            entered_pit_box: false,
            exited_pit_box: false,
            lap_finished: false,
            new_session: false,
            new_event: false,
            new_stint: false,
            save_prev_lap: false,
            valid_fuel_lap: false,
            time_limited_session: false,
            lap_limited_session: false,
            is_in_lap: false,
            is_out_lap: false,
            ecu_map_changed_this_lap: false,
            rain_intensity_changed_this_lap: false,
            stint_lap: 1,
            fuel_at_lap_start: 0.0,
            finished_lap: None,
        }
    }
}

impl EventState {
    fn clear_edges(&mut self) {
        self.entered_menu = false;
        self.exited_menu = false;
        self.entered_pit_lane = false;
        self.exited_pit_lane = false;
        self.entered_pit_box = false;
        self.exited_pit_box = false;
        self.lap_finished = false;
        self.new_session = false;
        self.new_event = false;
        self.new_stint = false;
        self.save_prev_lap = false;
        self.finished_lap = None;
    }

    fn clear_lap_latches(&mut self) {
        self.is_in_lap = false;
        self.is_out_lap = false;
        self.ecu_map_changed_this_lap = false;
        self.rain_intensity_changed_this_lap = false;
    }
}

/// Raw per-sample levels, before any hysteresis.
#[derive(Clone, Copy)]
struct Levels {
    in_menu: bool,
    in_pit_lane: bool,
    in_pit_box: bool,
    moving: bool,
    ui_visible: bool,
}

pub struct EventStateMachine {
    caps: SourceCapabilities,
    state: EventState,
    limits_latched: bool,
}

impl EventStateMachine {
    pub fn new(caps: SourceCapabilities) -> Self {
        Self {
            caps,
            state: EventState::default(),
            limits_latched: false,
        }
    }

    pub fn state(&self) -> &EventState {
        &self.state
    }

    pub fn capabilities(&self) -> &SourceCapabilities {
        &self.caps
    }

    /// First sample of a run: always a new session.
    pub fn start(&mut self, first: &TelemetrySample) -> &EventState {
        self.advance(first, first, true)
    }

    pub fn update(&mut self, prev: &TelemetrySample, cur: &TelemetrySample) -> &EventState {
        self.advance(prev, cur, false)
    }

    fn levels(&self, s: &TelemetrySample) -> Levels {
        Levels {
            in_menu: self.caps.in_menu(s),
            in_pit_lane: s.in_pit_lane,
            in_pit_box: s.in_pit_box,
            moving: self.caps.is_moving(s),
            ui_visible: self.caps.ui_visible(s),
        }
    }

    fn advance(
        &mut self,
        prev: &TelemetrySample,
        cur: &TelemetrySample,
        force_new_session: bool,
    ) -> &EventState {
        let mut s = self.state.clone();
        s.clear_edges();
        if prev.is_malformed() || cur.is_malformed() {
            self.state = s;
            return &self.state;
        }

        let new_session = force_new_session || is_new_session(prev, cur);
        if new_session {
            let new_event = force_new_session || prev.car != cur.car || prev.track != cur.track;
            s = EventState {
                new_session: true,
                new_event,
                new_stint: true,
                ..EventState::default()
            };
            self.limits_latched = false;
            info!(
                session = %cur.session_uid,
                session_type = ?cur.session_type,
                car = %cur.car,
                track = %cur.track,
                new_event,
                "new session"
            );
        }

        let (was, now) = (self.levels(prev), self.levels(cur));
        s.in_menu = now.in_menu;
        s.in_pit_lane = now.in_pit_lane;
        s.in_pit_box = now.in_pit_box;
        s.moving = now.moving;
        s.ui_visible = now.ui_visible;
        s.paused = cur.is_paused;
        s.on_track = !s.in_pit_lane && !s.paused && s.ui_visible;

        if !new_session {
            s.entered_menu = !was.in_menu && now.in_menu;
            s.exited_menu = was.in_menu && !now.in_menu;
            s.entered_pit_lane = !was.in_pit_lane && now.in_pit_lane;
            s.exited_pit_lane = was.in_pit_lane && !now.in_pit_lane;
            s.entered_pit_box = !was.in_pit_box && now.in_pit_box;
            s.exited_pit_box = was.in_pit_box && !now.in_pit_box;
            s.lap_finished = prev.completed_laps < cur.completed_laps;
        }

        // time/laps left legitimately drop to zero at the very end
        if !self.limits_latched && (cur.session_time_left_s > 0.0 || cur.remaining_laps > 0) {
            s.time_limited_session = cur.session_time_left_s > 0.0;
            s.lap_limited_session = !s.time_limited_session && cur.remaining_laps > 0;
            self.limits_latched = true;
        }

        if s.lap_finished {
            self.finish_lap(&mut s, cur);
        }

        if s.in_pit_lane || s.in_menu {
            s.valid_fuel_lap = false;
        }
        if s.entered_pit_lane && (was.moving || now.moving) {
            s.is_in_lap = true;
        }
        if s.entered_menu && (was.moving || (was.ui_visible && !now.ui_visible)) {
            s.is_in_lap = true;
        }
        if s.exited_pit_lane || s.exited_menu {
            s.is_out_lap = true;
        }
        if !new_session && (s.exited_pit_lane || (s.exited_menu && !s.in_pit_lane)) {
            s.new_stint = true;
            s.stint_lap = 1;
            info!(frame = cur.frame, "new stint");
        }

        if !s.in_menu && !s.in_pit_lane && !new_session {
            if self.caps.fields.engine_map && prev.engine_map != cur.engine_map {
                s.ecu_map_changed_this_lap = true;
            }
            if prev.rain_intensity != cur.rain_intensity {
                s.rain_intensity_changed_this_lap = true;
            }
        }

        if s.entered_pit_lane || s.exited_pit_lane || s.entered_menu || s.exited_menu {
            debug!(
                frame = cur.frame,
                entered_pit_lane = s.entered_pit_lane,
                exited_pit_lane = s.exited_pit_lane,
                entered_menu = s.entered_menu,
                exited_menu = s.exited_menu,
                is_in_lap = s.is_in_lap,
                is_out_lap = s.is_out_lap,
                "pit/menu transition"
            );
        }

        self.state = s;
        &self.state
    }

    fn finish_lap(&self, s: &mut EventState, cur: &TelemetrySample) {
        let fuel_at_start = s.fuel_at_lap_start;
        s.save_prev_lap = cur.last_lap_time_s > 0.0
            && s.valid_fuel_lap
            && fuel_at_start != 0.0
            && fuel_at_start > cur.fuel
            && !s.is_in_lap
            && !s.is_out_lap;
        s.finished_lap = Some(FinishedLap {
            stint_lap: s.stint_lap,
            lap_time_s: cur.last_lap_time_s,
            fuel_at_start,
            fuel_used: if fuel_at_start != 0.0 {
                fuel_at_start - cur.fuel
            } else {
                f64::NAN
            },
            valid_fuel_lap: s.valid_fuel_lap,
            is_in_lap: s.is_in_lap,
            is_out_lap: s.is_out_lap,
            ecu_map_changed: s.ecu_map_changed_this_lap,
            rain_changed: s.rain_intensity_changed_this_lap,
        });

        s.clear_lap_latches();
        s.fuel_at_lap_start = cur.fuel;
        s.valid_fuel_lap = cur.session_type.allows_fuel_laps();
        s.stint_lap += 1;
    }
}

fn is_new_session(prev: &TelemetrySample, cur: &TelemetrySample) -> bool {
    prev.session_uid != cur.session_uid
        || prev.session_type != cur.session_type
        || prev.car != cur.car
        || prev.track != cur.track
        || cur.completed_laps < prev.completed_laps
}
