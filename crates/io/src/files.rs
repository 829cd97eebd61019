use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::{fs::File, path::Path};
use time::OffsetDateTime;
use uuid::Uuid;

use model::*;

pub fn import_csv(path: &Path) -> Result<Vec<LapRecord>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut laps = Vec::new();
    for rec in rdr.deserialize() {
        let r: CsvRow = rec?;
        laps.push(r.into_record()?);
    }
    Ok(laps)
}

pub fn export_csv(laps: &[LapRecord], path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    for l in laps {
        w.serialize(CsvRow::from_record(l)?)?;
    }
    w.flush()?;
    Ok(())
}

pub fn import_ndjson(path: &Path) -> Result<Vec<LapRecord>> {
    let f = File::open(path)?;
    let rdr = std::io::BufReader::new(f);
    let mut laps = vec![];
    for line in rdr.lines() {
        let s = line?;
        if s.trim().is_empty() {
            continue;
        }
        let l: LapRecord = serde_json::from_str(&s)?;
        laps.push(l);
    }
    Ok(laps)
}

pub fn export_ndjson(laps: &[LapRecord], path: &Path) -> Result<()> {
    let f = File::create(path)?;
    let mut w = std::io::BufWriter::new(f);
    for l in laps {
        let s = serde_json::to_string(l)?;
        writeln!(w, "{}", s)?;
    }
    w.flush()?;
    Ok(())
}

/// One lap per CSV line; per-wheel values are spread over `_fl/_fr/_rl/_rr`
/// columns.
#[derive(Serialize, Deserialize)]
struct CsvRow {
    id: String,
    recorded_at: String,
    session_uid: String,
    session_type: SessionType,
    car: String,
    track: String,
    stint_id: String,
    stint_lap: u32,
    lap_time_s: f64,
    fuel_used: f64,
    valid_fuel_lap: bool,
    is_in_lap: bool,
    is_out_lap: bool,
    compound: String,
    brake_duct_front: u8,
    brake_duct_rear: u8,
    track_grip: TrackGrip,
    rain_intensity: RainIntensity,
    rain_changed: bool,
    ecu_map_changed: bool,
    air_temp_start: f64,
    air_temp_end: f64,
    track_temp_start: f64,
    track_temp_end: f64,
    input_pressure_fl: f64, input_pressure_fr: f64, input_pressure_rl: f64, input_pressure_rr: f64,
    avg_pressure_fl: f64, avg_pressure_fr: f64, avg_pressure_rl: f64, avg_pressure_rr: f64,
    pressure_loss_fl: f64, pressure_loss_fr: f64, pressure_loss_rl: f64, pressure_loss_rr: f64,
    loss_flag_fl: bool, loss_flag_fr: bool, loss_flag_rl: bool, loss_flag_rr: bool,
    tyre_temp_fl: f64, tyre_temp_fr: f64, tyre_temp_rl: f64, tyre_temp_rr: f64,
    brake_temp_fl: f64, brake_temp_fr: f64, brake_temp_rl: f64, brake_temp_rr: f64,
}

impl CsvRow {
    fn from_record(l: &LapRecord) -> Result<Self> {
        let w = &l.wheels;
        Ok(Self {
            id: l.id.simple().to_string(),
            recorded_at: l.recorded_at.format(&time::format_description::well_known::Rfc3339)?,
            session_uid: l.session_uid.clone(),
            session_type: l.session_type,
            car: l.car.clone(),
            track: l.track.clone(),
            stint_id: l.stint_id.simple().to_string(),
            stint_lap: l.stint_lap,
            lap_time_s: l.lap_time_s,
            fuel_used: l.fuel_used,
            valid_fuel_lap: l.valid_fuel_lap,
            is_in_lap: l.is_in_lap,
            is_out_lap: l.is_out_lap,
            compound: l.compound.clone(),
            brake_duct_front: l.brake_ducts.front,
            brake_duct_rear: l.brake_ducts.rear,
            track_grip: l.track_grip,
            rain_intensity: l.rain_intensity,
            rain_changed: l.rain_changed,
            ecu_map_changed: l.ecu_map_changed,
            air_temp_start: l.air_temp_start,
            air_temp_end: l.air_temp_end,
            track_temp_start: l.track_temp_start,
            track_temp_end: l.track_temp_end,
            input_pressure_fl: w.fl.input_pressure, input_pressure_fr: w.fr.input_pressure,
            input_pressure_rl: w.rl.input_pressure, input_pressure_rr: w.rr.input_pressure,
            avg_pressure_fl: w.fl.avg_pressure, avg_pressure_fr: w.fr.avg_pressure,
            avg_pressure_rl: w.rl.avg_pressure, avg_pressure_rr: w.rr.avg_pressure,
            pressure_loss_fl: w.fl.pressure_loss, pressure_loss_fr: w.fr.pressure_loss,
            pressure_loss_rl: w.rl.pressure_loss, pressure_loss_rr: w.rr.pressure_loss,
            loss_flag_fl: w.fl.pressure_loss_flagged, loss_flag_fr: w.fr.pressure_loss_flagged,
            loss_flag_rl: w.rl.pressure_loss_flagged, loss_flag_rr: w.rr.pressure_loss_flagged,
            tyre_temp_fl: w.fl.avg_tyre_temp, tyre_temp_fr: w.fr.avg_tyre_temp,
            tyre_temp_rl: w.rl.avg_tyre_temp, tyre_temp_rr: w.rr.avg_tyre_temp,
            brake_temp_fl: w.fl.avg_brake_temp, brake_temp_fr: w.fr.avg_brake_temp,
            brake_temp_rl: w.rl.avg_brake_temp, brake_temp_rr: w.rr.avg_brake_temp,
        })
    }

    fn into_record(self) -> Result<LapRecord> {
        let wheel = |input_pressure, avg_pressure, pressure_loss, pressure_loss_flagged, avg_tyre_temp, avg_brake_temp| {
            WheelLapData { input_pressure, avg_pressure, pressure_loss, pressure_loss_flagged, avg_tyre_temp, avg_brake_temp }
        };
        Ok(LapRecord {
            id: Uuid::parse_str(&self.id)?,
            recorded_at: OffsetDateTime::parse(
                &self.recorded_at,
                &time::format_description::well_known::Rfc3339,
            )?,
            session_uid: self.session_uid,
            session_type: self.session_type,
            car: self.car,
            track: self.track,
            stint_id: Uuid::parse_str(&self.stint_id)?,
            stint_lap: self.stint_lap,
            lap_time_s: self.lap_time_s,
            fuel_used: self.fuel_used,
            valid_fuel_lap: self.valid_fuel_lap,
            is_in_lap: self.is_in_lap,
            is_out_lap: self.is_out_lap,
            compound: self.compound,
            brake_ducts: BrakeDucts { front: self.brake_duct_front, rear: self.brake_duct_rear },
            track_grip: self.track_grip,
            rain_intensity: self.rain_intensity,
            rain_changed: self.rain_changed,
            ecu_map_changed: self.ecu_map_changed,
            air_temp_start: self.air_temp_start,
            air_temp_end: self.air_temp_end,
            track_temp_start: self.track_temp_start,
            track_temp_end: self.track_temp_end,
            wheels: Wheels {
                fl: wheel(self.input_pressure_fl, self.avg_pressure_fl, self.pressure_loss_fl, self.loss_flag_fl, self.tyre_temp_fl, self.brake_temp_fl),
                fr: wheel(self.input_pressure_fr, self.avg_pressure_fr, self.pressure_loss_fr, self.loss_flag_fr, self.tyre_temp_fr, self.brake_temp_fr),
                rl: wheel(self.input_pressure_rl, self.avg_pressure_rl, self.pressure_loss_rl, self.loss_flag_rl, self.tyre_temp_rl, self.brake_temp_rl),
                rr: wheel(self.input_pressure_rr, self.avg_pressure_rr, self.pressure_loss_rr, self.loss_flag_rr, self.tyre_temp_rr, self.brake_temp_rr),
            },
        })
    }
}
