use serde::Serialize;
use time::{Date, OffsetDateTime};
use time_tz::Tz;
use valley_wx_core::Tuning;

use crate::{
    db::{iso_date, NowcastLogEntry, Observation},
    local_time::local_instant,
    observed::mean,
};

/// What the nowcaster needs to know about this morning, gathered ahead of time.
#[derive(Debug, Clone, PartialEq)]
pub struct NowcastContext {
    pub date: Date,
    pub station_id: String,
    pub local_hour: u8,
    /// Clean primary-station temperatures inside the morning window so far
    pub morning_temps: Vec<f64>,
}

impl NowcastContext {
    /// Collects the primary station's clean readings from the morning window
    /// of `date`, up to `now`.
    pub fn from_observations(
        station_id: &str,
        date: Date,
        local_hour: u8,
        observations: &[Observation],
        now: OffsetDateTime,
        zone: &Tz,
        tuning: &Tuning,
    ) -> Self {
        let start = local_instant(date, tuning.nowcast_window_start_hour.into(), zone);
        let end = local_instant(date, tuning.nowcast_window_end_hour.into(), zone).min(now);

        let morning_temps = observations
            .iter()
            .filter(|o| o.station_id == station_id)
            .filter(|o| o.observed_at >= start && o.observed_at < end)
            .filter_map(Observation::clean_temperature)
            .collect();

        Self {
            date,
            station_id: station_id.to_owned(),
            local_hour,
            morning_temps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowcastCorrection {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub station_id: String,
    pub observed_morning: f64,
    pub forecast_morning: f64,
    pub delta: f64,
    pub raw_adjustment: f64,
    pub adjustment: f64,
    pub raw_max: f64,
    pub corrected_max: f64,
}

impl NowcastCorrection {
    pub fn log_entry(&self) -> NowcastLogEntry {
        NowcastLogEntry {
            date: self.date,
            station_id: self.station_id.clone(),
            observed_morning: self.observed_morning,
            forecast_morning: self.forecast_morning,
            delta: self.delta,
            raw_adjustment: self.raw_adjustment,
            adjustment: self.adjustment,
            raw_max: self.raw_max,
            corrected_max: self.corrected_max,
        }
    }
}

/// Adjusts the bias-corrected maximum by how far this morning has run from
/// the temperature the forecast implies.
///
/// `raw_max` is the provider's forecast and `bias_applied` the bias already
/// subtracted from it. Returns `None` when gated off, too early, or short of
/// readings.
pub fn nowcast(
    context: &NowcastContext,
    raw_max: f64,
    bias_applied: f64,
    tuning: &Tuning,
) -> Option<NowcastCorrection> {
    if !tuning.nowcast_enabled {
        return None;
    }
    if context.local_hour < tuning.nowcast_window_start_hour {
        return None;
    }
    if context.morning_temps.len() < tuning.nowcast_min_readings {
        return None;
    }

    let observed_morning = mean(&context.morning_temps)?;
    let target = raw_max - bias_applied;
    let forecast_morning = target * tuning.nowcast_morning_ratio;
    let delta = observed_morning - forecast_morning;
    let raw_adjustment = tuning.nowcast_alpha * delta;
    let cap = tuning.max_nowcast_adjustment.abs();
    let adjustment = raw_adjustment.clamp(-cap, cap);

    let total_cap = tuning.max_total_correction.abs();
    let total = (target + adjustment - raw_max).clamp(-total_cap, total_cap);

    Some(NowcastCorrection {
        date: context.date,
        station_id: context.station_id.clone(),
        observed_morning,
        forecast_morning,
        delta,
        raw_adjustment,
        adjustment,
        raw_max,
        corrected_max: raw_max + total,
    })
}
