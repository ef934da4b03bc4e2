//! Reductions over a station's observations. Only clean readings count.

use time::{Duration, OffsetDateTime};

use crate::db::Observation;

pub const TEMP_OUT_OF_RANGE: &str = "temp_out_of_range";
pub const HUMIDITY_OUT_OF_RANGE: &str = "humidity_out_of_range";

const MIN_PLAUSIBLE_TEMP: f64 = -40.0;
const MAX_PLAUSIBLE_TEMP: f64 = 55.0;

/// Wind below this (m/s) counts as calm
pub const CALM_WIND_SPEED: f64 = 1.5;
/// Rate of change (°C/h) below which the temperature is considered falling
pub const FALLING_TREND_RATE: f64 = -0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayExtremes {
    pub max: Option<f64>,
    pub min: Option<f64>,
}

impl DayExtremes {
    pub fn from_observations(observations: &[Observation]) -> Self {
        observations
            .iter()
            .filter_map(Observation::clean_temperature)
            .fold(DayExtremes::default(), |acc, temp| DayExtremes {
                max: Some(acc.max.map_or(temp, |m| m.max(temp))),
                min: Some(acc.min.map_or(temp, |m| m.min(temp))),
            })
    }

    pub fn both(&self) -> Option<(f64, f64)> {
        Some((self.max?, self.min?))
    }
}

/// Adds range-violation flags in place. Flags already present are kept.
pub fn flag_out_of_range(observation: &mut Observation) {
    let mut flags = vec![];
    if let Some(temp) = observation.temperature {
        if !(MIN_PLAUSIBLE_TEMP..=MAX_PLAUSIBLE_TEMP).contains(&temp) {
            flags.push(TEMP_OUT_OF_RANGE);
        }
    }
    if let Some(humidity) = observation.humidity {
        if !(0.0..=100.0).contains(&humidity) {
            flags.push(HUMIDITY_OUT_OF_RANGE);
        }
    }
    for flag in flags {
        if !observation.quality_flags.iter().any(|f| f == flag) {
            observation.quality_flags.push(flag.to_string());
        }
    }
}

/// Newest clean temperature at or after `not_before`.
pub fn latest_temperature(
    observations: &[Observation],
    not_before: OffsetDateTime,
) -> Option<f64> {
    observations
        .iter()
        .filter(|o| o.observed_at >= not_before)
        .filter_map(|o| o.clean_temperature().map(|t| (o.observed_at, t)))
        .max_by_key(|(at, _)| *at)
        .map(|(_, t)| t)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn peak_gust(observations: &[Observation]) -> Option<f64> {
    observations
        .iter()
        .filter(|o| o.is_clean())
        .filter_map(|o| o.wind_gust)
        .reduce(f64::max)
}

/// Day precipitation in mm: the highest running daily total, or the integral
/// of the rate when the station reports no totals.
pub fn precip_total(observations: &[Observation]) -> Option<f64> {
    let clean: Vec<&Observation> = observations.iter().filter(|o| o.is_clean()).collect();

    if let Some(total) = clean.iter().filter_map(|o| o.precip_total).reduce(f64::max) {
        return Some(total);
    }

    let samples: Vec<(OffsetDateTime, f64)> = clean
        .iter()
        .filter_map(|o| o.precip_rate.map(|r| (o.observed_at, r)))
        .collect();
    integrate(&samples, 3600.0)
}

/// Trapezoidal integral of W/m² samples, in MJ/m².
pub fn solar_integral_mj(observations: &[Observation]) -> Option<f64> {
    let samples: Vec<(OffsetDateTime, f64)> = observations
        .iter()
        .filter(|o| o.is_clean())
        .filter_map(|o| o.solar_radiation.map(|r| (o.observed_at, r)))
        .collect();
    integrate(&samples, 1.0).map(|joules| joules / 1_000_000.0)
}

/// Trapezoidal integral over time. `per_seconds` is the unit of the rate's
/// denominator (1 for per-second, 3600 for per-hour).
fn integrate(samples: &[(OffsetDateTime, f64)], per_seconds: f64) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|(at, _)| *at);

    let total = sorted
        .windows(2)
        .map(|pair| {
            let (t0, v0) = pair[0];
            let (t1, v1) = pair[1];
            let seconds = (t1 - t0).as_seconds_f64();
            (v0 + v1) / 2.0 * seconds / per_seconds
        })
        .sum();
    Some(total)
}

/// Fraction of readings with wind below [`CALM_WIND_SPEED`].
pub fn calm_fraction(observations: &[Observation]) -> Option<f64> {
    let speeds: Vec<f64> = observations
        .iter()
        .filter(|o| o.is_clean())
        .filter_map(|o| o.wind_speed)
        .collect();
    if speeds.is_empty() {
        return None;
    }
    let calm = speeds.iter().filter(|s| **s < CALM_WIND_SPEED).count();
    Some(calm as f64 / speeds.len() as f64)
}

/// Least-squares slope (°C/h) of clean temperatures over the hour before `now`.
pub fn temperature_trend(observations: &[Observation], now: OffsetDateTime) -> Option<f64> {
    let since = now - Duration::hours(1);
    let points: Vec<(f64, f64)> = observations
        .iter()
        .filter(|o| o.observed_at >= since && o.observed_at <= now)
        .filter_map(|o| {
            o.clean_temperature()
                .map(|t| ((o.observed_at - since).as_seconds_f64() / 3600.0, t))
        })
        .collect();

    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    Some(sxy / sxx)
}

pub fn is_falling(trend: Option<f64>) -> bool {
    trend.is_some_and(|rate| rate < FALLING_TREND_RATE)
}
