use std::collections::HashMap;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use valley_wx_core::Tuning;

use crate::{
    db::{ElevationTier, Observation, Station},
    observed::mean,
};

/// Dry adiabatic lapse rate, °C per 1000 m
pub const LAPSE_RATE_PER_KM: f64 = 6.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InversionState {
    pub active: bool,
    /// Observed upper-minus-valley difference beyond the expected lapse
    pub strength: f64,
    pub valley_mean: f64,
    pub mid_slope_mean: Option<f64>,
    pub upper_mean: f64,
    pub expected_lapse: f64,
    pub actual_difference: f64,
    pub stations_used: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OvernightInversion {
    pub detected: bool,
    /// Upper-tier minimum minus valley-tier minimum
    pub strength: f64,
}

#[derive(Default)]
struct TierSamples {
    temps: Vec<f64>,
    elevations: Vec<f64>,
}

/// Live inversion state from the newest reading of each station.
///
/// Readings older than the staleness limit are ignored. `None` unless at
/// least one valley-floor and one upper station have a fresh clean reading.
pub fn detect_inversion(
    stations: &[Station],
    latest: &[Observation],
    now: OffsetDateTime,
    tuning: &Tuning,
) -> Option<InversionState> {
    let fresh_after = now - Duration::minutes(tuning.stale_observation_minutes);
    let by_id: HashMap<&str, &Station> = stations
        .iter()
        .filter(|s| s.active)
        .map(|s| (s.id.as_str(), s))
        .collect();

    let mut tiers: HashMap<ElevationTier, TierSamples> = HashMap::new();
    let mut stations_used = 0;
    for obs in latest.iter().filter(|o| o.observed_at >= fresh_after) {
        let (Some(station), Some(temp)) = (by_id.get(obs.station_id.as_str()), obs.clean_temperature())
        else {
            continue;
        };
        let samples = tiers.entry(station.tier).or_default();
        samples.temps.push(temp);
        samples.elevations.push(station.elevation_m);
        stations_used += 1;
    }

    let valley = tiers.get(&ElevationTier::ValleyFloor)?;
    let upper = tiers.get(&ElevationTier::Upper)?;

    let valley_mean = mean(&valley.temps)?;
    let upper_mean = mean(&upper.temps)?;
    let rise_m = mean(&upper.elevations)? - mean(&valley.elevations)?;
    let expected_lapse = rise_m / 1000.0 * LAPSE_RATE_PER_KM;
    let actual_difference = upper_mean - valley_mean;
    let strength = actual_difference - expected_lapse;

    Some(InversionState {
        active: strength > tuning.inversion_strength_threshold,
        strength,
        valley_mean,
        mid_slope_mean: tiers
            .get(&ElevationTier::MidSlope)
            .and_then(|mid| mean(&mid.temps)),
        upper_mean,
        expected_lapse,
        actual_difference,
        stations_used,
    })
}

/// Overnight variant: compares tier minima over a night window of readings.
pub fn detect_overnight_inversion(
    stations: &[Station],
    night: &[Observation],
    tuning: &Tuning,
) -> Option<OvernightInversion> {
    let tiers: HashMap<&str, ElevationTier> =
        stations.iter().map(|s| (s.id.as_str(), s.tier)).collect();

    let tier_min = |wanted: ElevationTier| {
        night
            .iter()
            .filter(|o| tiers.get(o.station_id.as_str()) == Some(&wanted))
            .filter_map(Observation::clean_temperature)
            .reduce(f64::min)
    };

    let strength = tier_min(ElevationTier::Upper)? - tier_min(ElevationTier::ValleyFloor)?;
    Some(OvernightInversion {
        detected: strength > tuning.overnight_inversion_threshold,
        strength,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn station(id: &str, tier: ElevationTier, elevation_m: f64) -> Station {
        Station {
            id: id.to_string(),
            name: id.to_string(),
            latitude: -36.7,
            longitude: 146.9,
            elevation_m,
            tier,
            is_primary: false,
            active: true,
        }
    }

    fn valley_stations() -> Vec<Station> {
        vec![
            station("FLOOR1", ElevationTier::ValleyFloor, 300.0),
            station("FLOOR2", ElevationTier::ValleyFloor, 320.0),
            station("MID", ElevationTier::MidSlope, 650.0),
            station("TOP", ElevationTier::Upper, 1310.0),
        ]
    }

    fn reading(station_id: &str, at: OffsetDateTime, temp: f64) -> Observation {
        let mut obs = Observation::new(station_id, at);
        obs.temperature = Some(temp);
        obs
    }

    #[test]
    fn modest_ridge_warming_is_below_threshold() {
        let now = datetime!(2024-06-10 22:00 UTC);
        let latest = vec![
            reading("FLOOR1", now, 1.0),
            reading("FLOOR2", now, 3.0),
            reading("MID", now, 5.0),
            reading("TOP", now, 4.0),
        ];
        let state = detect_inversion(&valley_stations(), &latest, now, &Tuning::default()).unwrap();
        // 1000 m rise expects 6.5 °C cooling, observed 2 °C warming
        assert!((state.expected_lapse - 6.5).abs() < 1e-9);
        assert!((state.actual_difference - 2.0).abs() < 1e-9);
        assert!((state.strength - -4.5).abs() < 1e-9);
        assert!(!state.active);
        assert_eq!(state.mid_slope_mean, Some(5.0));
        assert_eq!(state.stations_used, 4);
    }

    #[test]
    fn strength_above_threshold_is_active() {
        let now = datetime!(2024-06-10 22:00 UTC);
        let stations = vec![
            station("FLOOR1", ElevationTier::ValleyFloor, 300.0),
            station("TOP", ElevationTier::Upper, 300.0),
        ];
        let latest = vec![reading("FLOOR1", now, 2.0), reading("TOP", now, 4.5)];
        let state = detect_inversion(&stations, &latest, now, &Tuning::default()).unwrap();
        assert!(state.active);
        assert!((state.strength - 2.5).abs() < 1e-9);
    }

    #[test]
    fn stale_or_missing_tiers_are_undefined() {
        let now = datetime!(2024-06-10 22:00 UTC);
        let latest = vec![
            reading("FLOOR1", now, 1.0),
            reading("TOP", now - Duration::minutes(61), 4.0),
        ];
        assert_eq!(
            detect_inversion(&valley_stations(), &latest, now, &Tuning::default()),
            None
        );
    }

    #[test]
    fn overnight_compares_tier_minima() {
        let night_start = datetime!(2024-06-10 9:00 UTC);
        let night = vec![
            reading("FLOOR1", night_start, 4.0),
            reading("FLOOR1", night_start + Duration::hours(8), -1.5),
            reading("TOP", night_start, 5.0),
            reading("TOP", night_start + Duration::hours(8), 1.0),
            reading("MID", night_start, -4.0),
        ];
        let found = detect_overnight_inversion(&valley_stations(), &night, &Tuning::default()).unwrap();
        assert!(found.detected);
        assert!((found.strength - 2.5).abs() < 1e-9);

        let only_floor = &night[..2];
        assert_eq!(
            detect_overnight_inversion(&valley_stations(), only_floor, &Tuning::default()),
            None
        );
    }
}
