use log::{info, warn};
use time::{Date, Duration};
use valley_wx_core::Tuning;

use crate::{
    correction::{classify, detect_overnight_inversion, RegimeInputs},
    db::{DailySummary, Regime, StoreError, WeatherStore},
    local_time::{local_day_bounds, local_zone, overnight_bounds},
    observed::{calm_fraction, peak_gust, precip_total, solar_integral_mj, DayExtremes},
};

/// Builds and stores the primary station's summary of a completed local day,
/// including its regime. `None` when there is no primary station or it
/// reported nothing that day.
pub async fn summarize_day(
    store: &dyn WeatherStore,
    date: Date,
    tuning: &Tuning,
) -> Result<Option<DailySummary>, StoreError> {
    let Some(primary) = store.primary_station().await? else {
        warn!("no primary station, cannot summarize {}", date);
        return Ok(None);
    };
    let zone = local_zone(tuning);

    let (start, end) = local_day_bounds(date, zone);
    let day = store.observations_between(&primary.id, start, end).await?;
    if day.is_empty() {
        warn!("no observations at {} for {}, no summary", primary.id, date);
        return Ok(None);
    }
    let extremes = DayExtremes::from_observations(&day);

    let (night_start, night_end) = overnight_bounds(date, zone);
    let night = store.all_observations_between(night_start, night_end).await?;
    let stations = store.active_stations().await?;
    let overnight = detect_overnight_inversion(&stations, &night, tuning);
    let primary_night: Vec<_> = night
        .into_iter()
        .filter(|o| o.station_id == primary.id)
        .collect();

    let forecast_max = store
        .forecasts_for_date(date)
        .await?
        .into_iter()
        .find_map(|f| f.temp_max);

    let prior = store
        .daily_summaries_between(&primary.id, date - Duration::days(2), date - Duration::days(1))
        .await?;
    let day_before = prior.iter().find(|s| s.date == date - Duration::days(1));
    let two_days_before = prior.iter().find(|s| s.date == date - Duration::days(2));

    let mut summary = DailySummary {
        date,
        station_id: primary.id.clone(),
        temp_max: extremes.max,
        temp_min: extremes.min,
        precip_total: precip_total(&day),
        solar_integral_mj: solar_integral_mj(&day),
        peak_gust: peak_gust(&day),
        inversion_detected: overnight.is_some_and(|o| o.detected),
        inversion_strength: overnight.map(|o| o.strength),
        calm_night_fraction: calm_fraction(&primary_night),
        regime: Regime::All,
    };
    summary.regime = classify(&RegimeInputs {
        forecast_max,
        today: Some(&summary),
        prior: [day_before, two_days_before],
    });

    store.upsert_daily_summary(summary.clone()).await?;
    info!(
        "summarized {} at {}: max {:?} min {:?} regime {}",
        date,
        primary.id,
        summary.temp_max,
        summary.temp_min,
        summary.regime.as_str()
    );
    Ok(Some(summary))
}
