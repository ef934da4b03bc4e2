use std::collections::HashSet;

use log::{error, info, warn};
use time::{Date, OffsetDateTime};
use valley_wx_core::Tuning;

use crate::{
    db::{Source, StoreError, VerificationRecord, WeatherStore},
    local_time::{local_day_bounds, local_zone},
    observed::{peak_gust, precip_total, DayExtremes},
};

fn difference(forecast: Option<f64>, actual: Option<f64>) -> Option<f64> {
    Some(forecast? - actual?)
}

/// Scores each provider's newest forecast for a completed local day against
/// the primary station. Returns the number of records written.
///
/// A day that already has records is left alone. A failure storing one
/// provider's record is logged and the others still run, unless the
/// database connection itself is gone.
pub async fn verify(
    store: &dyn WeatherStore,
    valid_date: Date,
    tuning: &Tuning,
) -> Result<usize, StoreError> {
    if store.verification_exists(valid_date).await? {
        info!("verification for {} already exists, skipping", valid_date);
        return Ok(0);
    }

    let Some(primary) = store.primary_station().await? else {
        warn!("no primary station, cannot verify {}", valid_date);
        return Ok(0);
    };

    let (start, end) = local_day_bounds(valid_date, local_zone(tuning));
    let observations = store.observations_between(&primary.id, start, end).await?;
    let Some((actual_max, actual_min)) = DayExtremes::from_observations(&observations).both()
    else {
        warn!(
            "no observed extremes at {} for {}, skipping verification",
            primary.id, valid_date
        );
        return Ok(0);
    };
    let gust = peak_gust(&observations);
    let rain = precip_total(&observations);

    let forecasts = store.forecasts_for_date(valid_date).await?;
    let mut seen: HashSet<Source> = HashSet::new();
    let mut inserted = 0;

    for forecast in forecasts {
        // Newest fetch first, so the first one per source wins
        if !seen.insert(forecast.source) {
            continue;
        }

        let record = VerificationRecord {
            forecast_id: forecast.id,
            source: forecast.source,
            lead_day: forecast.lead_day,
            valid_date,
            forecast_max: forecast.temp_max,
            forecast_min: forecast.temp_min,
            actual_max,
            actual_min,
            bias_max: difference(forecast.temp_max, Some(actual_max)),
            bias_min: difference(forecast.temp_min, Some(actual_min)),
            bias_wind: difference(forecast.wind_speed, gust),
            bias_precip: difference(forecast.precip_amount, rain),
            created_at: OffsetDateTime::now_utc(),
        };

        match store.insert_verification(record).await {
            Ok(true) => {
                info!(
                    "verified {} forecast {} for {}: actual {:.1}/{:.1}",
                    forecast.source, forecast.id, valid_date, actual_max, actual_min
                );
                inserted += 1;
            }
            Ok(false) => {
                info!(
                    "verification for {} {} already recorded",
                    forecast.source, valid_date
                );
            }
            Err(e) if e.is_connection_loss() => return Err(e),
            Err(e) => {
                error!(
                    "failed to store verification for {} forecast {}: {}",
                    forecast.source, forecast.id, e
                );
            }
        }
    }

    Ok(inserted)
}
