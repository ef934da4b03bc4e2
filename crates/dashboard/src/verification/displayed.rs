use log::{info, warn};
use serde::Serialize;
use time::{Date, Duration};
use valley_wx_core::Tuning;

use crate::{
    db::{DisplayedVerification, StoreError, WeatherStore},
    local_time::{local_day_bounds, local_zone},
    observed::{mean, DayExtremes},
};

/// Scores what the dashboard actually displayed for a completed local day.
/// Returns the number of new rows; rows already scored are left as they are.
pub async fn verify_displayed(
    store: &dyn WeatherStore,
    valid_date: Date,
    tuning: &Tuning,
) -> Result<usize, StoreError> {
    let displayed = store.displayed_forecasts_for(valid_date).await?;
    if displayed.is_empty() {
        info!("nothing displayed for {}, skipping pipeline scoring", valid_date);
        return Ok(0);
    }

    let Some(primary) = store.primary_station().await? else {
        warn!("no primary station, cannot score displayed {}", valid_date);
        return Ok(0);
    };
    let (start, end) = local_day_bounds(valid_date, local_zone(tuning));
    let observations = store.observations_between(&primary.id, start, end).await?;
    let Some((actual_max, actual_min)) = DayExtremes::from_observations(&observations).both()
    else {
        warn!("no observed extremes for {}, skipping pipeline scoring", valid_date);
        return Ok(0);
    };

    let mut inserted = 0;
    for row in displayed {
        let record = DisplayedVerification {
            valid_date,
            lead_day: row.lead_day,
            final_max: row.explanation.max.final_value,
            final_min: row.explanation.min.final_value,
            raw_max: row.explanation.max.raw,
            raw_min: row.explanation.min.raw,
            actual_max,
            actual_min,
        };
        if store.insert_displayed_verification(record).await? {
            inserted += 1;
        }
    }

    info!(
        "scored {} displayed forecasts for {} against {:.1}/{:.1}",
        inserted, valid_date, actual_max, actual_min
    );
    Ok(inserted)
}

/// Mean absolute error of the providers' raw numbers against what the
/// dashboard showed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillReport {
    pub days: i64,
    pub samples: usize,
    pub raw_max_mae: Option<f64>,
    pub corrected_max_mae: Option<f64>,
    pub raw_min_mae: Option<f64>,
    pub corrected_min_mae: Option<f64>,
}

impl SkillReport {
    pub fn from_rows(days: i64, rows: &[DisplayedVerification]) -> Self {
        let errors = |value: fn(&DisplayedVerification) -> Option<f64>| {
            let errs: Vec<f64> = rows.iter().filter_map(value).collect();
            mean(&errs)
        };

        Self {
            days,
            samples: rows.len(),
            raw_max_mae: errors(|r| r.raw_max.map(|v| (v - r.actual_max).abs())),
            corrected_max_mae: errors(|r| r.final_max.map(|v| (v as f64 - r.actual_max).abs())),
            raw_min_mae: errors(|r| r.raw_min.map(|v| (v - r.actual_min).abs())),
            corrected_min_mae: errors(|r| r.final_min.map(|v| (v as f64 - r.actual_min).abs())),
        }
    }
}

pub async fn skill(
    store: &dyn WeatherStore,
    today: Date,
    days: i64,
) -> Result<SkillReport, StoreError> {
    let rows = store
        .displayed_verifications_since(today - Duration::days(days))
        .await?;
    Ok(SkillReport::from_rows(days, &rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        Database, DisplayedForecast, ElevationTier, Explanation, Observation, Regime, Station,
        TempExplanation,
    };
    use time::macros::{date, datetime};

    fn verification(raw_max: f64, final_max: i64, actual_max: f64) -> DisplayedVerification {
        DisplayedVerification {
            valid_date: date!(2024 - 01 - 15),
            lead_day: 0,
            final_max: Some(final_max),
            final_min: None,
            raw_max: Some(raw_max),
            raw_min: None,
            actual_max,
            actual_min: 10.0,
        }
    }

    #[test]
    fn skill_compares_raw_and_corrected() {
        let rows = vec![verification(30.0, 27, 27.0), verification(25.0, 24, 23.0)];
        let report = SkillReport::from_rows(30, &rows);
        assert_eq!(report.samples, 2);
        assert_eq!(report.raw_max_mae, Some(2.5));
        assert_eq!(report.corrected_max_mae, Some(0.5));
        assert_eq!(report.raw_min_mae, None);
    }

    #[tokio::test]
    async fn displayed_rows_are_scored_once() {
        let db = Database::in_memory().await.unwrap();
        let day = date!(2024 - 01 - 15);
        db.upsert_stations(vec![Station {
            id: "PWS1".to_string(),
            name: "Floor".to_string(),
            latitude: -36.7,
            longitude: 146.9,
            elevation_m: 300.0,
            tier: ElevationTier::ValleyFloor,
            is_primary: true,
            active: true,
        }])
        .await
        .unwrap();

        let (start, _) = local_day_bounds(day, local_zone(&Tuning::default()));
        let mut cold = Observation::new("PWS1", start + Duration::hours(5));
        cold.temperature = Some(9.0);
        let mut warm = Observation::new("PWS1", start + Duration::hours(15));
        warm.temperature = Some(26.0);
        db.insert_observations(vec![cold, warm]).await.unwrap();

        let mut max = TempExplanation::empty();
        max.raw = Some(28.0);
        max.final_value = Some(27);
        db.upsert_displayed_forecast(DisplayedForecast {
            displayed_at: datetime!(2024-01-14 22:00 UTC),
            valid_date: day,
            lead_day: 0,
            regime: Regime::All,
            pre_nowcast_max: Some(27),
            explanation: Explanation {
                max,
                min: TempExplanation::empty(),
            },
        })
        .await
        .unwrap();

        let tuning = Tuning::default();
        assert_eq!(verify_displayed(&db, day, &tuning).await.unwrap(), 1);
        assert_eq!(verify_displayed(&db, day, &tuning).await.unwrap(), 0);

        let report = skill(&db, date!(2024 - 01 - 16), 7).await.unwrap();
        assert_eq!(report.samples, 1);
        assert_eq!(report.raw_max_mae, Some(2.0));
        assert_eq!(report.corrected_max_mae, Some(1.0));
    }
}
