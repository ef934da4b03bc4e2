use std::collections::{BTreeMap, HashMap};

use log::{info, warn};
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime};
use valley_wx_core::{Tuning, MAX_LEAD_DAY};

use crate::db::{CorrectionStat, Regime, Source, StoreError, Target, VerificationRecord, WeatherStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecomputeReport {
    pub records: usize,
    pub stats_written: usize,
}

#[derive(Default)]
struct Accumulator {
    count: i64,
    sum: f64,
    sum_abs: f64,
}

impl Accumulator {
    fn push(&mut self, bias: f64) {
        self.count += 1;
        self.sum += bias;
        self.sum_abs += bias.abs();
    }
}

/// Folds verification records into bias-store rows. Every record counts
/// towards the `all` regime; records whose date has a classified regime also
/// count towards that regime.
pub fn aggregate(
    records: &[VerificationRecord],
    regimes: &HashMap<Date, Regime>,
    window_days: i64,
    updated_at: OffsetDateTime,
) -> Vec<CorrectionStat> {
    let mut groups: BTreeMap<(Source, Target, i64, Regime), Accumulator> = BTreeMap::new();

    for record in records {
        if !(0..=MAX_LEAD_DAY).contains(&record.lead_day) {
            continue;
        }
        let mut partitions = vec![Regime::All];
        if let Some(regime) = regimes.get(&record.valid_date) {
            if *regime != Regime::All {
                partitions.push(*regime);
            }
        }

        for (target, bias) in [(Target::Tmax, record.bias_max), (Target::Tmin, record.bias_min)] {
            let Some(bias) = bias else { continue };
            for regime in &partitions {
                groups
                    .entry((record.source, target, record.lead_day, *regime))
                    .or_default()
                    .push(bias);
            }
        }
    }

    groups
        .into_iter()
        .map(|((source, target, lead_day, regime), acc)| CorrectionStat {
            source,
            target,
            lead_day,
            regime,
            window_days,
            sample_size: acc.count,
            mean_bias: acc.sum / acc.count as f64,
            mae: acc.sum_abs / acc.count as f64,
            updated_at,
        })
        .collect()
}

/// Rebuilds the bias store from verification records of the last
/// `window_days` local days ending at `today`.
///
/// The store is replaced in one transaction, so readers see the old snapshot
/// or the new one and never a mix. Keys with no records left in the window
/// are dropped.
pub async fn recompute(
    store: &dyn WeatherStore,
    today: Date,
    tuning: &Tuning,
) -> Result<RecomputeReport, StoreError> {
    let window_days = tuning.stats_window_days;
    let since = today - Duration::days(window_days);
    let records = store.verifications_since(since).await?;

    let regimes = match store.primary_station().await? {
        Some(primary) => store
            .daily_summaries_between(&primary.id, since, today)
            .await?
            .into_iter()
            .map(|s| (s.date, s.regime))
            .collect(),
        None => {
            warn!("no primary station, regime statistics limited to 'all'");
            HashMap::new()
        }
    };

    let stats = aggregate(&records, &regimes, window_days, OffsetDateTime::now_utc());
    let report = RecomputeReport {
        records: records.len(),
        stats_written: stats.len(),
    };
    store.replace_correction_stats(stats).await?;

    info!(
        "recomputed correction stats over {} days: {} records, {} rows",
        window_days, report.records, report.stats_written
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewForecast};
    use time::macros::{date, datetime};

    fn record(source: Source, lead_day: i64, day: Date, bias_max: Option<f64>, bias_min: Option<f64>) -> VerificationRecord {
        VerificationRecord {
            forecast_id: 1,
            source,
            lead_day,
            valid_date: day,
            forecast_max: None,
            forecast_min: None,
            actual_max: 25.0,
            actual_min: 10.0,
            bias_max,
            bias_min,
            bias_wind: None,
            bias_precip: None,
            created_at: datetime!(2024-01-20 0:00 UTC),
        }
    }

    fn find(stats: &[CorrectionStat], source: Source, target: Target, lead_day: i64, regime: Regime) -> Option<&CorrectionStat> {
        stats.iter().find(|s| {
            s.source == source && s.target == target && s.lead_day == lead_day && s.regime == regime
        })
    }

    #[test]
    fn mean_and_mae_per_key() {
        let records = vec![
            record(Source::Bom, 0, date!(2024 - 01 - 10), Some(2.0), Some(-1.0)),
            record(Source::Bom, 0, date!(2024 - 01 - 11), Some(-1.0), None),
            record(Source::Bom, 0, date!(2024 - 01 - 12), Some(2.0), Some(3.0)),
            record(Source::Wu, 1, date!(2024 - 01 - 12), Some(0.5), Some(0.5)),
        ];
        let stats = aggregate(&records, &HashMap::new(), 60, datetime!(2024-01-20 0:00 UTC));

        let bom_max = find(&stats, Source::Bom, Target::Tmax, 0, Regime::All).unwrap();
        assert_eq!(bom_max.sample_size, 3);
        assert_eq!(bom_max.mean_bias, 1.0);
        assert_eq!(bom_max.mae, 5.0 / 3.0);
        assert_eq!(bom_max.window_days, 60);

        let bom_min = find(&stats, Source::Bom, Target::Tmin, 0, Regime::All).unwrap();
        assert_eq!(bom_min.sample_size, 2);
        assert_eq!(bom_min.mean_bias, 1.0);
        assert_eq!(bom_min.mae, 2.0);

        assert!(find(&stats, Source::Wu, Target::Tmax, 1, Regime::All).is_some());
        assert_eq!(stats.len(), 4);
    }

    #[test]
    fn classified_days_also_feed_their_regime() {
        let hot = date!(2024 - 01 - 11);
        let records = vec![
            record(Source::Bom, 0, date!(2024 - 01 - 10), Some(1.0), None),
            record(Source::Bom, 0, hot, Some(-3.0), None),
        ];
        let regimes = HashMap::from([
            (hot, Regime::Heatwave),
            (date!(2024 - 01 - 10), Regime::All),
        ]);
        let stats = aggregate(&records, &regimes, 60, datetime!(2024-01-20 0:00 UTC));

        let all = find(&stats, Source::Bom, Target::Tmax, 0, Regime::All).unwrap();
        assert_eq!(all.sample_size, 2);
        assert_eq!(all.mean_bias, -1.0);

        let heat = find(&stats, Source::Bom, Target::Tmax, 0, Regime::Heatwave).unwrap();
        assert_eq!(heat.sample_size, 1);
        assert_eq!(heat.mean_bias, -3.0);
        assert_eq!(stats.len(), 2);
    }

    async fn seed_bom_days(db: &Database, first: Date, days: i64, bias_max: f64) {
        for n in 0..days {
            let day = first + Duration::days(n);
            db.insert_forecasts(vec![NewForecast {
                source: Source::Bom,
                fetched_at: day.midnight().assume_utc() - Duration::hours(12),
                valid_date: day,
                lead_day: 0,
                temp_max: Some(25.0 + bias_max),
                temp_min: None,
                precip_chance: None,
                precip_amount: None,
                narrative: None,
                wind_speed: None,
                wind_direction: None,
            }])
            .await
            .unwrap();
            let forecast_id = db.forecasts_for_date(day).await.unwrap()[0].id;
            let mut verification = record(Source::Bom, 0, day, Some(bias_max), None);
            verification.forecast_id = forecast_id;
            assert!(db.insert_verification(verification).await.unwrap());
        }
    }

    #[tokio::test]
    async fn recompute_only_counts_days_inside_the_window() {
        let db = Database::in_memory().await.unwrap();
        seed_bom_days(&db, date!(2023 - 12 - 31), 1, 9.0).await;
        seed_bom_days(&db, date!(2024 - 01 - 01), 9, 5.0).await;

        // 60 days back from March 1st 2024 is January 1st
        let report = recompute(&db, date!(2024 - 03 - 01), &Tuning::default())
            .await
            .unwrap();
        assert_eq!(report.records, 9);

        let stats = db.correction_stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].sample_size, 9);
        assert_eq!(stats[0].mean_bias, 5.0);
    }

    #[tokio::test]
    async fn aged_out_keys_leave_the_store() {
        let db = Database::in_memory().await.unwrap();
        seed_bom_days(&db, date!(2024 - 01 - 05), 10, 5.0).await;

        recompute(&db, date!(2024 - 01 - 20), &Tuning::default())
            .await
            .unwrap();
        assert_eq!(db.correction_stats().await.unwrap().len(), 1);

        let report = recompute(&db, date!(2025 - 01 - 20), &Tuning::default())
            .await
            .unwrap();
        assert_eq!(report.records, 0);
        assert!(db.correction_stats().await.unwrap().is_empty());
    }

    #[test]
    fn long_lead_days_are_not_tracked() {
        let records = vec![record(Source::Wu, 15, date!(2024 - 01 - 10), Some(1.0), Some(1.0))];
        assert!(aggregate(&records, &HashMap::new(), 60, datetime!(2024-01-20 0:00 UTC)).is_empty());
    }
}
