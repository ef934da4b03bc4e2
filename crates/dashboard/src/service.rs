use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime};
use valley_wx_core::Tuning;

use crate::{
    correction::{
        classify, detect_inversion, resolve, BiasTable, InversionState, NowcastContext,
        RegimeInputs, ResolverInputs,
    },
    db::{
        iso_date, DailySummary, DisplayedForecast, Explanation, Forecast, Observation, Regime,
        Source, Station, StoreError, WeatherStore,
    },
    local_time::{local_date_hour, local_day_bounds, local_zone},
    observed::{flag_out_of_range, is_falling, latest_temperature, temperature_trend, DayExtremes},
    verification::{
        recompute, skill, summarize_day, verify, verify_displayed, RecomputeReport, SkillReport,
    },
};

/// Today's displayed forecast plus the live readings it was clamped against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodayForecast {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub local_hour: u8,
    pub primary_station: Option<String>,
    pub regime: Regime,
    pub lead_day: i64,
    pub max: Option<i64>,
    pub min: Option<i64>,
    pub pre_nowcast_max: Option<i64>,
    pub nowcast_applied: bool,
    pub nowcast_adjustment: Option<f64>,
    pub current_temperature: Option<f64>,
    pub observed_max: Option<f64>,
    pub observed_min: Option<f64>,
    /// °C per hour over the last hour
    pub temperature_trend: Option<f64>,
    pub temp_falling: bool,
    pub explanation: Explanation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyJobReport {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub summary: Option<DailySummary>,
    pub verified: usize,
    pub displayed_verified: usize,
    pub stats: Option<RecomputeReport>,
    /// Steps that failed; later steps still ran
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct DashboardService {
    store: Arc<dyn WeatherStore>,
    tuning: Tuning,
}

impl DashboardService {
    pub fn new(store: Arc<dyn WeatherStore>, tuning: Tuning) -> Self {
        Self { store, tuning }
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Resolves and records today's corrected forecast. Never fails: storage
    /// read errors degrade to missing inputs.
    pub async fn today(&self, now: OffsetDateTime) -> TodayForecast {
        let zone = local_zone(&self.tuning);
        let (date, hour) = local_date_hour(now, zone);

        let primary = self.primary_station().await;
        let forecasts = self
            .store
            .forecasts_for_date(date)
            .await
            .unwrap_or_else(|e| {
                warn!("failed to read forecasts for {}: {}", date, e);
                vec![]
            });
        let newest = |source: Source| forecasts.iter().find(|f| f.source == source);
        let bom = newest(Source::Bom);
        let wu = newest(Source::Wu);

        let observations = match &primary {
            Some(station) => self.today_observations(station, date).await,
            None => vec![],
        };
        let extremes = DayExtremes::from_observations(&observations);
        let fresh_after = now - Duration::minutes(self.tuning.stale_observation_minutes);
        let current_temperature = latest_temperature(&observations, fresh_after);
        let trend = temperature_trend(&observations, now);
        let temp_falling = is_falling(trend);

        let table = match self.store.correction_stats().await {
            Ok(stats) => BiasTable::new(&stats),
            Err(e) => {
                warn!("failed to read correction stats, showing uncorrected: {}", e);
                BiasTable::default()
            }
        };
        let regime = self.today_regime(primary.as_ref(), date, bom, wu).await;
        let nowcast_context = primary.as_ref().map(|station| {
            NowcastContext::from_observations(
                &station.id,
                date,
                hour,
                &observations,
                now,
                zone,
                &self.tuning,
            )
        });

        let resolved = resolve(
            &ResolverInputs {
                bom,
                wu,
                stats: Some(&table),
                regime,
                current_temp: current_temperature,
                observed_max: extremes.max,
                observed_min: extremes.min,
                local_hour: hour,
                temp_falling,
                nowcast: nowcast_context.as_ref(),
            },
            &self.tuning,
        );

        if let Some(correction) = &resolved.nowcast {
            if let Err(e) = self.store.insert_nowcast_log(correction.log_entry()).await {
                warn!("failed to log nowcast correction: {}", e);
            }
        }

        let record = DisplayedForecast {
            displayed_at: now,
            valid_date: date,
            lead_day: resolved.lead_day,
            regime,
            pre_nowcast_max: resolved.pre_nowcast_max,
            explanation: resolved.explanation.clone(),
        };
        if let Err(e) = self.store.upsert_displayed_forecast(record).await {
            warn!("failed to record displayed forecast for {}: {}", date, e);
        }

        TodayForecast {
            date,
            local_hour: hour,
            primary_station: primary.map(|s| s.id),
            regime,
            lead_day: resolved.lead_day,
            max: resolved.max,
            min: resolved.min,
            pre_nowcast_max: resolved.pre_nowcast_max,
            nowcast_applied: resolved.nowcast_applied,
            nowcast_adjustment: resolved.nowcast_adjustment,
            current_temperature,
            observed_max: extremes.max,
            observed_min: extremes.min,
            temperature_trend: trend,
            temp_falling,
            explanation: resolved.explanation,
        }
    }

    async fn primary_station(&self) -> Option<Station> {
        match self.store.primary_station().await {
            Ok(station) => station,
            Err(e) => {
                warn!("failed to read primary station: {}", e);
                None
            }
        }
    }

    async fn today_observations(&self, station: &Station, date: Date) -> Vec<Observation> {
        let (start, end) = local_day_bounds(date, local_zone(&self.tuning));
        self.store
            .observations_between(&station.id, start, end)
            .await
            .unwrap_or_else(|e| {
                warn!("failed to read observations for {}: {}", station.id, e);
                vec![]
            })
    }

    async fn today_regime(
        &self,
        primary: Option<&Station>,
        date: Date,
        bom: Option<&Forecast>,
        wu: Option<&Forecast>,
    ) -> Regime {
        let forecast_max = bom.and_then(|f| f.temp_max).or(wu.and_then(|f| f.temp_max));
        let prior = match primary {
            Some(station) => self
                .store
                .daily_summaries_between(
                    &station.id,
                    date - Duration::days(2),
                    date - Duration::days(1),
                )
                .await
                .unwrap_or_else(|e| {
                    warn!("failed to read daily summaries: {}", e);
                    vec![]
                }),
            None => vec![],
        };
        let on = |day: Date| prior.iter().find(|s| s.date == day);

        classify(&RegimeInputs {
            forecast_max,
            today: None,
            prior: [
                on(date - Duration::days(1)),
                on(date - Duration::days(2)),
            ],
        })
    }

    pub async fn inversion(
        &self,
        now: OffsetDateTime,
    ) -> Result<Option<InversionState>, StoreError> {
        let since = now - Duration::minutes(self.tuning.stale_observation_minutes);
        let stations = self.store.active_stations().await?;
        let latest = self.store.latest_observations(since).await?;
        Ok(detect_inversion(&stations, &latest, now, &self.tuning))
    }

    /// Summarize, verify, score the displayed pipeline, then refresh the bias
    /// store. A failing step is recorded and the rest still run.
    pub async fn run_daily(&self, date: Date) -> DailyJobReport {
        let store = self.store.as_ref();
        let mut report = DailyJobReport {
            date,
            summary: None,
            verified: 0,
            displayed_verified: 0,
            stats: None,
            errors: vec![],
        };

        match summarize_day(store, date, &self.tuning).await {
            Ok(summary) => report.summary = summary,
            Err(e) => {
                error!("daily summary for {} failed: {}", date, e);
                report.errors.push(format!("summary: {}", e));
            }
        }

        match verify(store, date, &self.tuning).await {
            Ok(count) => report.verified = count,
            Err(e) => {
                error!("verification for {} failed: {}", date, e);
                report.errors.push(format!("verify: {}", e));
            }
        }

        match verify_displayed(store, date, &self.tuning).await {
            Ok(count) => report.displayed_verified = count,
            Err(e) => {
                error!("displayed verification for {} failed: {}", date, e);
                report.errors.push(format!("verify_displayed: {}", e));
            }
        }

        match recompute(store, date, &self.tuning).await {
            Ok(stats) => report.stats = Some(stats),
            Err(e) => {
                error!("stats recompute failed: {}", e);
                report.errors.push(format!("recompute: {}", e));
            }
        }

        info!(
            "daily job for {}: verified {}, displayed {}, {} errors",
            date,
            report.verified,
            report.displayed_verified,
            report.errors.len()
        );
        report
    }

    pub async fn skill(&self, now: OffsetDateTime, days: i64) -> Result<SkillReport, StoreError> {
        let (today, _) = local_date_hour(now, local_zone(&self.tuning));
        skill(self.store.as_ref(), today, days).await
    }

    /// Flags range violations, then stores the batch.
    pub async fn ingest_observations(
        &self,
        mut observations: Vec<Observation>,
    ) -> Result<u64, StoreError> {
        for observation in observations.iter_mut() {
            flag_out_of_range(observation);
        }
        let received = observations.len();
        let inserted = self.store.insert_observations(observations).await?;
        info!("stored {} of {} observations", inserted, received);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CorrectionStat, ElevationTier, MockWeatherStore, NewForecast, Target};
    use time::macros::{date, datetime};

    // 2024-01-15 14:00 in the valley, daylight time
    const NOW: OffsetDateTime = datetime!(2024-01-15 3:00 UTC);

    fn primary() -> Station {
        Station {
            id: "PWS1".to_string(),
            name: "Floor".to_string(),
            latitude: -36.7,
            longitude: 146.9,
            elevation_m: 300.0,
            tier: ElevationTier::ValleyFloor,
            is_primary: true,
            active: true,
        }
    }

    fn bom(temp_max: f64) -> Forecast {
        NewForecast {
            source: Source::Bom,
            fetched_at: datetime!(2024-01-14 20:00 UTC),
            valid_date: date!(2024 - 01 - 15),
            lead_day: 0,
            temp_max: Some(temp_max),
            temp_min: Some(12.0),
            precip_chance: None,
            precip_amount: None,
            narrative: None,
            wind_speed: None,
            wind_direction: None,
        }
        .with_id(1)
    }

    fn broken() -> StoreError {
        StoreError::Decode("disk I/O error".to_string())
    }

    #[tokio::test]
    async fn stats_failure_shows_the_uncorrected_forecast() {
        let mut store = MockWeatherStore::new();
        store
            .expect_primary_station()
            .returning(|| Ok(Some(primary())));
        store
            .expect_forecasts_for_date()
            .returning(|_| Ok(vec![bom(28.0)]));
        store
            .expect_observations_between()
            .returning(|_, _, _| Ok(vec![]));
        store
            .expect_correction_stats()
            .returning(|| Err(broken()));
        store
            .expect_daily_summaries_between()
            .returning(|_, _, _| Ok(vec![]));
        store
            .expect_upsert_displayed_forecast()
            .times(1)
            .returning(|record| {
                assert_eq!(record.explanation.max.final_value, Some(28));
                assert_eq!(record.explanation.max.bias_day_used, -1);
                Ok(())
            });

        let service = DashboardService::new(Arc::new(store), Tuning::default());
        let today = service.today(NOW).await;
        assert_eq!(today.date, date!(2024 - 01 - 15));
        assert_eq!(today.local_hour, 14);
        assert_eq!(today.max, Some(28));
        assert_eq!(today.min, Some(12));
        assert_eq!(today.explanation.max.bias_applied, None);
    }

    #[tokio::test]
    async fn every_read_failing_still_renders() {
        let mut store = MockWeatherStore::new();
        store.expect_primary_station().returning(|| Err(broken()));
        store
            .expect_forecasts_for_date()
            .returning(|_| Err(broken()));
        store
            .expect_correction_stats()
            .returning(|| Err(broken()));
        store
            .expect_upsert_displayed_forecast()
            .returning(|_| Err(broken()));

        let service = DashboardService::new(Arc::new(store), Tuning::default());
        let today = service.today(NOW).await;
        assert_eq!(today.max, None);
        assert_eq!(today.min, None);
        assert_eq!(today.primary_station, None);
        assert_eq!(today.regime, Regime::All);
    }

    #[tokio::test]
    async fn stored_bias_corrects_the_display() {
        let mut store = MockWeatherStore::new();
        store
            .expect_primary_station()
            .returning(|| Ok(Some(primary())));
        store
            .expect_forecasts_for_date()
            .returning(|_| Ok(vec![bom(30.0)]));
        store
            .expect_observations_between()
            .returning(|_, _, _| Ok(vec![]));
        store.expect_correction_stats().returning(|| {
            Ok(vec![CorrectionStat {
                source: Source::Bom,
                target: Target::Tmax,
                lead_day: 0,
                regime: Regime::All,
                window_days: 60,
                sample_size: 10,
                mean_bias: 10.0,
                mae: 10.0,
                updated_at: datetime!(2024-01-14 0:00 UTC),
            }])
        });
        store
            .expect_daily_summaries_between()
            .returning(|_, _, _| Ok(vec![]));
        store
            .expect_upsert_displayed_forecast()
            .returning(|_| Ok(()));

        let service = DashboardService::new(Arc::new(store), Tuning::default());
        let today = service.today(NOW).await;
        assert_eq!(today.max, Some(24));
        assert_eq!(today.explanation.max.bias_applied, Some(6.0));
    }

    #[tokio::test]
    async fn daily_job_keeps_going_after_a_failed_step() {
        let mut store = MockWeatherStore::new();
        store.expect_primary_station().returning(|| Err(broken()));
        store
            .expect_verification_exists()
            .returning(|_| Ok(false));
        store
            .expect_displayed_forecasts_for()
            .returning(|_| Ok(vec![]));
        store
            .expect_verifications_since()
            .returning(|_| Ok(vec![]));
        store.expect_replace_correction_stats().never();

        let service = DashboardService::new(Arc::new(store), Tuning::default());
        let report = service.run_daily(date!(2024 - 01 - 14)).await;

        // summary, verify and recompute each need the primary station
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.displayed_verified, 0);
        assert_eq!(report.stats, None);
    }

    #[tokio::test]
    async fn ingest_flags_impossible_readings() {
        let mut store = MockWeatherStore::new();
        store
            .expect_insert_observations()
            .times(1)
            .returning(|observations| {
                assert!(observations[0].quality_flags.is_empty());
                assert_eq!(
                    observations[1].quality_flags,
                    vec![crate::observed::TEMP_OUT_OF_RANGE.to_string()]
                );
                Ok(2)
            });

        let mut fine = Observation::new("PWS1", NOW);
        fine.temperature = Some(21.0);
        let mut broken_sensor = Observation::new("PWS1", NOW + Duration::minutes(5));
        broken_sensor.temperature = Some(88.0);

        let service = DashboardService::new(Arc::new(store), Tuning::default());
        assert_eq!(
            service
                .ingest_observations(vec![fine, broken_sensor])
                .await
                .unwrap(),
            2
        );
    }
}
