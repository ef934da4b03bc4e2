use async_trait::async_trait;
use log::{error, info};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::{future::Future, path::Path, str::FromStr, time::Duration};
use time::{Date, OffsetDateTime};
use tokio::sync::{mpsc, oneshot};

use super::{
    date_from_key, date_key, CorrectionStat, DailySummary, DisplayedForecast,
    DisplayedVerification, ElevationTier, Explanation, Forecast, IngestRun, NewForecast,
    NowcastLogEntry, Observation, ObservationType, Regime, Source, Station, StoreError, Target,
    TempExplanation, VerificationRecord, WeatherStore,
};

type WriteOperation = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

/// Funnels every write through one task so multi-statement writes never interleave.
pub struct DatabaseWriter {
    write_tx: mpsc::UnboundedSender<WriteOperation>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Default for DatabaseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseWriter {
    pub fn new() -> Self {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteOperation>();

        let handle = tokio::spawn(async move {
            while let Some(future) = write_rx.recv().await {
                future.await;
            }
        });

        Self {
            write_tx,
            _handle: handle,
        }
    }

    pub async fn execute<T, F, Fut>(&self, pool: SqlitePool, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T, StoreError>>();

        let write_op = Box::pin(async move {
            let result = operation(pool).await;
            let _ = result_tx.send(result);
        });

        self.write_tx
            .send(write_op)
            .map_err(|_| StoreError::WriterClosed)?;

        result_rx.await.map_err(|_| StoreError::WriterClosed)?
    }
}

pub struct Database {
    pool: SqlitePool,
    writer: DatabaseWriter,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let db_path = format!("{}/valley.sqlite", path);

        if let Some(parent) = Path::new(&db_path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Query(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL")
            .pragma("busy_timeout", "5000")
            .pragma("cache_size", "-64000")
            .pragma("foreign_keys", "ON")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let db = Self::from_pool(pool).await?;
        info!("SQLite database initialized at: {}", db_path);
        Ok(db)
    }

    /// Private in-memory database, mostly for tests. A single connection keeps
    /// the database alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.pragma("foreign_keys", "ON");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let db = Self {
            pool,
            writer: DatabaseWriter::new(),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint WAL to the main database file before shutdown.
    pub async fn checkpoint(&self) {
        match sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.pool)
            .await
        {
            Ok(_) => info!("WAL checkpoint completed successfully"),
            Err(e) => error!("WAL checkpoint failed: {}", e),
        }
    }
}

fn parse_column<T: FromStr<Err = StoreError>>(row: &SqliteRow, column: &str) -> Result<T, StoreError> {
    let raw: String = row.try_get(column)?;
    T::from_str(&raw)
}

fn parse_optional<T: FromStr<Err = StoreError>>(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<T>, StoreError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| T::from_str(&s)).transpose()
}

fn instant(row: &SqliteRow, column: &str) -> Result<OffsetDateTime, StoreError> {
    let ts: i64 = row.try_get(column)?;
    Ok(OffsetDateTime::from_unix_timestamp(ts)?)
}

fn date(row: &SqliteRow, column: &str) -> Result<Date, StoreError> {
    date_from_key(row.try_get(column)?)
}

fn row_to_station(row: &SqliteRow) -> Result<Station, StoreError> {
    Ok(Station {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        elevation_m: row.try_get("elevation_m")?,
        tier: parse_column::<ElevationTier>(row, "elevation_tier")?,
        is_primary: row.try_get("is_primary")?,
        active: row.try_get("active")?,
    })
}

const OBSERVATION_COLUMNS: &str = "station_id, observed_at, temperature, humidity, pressure,
    wind_speed, wind_gust, wind_direction, precip_rate, precip_total, solar_radiation,
    dewpoint, heat_index, wind_chill, uv, obs_type, qc_status, quality_flags,
    aggregation_minutes";

fn row_to_observation(row: &SqliteRow) -> Result<Observation, StoreError> {
    let flags_json: String = row.try_get("quality_flags")?;
    Ok(Observation {
        station_id: row.try_get("station_id")?,
        observed_at: instant(row, "observed_at")?,
        temperature: row.try_get("temperature")?,
        humidity: row.try_get("humidity")?,
        pressure: row.try_get("pressure")?,
        wind_speed: row.try_get("wind_speed")?,
        wind_gust: row.try_get("wind_gust")?,
        wind_direction: row.try_get("wind_direction")?,
        precip_rate: row.try_get("precip_rate")?,
        precip_total: row.try_get("precip_total")?,
        solar_radiation: row.try_get("solar_radiation")?,
        dewpoint: row.try_get("dewpoint")?,
        heat_index: row.try_get("heat_index")?,
        wind_chill: row.try_get("wind_chill")?,
        uv: row.try_get("uv")?,
        obs_type: parse_column::<ObservationType>(row, "obs_type")?,
        qc_status: row.try_get("qc_status")?,
        quality_flags: serde_json::from_str(&flags_json)?,
        aggregation_minutes: row.try_get("aggregation_minutes")?,
    })
}

fn row_to_forecast(row: &SqliteRow) -> Result<Forecast, StoreError> {
    Ok(Forecast {
        id: row.try_get("id")?,
        source: parse_column::<Source>(row, "source")?,
        fetched_at: instant(row, "fetched_at")?,
        valid_date: date(row, "valid_date")?,
        lead_day: row.try_get("day_of_forecast")?,
        temp_max: row.try_get("temp_max")?,
        temp_min: row.try_get("temp_min")?,
        precip_chance: row.try_get("precip_chance")?,
        precip_amount: row.try_get("precip_amount")?,
        narrative: row.try_get("narrative")?,
        wind_speed: row.try_get("wind_speed")?,
        wind_direction: row.try_get("wind_direction")?,
    })
}

fn row_to_verification(row: &SqliteRow) -> Result<VerificationRecord, StoreError> {
    Ok(VerificationRecord {
        forecast_id: row.try_get("forecast_id")?,
        source: parse_column::<Source>(row, "source")?,
        lead_day: row.try_get("day_of_forecast")?,
        valid_date: date(row, "valid_date")?,
        forecast_max: row.try_get("forecast_temp_max")?,
        forecast_min: row.try_get("forecast_temp_min")?,
        actual_max: row.try_get("actual_temp_max")?,
        actual_min: row.try_get("actual_temp_min")?,
        bias_max: row.try_get("bias_temp_max")?,
        bias_min: row.try_get("bias_temp_min")?,
        bias_wind: row.try_get("bias_wind")?,
        bias_precip: row.try_get("bias_precip")?,
        created_at: instant(row, "created_at")?,
    })
}

fn row_to_stat(row: &SqliteRow) -> Result<CorrectionStat, StoreError> {
    Ok(CorrectionStat {
        source: parse_column::<Source>(row, "source")?,
        target: parse_column::<Target>(row, "target")?,
        lead_day: row.try_get("day_of_forecast")?,
        regime: parse_column::<Regime>(row, "regime")?,
        window_days: row.try_get("window_days")?,
        sample_size: row.try_get("sample_size")?,
        mean_bias: row.try_get("mean_bias")?,
        mae: row.try_get("mae")?,
        updated_at: instant(row, "updated_at")?,
    })
}

fn row_to_summary(row: &SqliteRow) -> Result<DailySummary, StoreError> {
    Ok(DailySummary {
        date: date(row, "date")?,
        station_id: row.try_get("station_id")?,
        temp_max: row.try_get("temp_max")?,
        temp_min: row.try_get("temp_min")?,
        precip_total: row.try_get("precip_total")?,
        solar_integral_mj: row.try_get("solar_integral_mj")?,
        peak_gust: row.try_get("peak_gust")?,
        inversion_detected: row.try_get("inversion_detected")?,
        inversion_strength: row.try_get("inversion_strength")?,
        calm_night_fraction: row.try_get("calm_night_fraction")?,
        regime: parse_column::<Regime>(row, "regime")?,
    })
}

fn row_to_temp_explanation(row: &SqliteRow, prefix: &str) -> Result<TempExplanation, StoreError> {
    let col = |name: &str| format!("{prefix}_{name}");
    let nowcast_adjustment = if prefix == "max" {
        row.try_get(col("nowcast").as_str())?
    } else {
        None
    };
    Ok(TempExplanation {
        source: parse_optional::<Source>(row, &col("source"))?,
        forecast_id: row.try_get(col("forecast_id").as_str())?,
        raw: row.try_get(col("raw").as_str())?,
        bias_applied: row.try_get(col("bias_applied").as_str())?,
        bias_day_used: row.try_get(col("bias_day_used").as_str())?,
        bias_samples: row.try_get(col("bias_samples").as_str())?,
        bias_fallback: row.try_get(col("bias_fallback").as_str())?,
        bias_rejected: row.try_get(col("bias_rejected").as_str())?,
        nowcast_adjustment,
        final_value: row.try_get(col("final").as_str())?,
    })
}

fn row_to_displayed(row: &SqliteRow) -> Result<DisplayedForecast, StoreError> {
    Ok(DisplayedForecast {
        displayed_at: instant(row, "displayed_at")?,
        valid_date: date(row, "valid_date")?,
        lead_day: row.try_get("day_of_forecast")?,
        regime: parse_column::<Regime>(row, "regime")?,
        pre_nowcast_max: row.try_get("max_pre_nowcast")?,
        explanation: Explanation {
            max: row_to_temp_explanation(row, "max")?,
            min: row_to_temp_explanation(row, "min")?,
        },
    })
}

fn row_to_displayed_verification(row: &SqliteRow) -> Result<DisplayedVerification, StoreError> {
    Ok(DisplayedVerification {
        valid_date: date(row, "valid_date")?,
        lead_day: row.try_get("day_of_forecast")?,
        final_max: row.try_get("final_max")?,
        final_min: row.try_get("final_min")?,
        raw_max: row.try_get("raw_max")?,
        raw_min: row.try_get("raw_min")?,
        actual_max: row.try_get("actual_max")?,
        actual_min: row.try_get("actual_min")?,
    })
}

#[async_trait]
impl WeatherStore for Database {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;

        let result: String = sqlx::query_scalar("PRAGMA quick_check;")
            .fetch_one(&self.pool)
            .await?;
        if result != "ok" {
            return Err(StoreError::Decode(format!(
                "integrity check failed: {}",
                result
            )));
        }
        Ok(())
    }

    async fn upsert_stations(&self, stations: Vec<Station>) -> Result<u64, StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;
                let mut written = 0;

                for station in stations {
                    // Promoting a station demotes the previous primary in the same transaction
                    if station.is_primary && station.active {
                        sqlx::query("UPDATE stations SET is_primary = 0 WHERE id != ?")
                            .bind(&station.id)
                            .execute(&mut *tx)
                            .await?;
                    }

                    written += sqlx::query(
                        "INSERT INTO stations (id, name, latitude, longitude, elevation_m,
                                               elevation_tier, is_primary, active)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            name = excluded.name,
                            latitude = excluded.latitude,
                            longitude = excluded.longitude,
                            elevation_m = excluded.elevation_m,
                            elevation_tier = excluded.elevation_tier,
                            is_primary = excluded.is_primary,
                            active = excluded.active",
                    )
                    .bind(&station.id)
                    .bind(&station.name)
                    .bind(station.latitude)
                    .bind(station.longitude)
                    .bind(station.elevation_m)
                    .bind(station.tier.as_str())
                    .bind(station.is_primary)
                    .bind(station.active)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }

                tx.commit().await?;
                Ok(written)
            })
            .await
    }

    async fn active_stations(&self) -> Result<Vec<Station>, StoreError> {
        let rows = sqlx::query("SELECT * FROM stations WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_station).collect()
    }

    async fn primary_station(&self) -> Result<Option<Station>, StoreError> {
        let row = sqlx::query("SELECT * FROM stations WHERE active = 1 AND is_primary = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_station).transpose()
    }

    async fn insert_observations(&self, observations: Vec<Observation>) -> Result<u64, StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;
                let mut inserted = 0;

                for obs in observations {
                    let flags = serde_json::to_string(&obs.quality_flags)?;
                    inserted += sqlx::query(&format!(
                        "INSERT INTO observations ({OBSERVATION_COLUMNS})
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(station_id, observed_at) DO NOTHING"
                    ))
                    .bind(&obs.station_id)
                    .bind(obs.observed_at.unix_timestamp())
                    .bind(obs.temperature)
                    .bind(obs.humidity)
                    .bind(obs.pressure)
                    .bind(obs.wind_speed)
                    .bind(obs.wind_gust)
                    .bind(obs.wind_direction)
                    .bind(obs.precip_rate)
                    .bind(obs.precip_total)
                    .bind(obs.solar_radiation)
                    .bind(obs.dewpoint)
                    .bind(obs.heat_index)
                    .bind(obs.wind_chill)
                    .bind(obs.uv)
                    .bind(obs.obs_type.as_str())
                    .bind(obs.qc_status)
                    .bind(flags)
                    .bind(obs.aggregation_minutes)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }

                tx.commit().await?;
                Ok(inserted)
            })
            .await
    }

    async fn observations_between(
        &self,
        station_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Observation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE station_id = ? AND observed_at >= ? AND observed_at < ?
             ORDER BY observed_at ASC"
        ))
        .bind(station_id)
        .bind(start.unix_timestamp())
        .bind(end.unix_timestamp())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_observation).collect()
    }

    async fn all_observations_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Observation>, StoreError> {
        let rows = sqlx::query(
            "SELECT o.station_id, o.observed_at, o.temperature, o.humidity, o.pressure,
                    o.wind_speed, o.wind_gust, o.wind_direction, o.precip_rate, o.precip_total,
                    o.solar_radiation, o.dewpoint, o.heat_index, o.wind_chill, o.uv, o.obs_type,
                    o.qc_status, o.quality_flags, o.aggregation_minutes
             FROM observations o
             JOIN stations s ON s.id = o.station_id AND s.active = 1
             WHERE o.observed_at >= ? AND o.observed_at < ?
             ORDER BY o.observed_at ASC",
        )
        .bind(start.unix_timestamp())
        .bind(end.unix_timestamp())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_observation).collect()
    }

    async fn latest_observations(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<Observation>, StoreError> {
        let rows = sqlx::query(
            "SELECT o.station_id, o.observed_at, o.temperature, o.humidity, o.pressure,
                    o.wind_speed, o.wind_gust, o.wind_direction, o.precip_rate, o.precip_total,
                    o.solar_radiation, o.dewpoint, o.heat_index, o.wind_chill, o.uv, o.obs_type,
                    o.qc_status, o.quality_flags, o.aggregation_minutes
             FROM observations o
             JOIN stations s ON s.id = o.station_id AND s.active = 1
             JOIN (
                SELECT station_id, MAX(observed_at) AS newest
                FROM observations
                WHERE observed_at >= ?
                GROUP BY station_id
             ) latest ON latest.station_id = o.station_id AND latest.newest = o.observed_at
             ORDER BY o.station_id",
        )
        .bind(since.unix_timestamp())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_observation).collect()
    }

    async fn insert_forecasts(&self, forecasts: Vec<NewForecast>) -> Result<u64, StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;
                let mut inserted = 0;

                for f in forecasts {
                    inserted += sqlx::query(
                        "INSERT INTO forecasts (source, fetched_at, valid_date, day_of_forecast,
                                                temp_max, temp_min, precip_chance, precip_amount,
                                                narrative, wind_speed, wind_direction)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(source, fetched_at, valid_date) DO NOTHING",
                    )
                    .bind(f.source.as_str())
                    .bind(f.fetched_at.unix_timestamp())
                    .bind(date_key(f.valid_date))
                    .bind(f.lead_day)
                    .bind(f.temp_max)
                    .bind(f.temp_min)
                    .bind(f.precip_chance)
                    .bind(f.precip_amount)
                    .bind(&f.narrative)
                    .bind(f.wind_speed)
                    .bind(f.wind_direction)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }

                tx.commit().await?;
                Ok(inserted)
            })
            .await
    }

    async fn forecasts_for_date(&self, valid_date: Date) -> Result<Vec<Forecast>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM forecasts WHERE valid_date = ?
             ORDER BY fetched_at DESC, id DESC",
        )
        .bind(date_key(valid_date))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_forecast).collect()
    }

    async fn verification_exists(&self, valid_date: Date) -> Result<bool, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM forecast_verification WHERE valid_date = ?")
                .bind(date_key(valid_date))
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn insert_verification(&self, record: VerificationRecord) -> Result<bool, StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let result = sqlx::query(
                    "INSERT INTO forecast_verification (
                        forecast_id, source, day_of_forecast, valid_date,
                        forecast_temp_max, forecast_temp_min, actual_temp_max, actual_temp_min,
                        bias_temp_max, bias_temp_min, bias_wind, bias_precip, created_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(source, valid_date) DO NOTHING",
                )
                .bind(record.forecast_id)
                .bind(record.source.as_str())
                .bind(record.lead_day)
                .bind(date_key(record.valid_date))
                .bind(record.forecast_max)
                .bind(record.forecast_min)
                .bind(record.actual_max)
                .bind(record.actual_min)
                .bind(record.bias_max)
                .bind(record.bias_min)
                .bind(record.bias_wind)
                .bind(record.bias_precip)
                .bind(record.created_at.unix_timestamp())
                .execute(&pool)
                .await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn verifications_since(&self, since: Date) -> Result<Vec<VerificationRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM forecast_verification WHERE valid_date >= ?
             ORDER BY valid_date ASC, source ASC",
        )
        .bind(date_key(since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_verification).collect()
    }

    async fn replace_correction_stats(&self, stats: Vec<CorrectionStat>) -> Result<(), StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;

                // keys with no records left in the window must not survive
                sqlx::query("DELETE FROM forecast_correction_stats")
                    .execute(&mut *tx)
                    .await?;

                for stat in stats {
                    sqlx::query(
                        "INSERT INTO forecast_correction_stats (
                            source, target, day_of_forecast, regime, window_days,
                            sample_size, mean_bias, mae, updated_at
                         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(stat.source.as_str())
                    .bind(stat.target.as_str())
                    .bind(stat.lead_day)
                    .bind(stat.regime.as_str())
                    .bind(stat.window_days)
                    .bind(stat.sample_size)
                    .bind(stat.mean_bias)
                    .bind(stat.mae)
                    .bind(stat.updated_at.unix_timestamp())
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;
                Ok(())
            })
            .await
    }

    async fn correction_stats(&self) -> Result<Vec<CorrectionStat>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM forecast_correction_stats
             ORDER BY source, target, regime, day_of_forecast",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_stat).collect()
    }

    async fn upsert_daily_summary(&self, summary: DailySummary) -> Result<(), StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                sqlx::query(
                    "INSERT INTO daily_summaries (
                        date, station_id, temp_max, temp_min, precip_total, solar_integral_mj,
                        peak_gust, inversion_detected, inversion_strength, calm_night_fraction,
                        regime, updated_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(date, station_id) DO UPDATE SET
                        temp_max = excluded.temp_max,
                        temp_min = excluded.temp_min,
                        precip_total = excluded.precip_total,
                        solar_integral_mj = excluded.solar_integral_mj,
                        peak_gust = excluded.peak_gust,
                        inversion_detected = excluded.inversion_detected,
                        inversion_strength = excluded.inversion_strength,
                        calm_night_fraction = excluded.calm_night_fraction,
                        regime = excluded.regime,
                        updated_at = excluded.updated_at",
                )
                .bind(date_key(summary.date))
                .bind(&summary.station_id)
                .bind(summary.temp_max)
                .bind(summary.temp_min)
                .bind(summary.precip_total)
                .bind(summary.solar_integral_mj)
                .bind(summary.peak_gust)
                .bind(summary.inversion_detected)
                .bind(summary.inversion_strength)
                .bind(summary.calm_night_fraction)
                .bind(summary.regime.as_str())
                .bind(OffsetDateTime::now_utc().unix_timestamp())
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
    }

    async fn daily_summaries_between(
        &self,
        station_id: &str,
        start: Date,
        end: Date,
    ) -> Result<Vec<DailySummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM daily_summaries
             WHERE station_id = ? AND date >= ? AND date <= ?
             ORDER BY date ASC",
        )
        .bind(station_id)
        .bind(date_key(start))
        .bind(date_key(end))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_summary).collect()
    }

    async fn upsert_displayed_forecast(&self, record: DisplayedForecast) -> Result<(), StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let max = &record.explanation.max;
                let min = &record.explanation.min;
                sqlx::query(
                    "INSERT INTO displayed_forecasts (
                        valid_date, day_of_forecast, displayed_at,
                        max_source, max_forecast_id, max_raw, max_bias_applied, max_bias_day_used,
                        max_bias_samples, max_bias_fallback, max_bias_rejected, max_nowcast,
                        max_pre_nowcast, max_final,
                        min_source, min_forecast_id, min_raw, min_bias_applied, min_bias_day_used,
                        min_bias_samples, min_bias_fallback, min_bias_rejected, min_final,
                        regime
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(valid_date, day_of_forecast) DO UPDATE SET
                        displayed_at = excluded.displayed_at,
                        max_source = excluded.max_source,
                        max_forecast_id = excluded.max_forecast_id,
                        max_raw = excluded.max_raw,
                        max_bias_applied = excluded.max_bias_applied,
                        max_bias_day_used = excluded.max_bias_day_used,
                        max_bias_samples = excluded.max_bias_samples,
                        max_bias_fallback = excluded.max_bias_fallback,
                        max_bias_rejected = excluded.max_bias_rejected,
                        max_nowcast = excluded.max_nowcast,
                        max_pre_nowcast = excluded.max_pre_nowcast,
                        max_final = excluded.max_final,
                        min_source = excluded.min_source,
                        min_forecast_id = excluded.min_forecast_id,
                        min_raw = excluded.min_raw,
                        min_bias_applied = excluded.min_bias_applied,
                        min_bias_day_used = excluded.min_bias_day_used,
                        min_bias_samples = excluded.min_bias_samples,
                        min_bias_fallback = excluded.min_bias_fallback,
                        min_bias_rejected = excluded.min_bias_rejected,
                        min_final = excluded.min_final,
                        regime = excluded.regime",
                )
                .bind(date_key(record.valid_date))
                .bind(record.lead_day)
                .bind(record.displayed_at.unix_timestamp())
                .bind(max.source.map(|s| s.as_str()))
                .bind(max.forecast_id)
                .bind(max.raw)
                .bind(max.bias_applied)
                .bind(max.bias_day_used)
                .bind(max.bias_samples)
                .bind(max.bias_fallback)
                .bind(max.bias_rejected)
                .bind(max.nowcast_adjustment)
                .bind(record.pre_nowcast_max)
                .bind(max.final_value)
                .bind(min.source.map(|s| s.as_str()))
                .bind(min.forecast_id)
                .bind(min.raw)
                .bind(min.bias_applied)
                .bind(min.bias_day_used)
                .bind(min.bias_samples)
                .bind(min.bias_fallback)
                .bind(min.bias_rejected)
                .bind(min.final_value)
                .bind(record.regime.as_str())
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
    }

    async fn displayed_forecasts_for(
        &self,
        valid_date: Date,
    ) -> Result<Vec<DisplayedForecast>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM displayed_forecasts WHERE valid_date = ? ORDER BY day_of_forecast",
        )
        .bind(date_key(valid_date))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_displayed).collect()
    }

    async fn insert_displayed_verification(
        &self,
        record: DisplayedVerification,
    ) -> Result<bool, StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let result = sqlx::query(
                    "INSERT INTO displayed_verification (
                        valid_date, day_of_forecast, final_max, final_min, raw_max, raw_min,
                        actual_max, actual_min, created_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(valid_date, day_of_forecast) DO NOTHING",
                )
                .bind(date_key(record.valid_date))
                .bind(record.lead_day)
                .bind(record.final_max)
                .bind(record.final_min)
                .bind(record.raw_max)
                .bind(record.raw_min)
                .bind(record.actual_max)
                .bind(record.actual_min)
                .bind(OffsetDateTime::now_utc().unix_timestamp())
                .execute(&pool)
                .await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn displayed_verifications_since(
        &self,
        since: Date,
    ) -> Result<Vec<DisplayedVerification>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM displayed_verification WHERE valid_date >= ?
             ORDER BY valid_date ASC, day_of_forecast ASC",
        )
        .bind(date_key(since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_displayed_verification).collect()
    }

    async fn insert_nowcast_log(&self, entry: NowcastLogEntry) -> Result<(), StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                sqlx::query(
                    "INSERT INTO nowcast_log (
                        date, station_id, observed_morning, forecast_morning, delta,
                        raw_adjustment, adjustment, raw_max, corrected_max, created_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(date_key(entry.date))
                .bind(&entry.station_id)
                .bind(entry.observed_morning)
                .bind(entry.forecast_morning)
                .bind(entry.delta)
                .bind(entry.raw_adjustment)
                .bind(entry.adjustment)
                .bind(entry.raw_max)
                .bind(entry.corrected_max)
                .bind(OffsetDateTime::now_utc().unix_timestamp())
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
    }

    async fn record_ingest_run(&self, run: IngestRun) -> Result<(), StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                sqlx::query(
                    "INSERT INTO ingest_runs (source, started_at, finished_at, rows_inserted, status, error)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&run.source)
                .bind(run.started_at.unix_timestamp())
                .bind(run.finished_at.unix_timestamp())
                .bind(run.rows)
                .bind(run.status.as_str())
                .bind(&run.error)
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TempExplanation;
    use time::macros::{date, datetime};

    fn station(id: &str, tier: ElevationTier, primary: bool) -> Station {
        Station {
            id: id.to_string(),
            name: id.to_string(),
            latitude: -36.7,
            longitude: 146.9,
            elevation_m: 300.0,
            tier,
            is_primary: primary,
            active: true,
        }
    }

    fn forecast(source: Source, fetched_at: OffsetDateTime, valid_date: Date) -> NewForecast {
        NewForecast {
            source,
            fetched_at,
            valid_date,
            lead_day: 0,
            temp_max: Some(25.0),
            temp_min: Some(9.0),
            precip_chance: None,
            precip_amount: None,
            narrative: Some("Sunny.".to_string()),
            wind_speed: None,
            wind_direction: None,
        }
    }

    #[tokio::test]
    async fn promoting_a_station_demotes_the_old_primary() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_stations(vec![station("A", ElevationTier::ValleyFloor, true)])
            .await
            .unwrap();
        db.upsert_stations(vec![station("B", ElevationTier::Upper, true)])
            .await
            .unwrap();

        let primary = db.primary_station().await.unwrap().unwrap();
        assert_eq!(primary.id, "B");
        assert_eq!(db.active_stations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_observations_are_ignored() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_stations(vec![station("A", ElevationTier::ValleyFloor, true)])
            .await
            .unwrap();

        let mut obs = Observation::new("A", datetime!(2024-01-15 1:00 UTC));
        obs.temperature = Some(14.5);
        obs.quality_flags = vec!["spike".to_string()];

        assert_eq!(db.insert_observations(vec![obs.clone()]).await.unwrap(), 1);
        assert_eq!(db.insert_observations(vec![obs.clone()]).await.unwrap(), 0);

        let stored = db
            .observations_between(
                "A",
                datetime!(2024-01-15 0:00 UTC),
                datetime!(2024-01-16 0:00 UTC),
            )
            .await
            .unwrap();
        assert_eq!(stored, vec![obs]);
    }

    #[tokio::test]
    async fn forecasts_come_back_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let day = date!(2024 - 01 - 15);
        db.insert_forecasts(vec![
            forecast(Source::Bom, datetime!(2024-01-14 20:00 UTC), day),
            forecast(Source::Bom, datetime!(2024-01-14 22:00 UTC), day),
            forecast(Source::Wu, datetime!(2024-01-14 21:00 UTC), day),
        ])
        .await
        .unwrap();

        let stored = db.forecasts_for_date(day).await.unwrap();
        let fetched: Vec<_> = stored.iter().map(|f| f.fetched_at).collect();
        assert_eq!(
            fetched,
            vec![
                datetime!(2024-01-14 22:00 UTC),
                datetime!(2024-01-14 21:00 UTC),
                datetime!(2024-01-14 20:00 UTC),
            ]
        );
    }

    #[tokio::test]
    async fn displayed_forecast_upsert_keeps_one_row_per_key() {
        let db = Database::in_memory().await.unwrap();
        let mut record = DisplayedForecast {
            displayed_at: datetime!(2024-01-15 0:00 UTC),
            valid_date: date!(2024 - 01 - 15),
            lead_day: 0,
            regime: Regime::All,
            pre_nowcast_max: Some(27),
            explanation: Explanation {
                max: TempExplanation {
                    source: Some(Source::Bom),
                    forecast_id: Some(1),
                    raw: Some(28.0),
                    bias_applied: Some(1.0),
                    bias_day_used: 0,
                    bias_samples: 9,
                    bias_fallback: false,
                    bias_rejected: false,
                    nowcast_adjustment: Some(0.5),
                    final_value: Some(28),
                },
                min: TempExplanation::empty(),
            },
        };
        db.upsert_displayed_forecast(record.clone()).await.unwrap();
        record.explanation.max.final_value = Some(29);
        db.upsert_displayed_forecast(record.clone()).await.unwrap();

        let stored = db.displayed_forecasts_for(date!(2024 - 01 - 15)).await.unwrap();
        assert_eq!(stored, vec![record]);
    }
}
