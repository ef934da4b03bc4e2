mod sqlite;

pub use sqlite::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use time::{Date, OffsetDateTime};

time::serde::format_description!(pub iso_date, Date, "[year]-[month]-[day]");

/// Upstream QC status codes treated as trustworthy.
pub const QC_VALID: i64 = 1;
pub const QC_VERIFIED: i64 = 4;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Failed to query sqlite: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Failed to encode json column: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid stored timestamp: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
    #[error("Invalid stored value: {0}")]
    Decode(String),
    #[error("Database writer channel closed")]
    WriterClosed,
}

impl StoreError {
    /// True when the connection itself is gone, as opposed to a single bad statement.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            StoreError::WriterClosed
                | StoreError::Query(sqlx::Error::PoolClosed)
                | StoreError::Query(sqlx::Error::PoolTimedOut)
                | StoreError::Query(sqlx::Error::Io(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationTier {
    ValleyFloor,
    MidSlope,
    Upper,
    Local,
}

impl ElevationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElevationTier::ValleyFloor => "valley_floor",
            ElevationTier::MidSlope => "mid_slope",
            ElevationTier::Upper => "upper",
            ElevationTier::Local => "local",
        }
    }
}

impl FromStr for ElevationTier {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valley_floor" => Ok(ElevationTier::ValleyFloor),
            "mid_slope" => Ok(ElevationTier::MidSlope),
            "upper" => Ok(ElevationTier::Upper),
            "local" => Ok(ElevationTier::Local),
            other => Err(StoreError::Decode(format!("unknown elevation tier: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
    pub tier: ElevationTier,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    #[default]
    Instant,
    Hourly,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Instant => "instant",
            ObservationType::Hourly => "hourly",
        }
    }
}

impl FromStr for ObservationType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(ObservationType::Instant),
            "hourly" => Ok(ObservationType::Hourly),
            other => Err(StoreError::Decode(format!("unknown observation type: {other}"))),
        }
    }
}

/// One station reading. Metric units: °C, %, hPa, m/s, degrees, mm/h, mm, W/m².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub wind_direction: Option<f64>,
    pub precip_rate: Option<f64>,
    pub precip_total: Option<f64>,
    pub solar_radiation: Option<f64>,
    pub dewpoint: Option<f64>,
    pub heat_index: Option<f64>,
    pub wind_chill: Option<f64>,
    pub uv: Option<f64>,
    #[serde(default)]
    pub obs_type: ObservationType,
    #[serde(default = "default_qc_status")]
    pub qc_status: i64,
    #[serde(default)]
    pub quality_flags: Vec<String>,
    pub aggregation_minutes: Option<i64>,
}

fn default_qc_status() -> i64 {
    QC_VALID
}

impl Observation {
    pub fn new(station_id: &str, observed_at: OffsetDateTime) -> Self {
        Self {
            station_id: station_id.to_owned(),
            observed_at,
            temperature: None,
            humidity: None,
            pressure: None,
            wind_speed: None,
            wind_gust: None,
            wind_direction: None,
            precip_rate: None,
            precip_total: None,
            solar_radiation: None,
            dewpoint: None,
            heat_index: None,
            wind_chill: None,
            uv: None,
            obs_type: ObservationType::Instant,
            qc_status: QC_VALID,
            quality_flags: vec![],
            aggregation_minutes: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.quality_flags.is_empty() && matches!(self.qc_status, QC_VALID | QC_VERIFIED)
    }

    /// Temperature of a clean reading, if any
    pub fn clean_temperature(&self) -> Option<f64> {
        if self.is_clean() {
            self.temperature
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Weather Underground daily forecast
    Wu,
    /// Bureau of Meteorology precis forecast
    Bom,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Wu => "wu",
            Source::Bom => "bom",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wu" => Ok(Source::Wu),
            "bom" => Ok(Source::Bom),
            other => Err(StoreError::Decode(format!("unknown forecast source: {other}"))),
        }
    }
}

/// A forecast as delivered by an upstream provider, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewForecast {
    pub source: Source,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    #[serde(with = "iso_date")]
    pub valid_date: Date,
    pub lead_day: i64,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub precip_chance: Option<f64>,
    pub precip_amount: Option<f64>,
    pub narrative: Option<String>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
}

impl NewForecast {
    /// The stored form of this forecast once it has been assigned `id`.
    pub fn with_id(self, id: i64) -> Forecast {
        Forecast {
            id,
            source: self.source,
            fetched_at: self.fetched_at,
            valid_date: self.valid_date,
            lead_day: self.lead_day,
            temp_max: self.temp_max,
            temp_min: self.temp_min,
            precip_chance: self.precip_chance,
            precip_amount: self.precip_amount,
            narrative: self.narrative,
            wind_speed: self.wind_speed,
            wind_direction: self.wind_direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: i64,
    pub source: Source,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    #[serde(with = "iso_date")]
    pub valid_date: Date,
    pub lead_day: i64,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub precip_chance: Option<f64>,
    pub precip_amount: Option<f64>,
    pub narrative: Option<String>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub forecast_id: i64,
    pub source: Source,
    pub lead_day: i64,
    #[serde(with = "iso_date")]
    pub valid_date: Date,
    pub forecast_max: Option<f64>,
    pub forecast_min: Option<f64>,
    pub actual_max: f64,
    pub actual_min: f64,
    /// forecast - actual
    pub bias_max: Option<f64>,
    pub bias_min: Option<f64>,
    pub bias_wind: Option<f64>,
    pub bias_precip: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Tmax,
    Tmin,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Tmax => "tmax",
            Target::Tmin => "tmin",
        }
    }
}

impl FromStr for Target {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tmax" => Ok(Target::Tmax),
            "tmin" => Ok(Target::Tmin),
            other => Err(StoreError::Decode(format!("unknown target: {other}"))),
        }
    }
}

/// Meteorological character of a day, in priority order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Heatwave,
    Inversion,
    ClearCalm,
    #[default]
    All,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Heatwave => "heatwave",
            Regime::Inversion => "inversion",
            Regime::ClearCalm => "clear_calm",
            Regime::All => "all",
        }
    }
}

impl FromStr for Regime {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heatwave" => Ok(Regime::Heatwave),
            "inversion" => Ok(Regime::Inversion),
            "clear_calm" => Ok(Regime::ClearCalm),
            "all" => Ok(Regime::All),
            other => Err(StoreError::Decode(format!("unknown regime: {other}"))),
        }
    }
}

/// One row of the bias store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionStat {
    pub source: Source,
    pub target: Target,
    pub lead_day: i64,
    pub regime: Regime,
    pub window_days: i64,
    pub sample_size: i64,
    pub mean_bias: f64,
    pub mae: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub station_id: String,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub precip_total: Option<f64>,
    pub solar_integral_mj: Option<f64>,
    pub peak_gust: Option<f64>,
    pub inversion_detected: bool,
    pub inversion_strength: Option<f64>,
    pub calm_night_fraction: Option<f64>,
    pub regime: Regime,
}

/// How one displayed temperature (max or min) was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempExplanation {
    pub source: Option<Source>,
    pub forecast_id: Option<i64>,
    pub raw: Option<f64>,
    pub bias_applied: Option<f64>,
    /// Lead day whose statistics were used, -1 when no bias qualified
    pub bias_day_used: i64,
    pub bias_samples: i64,
    pub bias_fallback: bool,
    /// The correction was computed but thrown out by the sanity check
    pub bias_rejected: bool,
    pub nowcast_adjustment: Option<f64>,
    pub final_value: Option<i64>,
}

impl TempExplanation {
    pub fn empty() -> Self {
        Self {
            bias_day_used: -1,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub max: TempExplanation,
    pub min: TempExplanation,
}

/// Provenance row: what the dashboard showed and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayedForecast {
    #[serde(with = "time::serde::rfc3339")]
    pub displayed_at: OffsetDateTime,
    #[serde(with = "iso_date")]
    pub valid_date: Date,
    pub lead_day: i64,
    pub regime: Regime,
    pub pre_nowcast_max: Option<i64>,
    pub explanation: Explanation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayedVerification {
    #[serde(with = "iso_date")]
    pub valid_date: Date,
    pub lead_day: i64,
    pub final_max: Option<i64>,
    pub final_min: Option<i64>,
    pub raw_max: Option<f64>,
    pub raw_min: Option<f64>,
    pub actual_max: f64,
    pub actual_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowcastLogEntry {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Ok,
    TransientFailure,
    PermanentFailure,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Ok => "ok",
            IngestStatus::TransientFailure => "transient_failure",
            IngestStatus::PermanentFailure => "permanent_failure",
        }
    }
}

/// Audit row for one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRun {
    pub source: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub rows: i64,
    pub status: IngestStatus,
    pub error: Option<String>,
}

/// Typed query interface over the weather database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn upsert_stations(&self, stations: Vec<Station>) -> Result<u64, StoreError>;
    async fn active_stations(&self) -> Result<Vec<Station>, StoreError>;
    async fn primary_station(&self) -> Result<Option<Station>, StoreError>;

    /// Inserts readings, silently skipping any (station, instant) already stored
    async fn insert_observations(&self, observations: Vec<Observation>) -> Result<u64, StoreError>;
    /// Readings of one station in `[start, end)`, oldest first
    async fn observations_between(
        &self,
        station_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Observation>, StoreError>;
    /// Readings of every active station in `[start, end)`, oldest first
    async fn all_observations_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Observation>, StoreError>;
    /// Newest reading per active station at or after `since`
    async fn latest_observations(&self, since: OffsetDateTime)
        -> Result<Vec<Observation>, StoreError>;

    async fn insert_forecasts(&self, forecasts: Vec<NewForecast>) -> Result<u64, StoreError>;
    /// Every forecast for a date, newest fetch first
    async fn forecasts_for_date(&self, valid_date: Date) -> Result<Vec<Forecast>, StoreError>;

    async fn verification_exists(&self, valid_date: Date) -> Result<bool, StoreError>;
    /// Returns false when a record for (source, valid_date) already exists
    async fn insert_verification(&self, record: VerificationRecord) -> Result<bool, StoreError>;
    async fn verifications_since(&self, since: Date) -> Result<Vec<VerificationRecord>, StoreError>;

    /// Swaps the whole bias store for `stats` in a single transaction
    async fn replace_correction_stats(&self, stats: Vec<CorrectionStat>) -> Result<(), StoreError>;
    async fn correction_stats(&self) -> Result<Vec<CorrectionStat>, StoreError>;

    async fn upsert_daily_summary(&self, summary: DailySummary) -> Result<(), StoreError>;
    async fn daily_summaries_between(
        &self,
        station_id: &str,
        start: Date,
        end: Date,
    ) -> Result<Vec<DailySummary>, StoreError>;

    async fn upsert_displayed_forecast(&self, record: DisplayedForecast) -> Result<(), StoreError>;
    async fn displayed_forecasts_for(
        &self,
        valid_date: Date,
    ) -> Result<Vec<DisplayedForecast>, StoreError>;
    async fn insert_displayed_verification(
        &self,
        record: DisplayedVerification,
    ) -> Result<bool, StoreError>;
    async fn displayed_verifications_since(
        &self,
        since: Date,
    ) -> Result<Vec<DisplayedVerification>, StoreError>;

    async fn insert_nowcast_log(&self, entry: NowcastLogEntry) -> Result<(), StoreError>;
    async fn record_ingest_run(&self, run: IngestRun) -> Result<(), StoreError>;
}

/// Storage key for a calendar date: the unix second of its UTC midnight.
pub fn date_key(date: Date) -> i64 {
    date.midnight().assume_utc().unix_timestamp()
}

pub fn date_from_key(key: i64) -> Result<Date, StoreError> {
    Ok(OffsetDateTime::from_unix_timestamp(key)?.date())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn date_keys_are_utc_midnight() {
        let key = date_key(date!(2024 - 01 - 15));
        assert_eq!(key, datetime!(2024-01-15 0:00 UTC).unix_timestamp());
        assert_eq!(date_from_key(key).unwrap(), date!(2024 - 01 - 15));
    }

    #[test]
    fn clean_requires_valid_qc_and_no_flags() {
        let mut obs = Observation::new("PWS1", datetime!(2024-01-15 0:00 UTC));
        obs.temperature = Some(12.0);
        assert!(obs.is_clean());
        assert_eq!(obs.clean_temperature(), Some(12.0));

        obs.qc_status = QC_VERIFIED;
        assert!(obs.is_clean());

        obs.qc_status = 0;
        assert!(!obs.is_clean());
        assert_eq!(obs.clean_temperature(), None);

        obs.qc_status = QC_VALID;
        obs.quality_flags.push("temp_out_of_range".to_string());
        assert!(!obs.is_clean());
    }

    #[test]
    fn forecast_json_uses_plain_dates() {
        let forecast = NewForecast {
            source: Source::Bom,
            fetched_at: datetime!(2024-01-15 5:40 UTC),
            valid_date: date!(2024 - 01 - 16),
            lead_day: 1,
            temp_max: Some(28.0),
            temp_min: None,
            precip_chance: None,
            precip_amount: None,
            narrative: None,
            wind_speed: None,
            wind_direction: None,
        };
        let json = serde_json::to_value(&forecast).unwrap();
        assert_eq!(json["valid_date"], "2024-01-16");
        assert_eq!(json["source"], "bom");
        let back: NewForecast = serde_json::from_value(json).unwrap();
        assert_eq!(back, forecast);
    }

    #[test]
    fn regime_names_match_storage() {
        for regime in [
            Regime::Heatwave,
            Regime::Inversion,
            Regime::ClearCalm,
            Regime::All,
        ] {
            assert_eq!(Regime::from_str(regime.as_str()).unwrap(), regime);
        }
    }
}
