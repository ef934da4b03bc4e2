//! Request bodies accepted by the dashboard's ingestion API.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::{macros::format_description, Date, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationTier {
    ValleyFloor,
    MidSlope,
    Upper,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPayload {
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

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationPayload {
    pub station_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    /// m/s
    pub wind_speed: Option<f64>,
    /// m/s
    pub wind_gust: Option<f64>,
    pub wind_direction: Option<f64>,
    pub precip_rate: Option<f64>,
    pub precip_total: Option<f64>,
    pub solar_radiation: Option<f64>,
    pub dewpoint: Option<f64>,
    pub heat_index: Option<f64>,
    pub wind_chill: Option<f64>,
    pub uv: Option<f64>,
    pub qc_status: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastSource {
    Bom,
    Wu,
}

impl fmt::Display for ForecastSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastSource::Bom => write!(f, "bom"),
            ForecastSource::Wu => write!(f, "wu"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPayload {
    pub source: ForecastSource,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    #[serde(serialize_with = "serialize_date")]
    pub valid_date: Date,
    pub lead_day: i64,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub precip_chance: Option<f64>,
    pub precip_amount: Option<f64>,
    pub narrative: Option<String>,
    /// m/s
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
}

fn serialize_date<S: serde::Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted = date
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Ok,
    TransientFailure,
    PermanentFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestRunPayload {
    pub source: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub rows: i64,
    pub status: IngestStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::{date, datetime};

    #[test]
    fn forecasts_serialize_with_plain_dates() {
        let payload = ForecastPayload {
            source: ForecastSource::Bom,
            fetched_at: datetime!(2024-01-14 18:00 UTC),
            valid_date: date!(2024 - 01 - 15),
            lead_day: 0,
            temp_max: Some(29.0),
            temp_min: None,
            precip_chance: Some(10.0),
            precip_amount: Some(2.0),
            narrative: Some("Mostly sunny.".to_string()),
            wind_speed: None,
            wind_direction: None,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["source"], json!("bom"));
        assert_eq!(value["valid_date"], json!("2024-01-15"));
        assert_eq!(value["fetched_at"], json!("2024-01-14T18:00:00Z"));
        assert_eq!(value["temp_min"], json!(null));
    }

    #[test]
    fn ingest_status_is_snake_case() {
        assert_eq!(
            serde_json::to_value(IngestStatus::TransientFailure).unwrap(),
            json!("transient_failure")
        );
    }
}
