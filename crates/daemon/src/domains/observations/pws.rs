use serde::Deserialize;
use slog::{info, warn, Logger};
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{FeedFetcher, FetchError, ObservationPayload};

/// PWS network quality flag for a reading that passed its checks.
const PWS_QC_PASSED: i64 = 1;
const QC_VALID: i64 = 1;
const QC_UNCHECKED: i64 = 0;

pub fn kmh_to_ms(kmh: f64) -> f64 {
    kmh / 3.6
}

#[derive(Debug, Deserialize)]
pub struct PwsResponse {
    #[serde(default)]
    pub observations: Vec<PwsObservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwsObservation {
    #[serde(rename = "stationID")]
    pub station_id: String,
    pub obs_time_utc: String,
    pub humidity: Option<f64>,
    pub winddir: Option<f64>,
    pub solar_radiation: Option<f64>,
    pub uv: Option<f64>,
    pub qc_status: Option<i64>,
    pub metric: Option<PwsMetric>,
}

/// Metric block; wind in km/h, pressure in hPa, rain in mm.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwsMetric {
    pub temp: Option<f64>,
    pub heat_index: Option<f64>,
    pub dewpt: Option<f64>,
    pub wind_chill: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub pressure: Option<f64>,
    pub precip_rate: Option<f64>,
    pub precip_total: Option<f64>,
}

impl TryFrom<PwsObservation> for ObservationPayload {
    type Error = time::error::Parse;

    fn try_from(val: PwsObservation) -> Result<Self, Self::Error> {
        let metric = val.metric.unwrap_or_default();
        Ok(ObservationPayload {
            observed_at: OffsetDateTime::parse(&val.obs_time_utc, &Rfc3339)?,
            station_id: val.station_id,
            temperature: metric.temp,
            humidity: val.humidity,
            pressure: metric.pressure,
            wind_speed: metric.wind_speed.map(kmh_to_ms),
            wind_gust: metric.wind_gust.map(kmh_to_ms),
            wind_direction: val.winddir,
            precip_rate: metric.precip_rate,
            precip_total: metric.precip_total,
            solar_radiation: val.solar_radiation,
            dewpoint: metric.dewpt,
            heat_index: metric.heat_index,
            wind_chill: metric.wind_chill,
            uv: val.uv,
            qc_status: match val.qc_status {
                Some(PWS_QC_PASSED) => QC_VALID,
                _ => QC_UNCHECKED,
            },
        })
    }
}

/// Converts a response body, dropping readings whose timestamp can't be read.
pub fn parse_current(body: PwsResponse, logger: &Logger) -> Vec<ObservationPayload> {
    body.observations
        .into_iter()
        .filter_map(|raw| {
            let station_id = raw.station_id.clone();
            let obs_time = raw.obs_time_utc.clone();
            ObservationPayload::try_from(raw)
                .map_err(|e| {
                    warn!(
                        logger,
                        "skipping {} reading with bad time '{}': {}", station_id, obs_time, e
                    )
                })
                .ok()
        })
        .collect()
}

pub struct PwsService {
    logger: Logger,
    fetcher: Arc<FeedFetcher>,
    base_url: String,
    api_key: String,
}

impl PwsService {
    pub fn new(logger: Logger, fetcher: Arc<FeedFetcher>, base_url: String, api_key: String) -> Self {
        Self {
            logger,
            fetcher,
            base_url,
            api_key,
        }
    }

    /// Latest reading for each station. A station that fails is skipped
    /// unless every station fails, in which case the last error is returned.
    pub async fn current(&self, station_ids: &[String]) -> Result<Vec<ObservationPayload>, FetchError> {
        let mut observations = vec![];
        let mut last_error = None;

        for station_id in station_ids {
            let url = format!(
                "{}/v2/pws/observations/current?stationId={}&format=json&units=m&numericPrecision=decimal&apiKey={}",
                self.base_url, station_id, self.api_key
            );
            match self.fetcher.fetch_json::<PwsResponse>(&url).await {
                Ok(Some(body)) => observations.extend(parse_current(body, &self.logger)),
                Ok(None) => info!(self.logger, "no current reading for {}", station_id),
                Err(e) => {
                    warn!(self.logger, "failed to fetch {}: {}", station_id, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if observations.is_empty() => Err(e),
            _ => Ok(observations),
        }
    }
}
