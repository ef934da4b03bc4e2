use serde::Deserialize;
use slog::{info, Logger};
use std::sync::Arc;
use time::{macros::format_description, Date, OffsetDateTime};

use crate::{kmh_to_ms, FeedFetcher, FetchError, ForecastPayload, ForecastSource};

/// Parallel arrays, one entry per calendar day starting today.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WuForecast {
    pub calendar_day_temperature_max: Vec<Option<f64>>,
    pub calendar_day_temperature_min: Vec<Option<f64>>,
    #[serde(default)]
    pub narrative: Vec<Option<String>>,
    #[serde(default)]
    pub qpf: Vec<Option<f64>>,
    pub valid_time_local: Vec<String>,
    #[serde(default)]
    pub daypart: Vec<WuDaypart>,
}

/// Day/night halves, two entries per calendar day.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WuDaypart {
    #[serde(default)]
    pub precip_chance: Vec<Option<f64>>,
    /// km/h
    #[serde(default)]
    pub wind_speed: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_direction: Vec<Option<f64>>,
}

fn at<T: Clone>(values: &[Option<T>], index: usize) -> Option<T> {
    values.get(index).cloned().flatten()
}

/// Larger of the day and night halves of a calendar day.
fn daypart_max(values: &[Option<f64>], day: usize) -> Option<f64> {
    match (at(values, day * 2), at(values, day * 2 + 1)) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Daytime half when published, otherwise the night.
fn daypart_first(values: &[Option<f64>], day: usize) -> Option<f64> {
    at(values, day * 2).or_else(|| at(values, day * 2 + 1))
}

fn local_date(valid_time_local: &str) -> Option<Date> {
    let day = valid_time_local.get(..10)?;
    Date::parse(day, format_description!("[year]-[month]-[day]")).ok()
}

pub fn parse_forecast(body: &WuForecast, fetched_at: OffsetDateTime) -> Vec<ForecastPayload> {
    let daypart = body.daypart.first();
    body.valid_time_local
        .iter()
        .enumerate()
        .filter_map(|(lead_day, valid_time)| {
            let valid_date = local_date(valid_time)?;
            Some(ForecastPayload {
                source: ForecastSource::Wu,
                fetched_at,
                valid_date,
                lead_day: lead_day as i64,
                temp_max: at(&body.calendar_day_temperature_max, lead_day),
                temp_min: at(&body.calendar_day_temperature_min, lead_day),
                precip_chance: daypart.and_then(|d| daypart_max(&d.precip_chance, lead_day)),
                precip_amount: at(&body.qpf, lead_day),
                narrative: at(&body.narrative, lead_day),
                wind_speed: daypart
                    .and_then(|d| daypart_max(&d.wind_speed, lead_day))
                    .map(kmh_to_ms),
                wind_direction: daypart.and_then(|d| daypart_first(&d.wind_direction, lead_day)),
            })
        })
        .collect()
}

pub struct WuForecastService {
    logger: Logger,
    fetcher: Arc<FeedFetcher>,
    base_url: String,
    api_key: String,
}

impl WuForecastService {
    pub fn new(logger: Logger, fetcher: Arc<FeedFetcher>, base_url: String, api_key: String) -> Self {
        Self {
            logger,
            fetcher,
            base_url,
            api_key,
        }
    }

    pub async fn get_forecasts(&self, geocode: &str) -> Result<Vec<ForecastPayload>, FetchError> {
        let url = format!(
            "{}/v3/wx/forecast/daily/5day?geocode={}&format=json&units=m&language=en-AU&apiKey={}",
            self.base_url, geocode, self.api_key
        );
        let fetched_at = OffsetDateTime::now_utc();
        let Some(body) = self.fetcher.fetch_json::<WuForecast>(&url).await? else {
            info!(self.logger, "empty wu forecast for {}", geocode);
            return Ok(vec![]);
        };
        let forecasts = parse_forecast(&body, fetched_at);
        info!(self.logger, "parsed {} wu forecast days", forecasts.len());
        Ok(forecasts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    const BODY: &str = r#"{
        "calendarDayTemperatureMax": [33, 35, 29],
        "calendarDayTemperatureMin": [14, 16, null],
        "dayOfWeek": ["Monday", "Tuesday", "Wednesday"],
        "narrative": ["Sunny.", "Hot and sunny.", null],
        "qpf": [0.0, 0.0, 4.2],
        "temperatureMax": [null, 35, 29],
        "validTimeLocal": [
            "2024-01-15T07:00:00+1100",
            "2024-01-16T07:00:00+1100",
            "2024-01-17T07:00:00+1100"
        ],
        "daypart": [{
            "precipChance": [null, 10, 5, 20, 60, 40],
            "windSpeed": [null, 9, 18, 7, 36, 11],
            "windDirection": [null, 200, 340, 180, 270, 250]
        }]
    }"#;

    #[test]
    fn index_is_the_lead_day() {
        let body: WuForecast = serde_json::from_str(BODY).unwrap();
        let fetched_at = datetime!(2024-01-14 21:00 UTC);
        let forecasts = parse_forecast(&body, fetched_at);

        assert_eq!(forecasts.len(), 3);
        assert_eq!(forecasts[0].valid_date, date!(2024 - 01 - 15));
        assert_eq!(forecasts[0].lead_day, 0);
        assert_eq!(forecasts[0].temp_max, Some(33.0));
        assert_eq!(forecasts[0].precip_chance, Some(10.0));
        assert!((forecasts[0].wind_speed.unwrap() - 2.5).abs() < 1e-9);
        assert_eq!(forecasts[0].wind_direction, Some(200.0));

        assert_eq!(forecasts[2].lead_day, 2);
        assert_eq!(forecasts[2].temp_min, None);
        assert_eq!(forecasts[2].precip_chance, Some(60.0));
        assert_eq!(forecasts[2].precip_amount, Some(4.2));
        assert_eq!(forecasts[2].narrative, None);
        assert!(forecasts.iter().all(|f| f.source == ForecastSource::Wu));
        assert!(forecasts.iter().all(|f| f.fetched_at == fetched_at));
    }

    #[test]
    fn unreadable_days_are_dropped() {
        let body = WuForecast {
            calendar_day_temperature_max: vec![Some(30.0)],
            calendar_day_temperature_min: vec![Some(12.0)],
            narrative: vec![],
            qpf: vec![],
            valid_time_local: vec!["garbage".to_string()],
            daypart: vec![],
        };
        assert!(parse_forecast(&body, datetime!(2024-01-14 21:00 UTC)).is_empty());
    }
}
