use serde::Deserialize;
use slog::{info, warn, Logger};
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime};

use crate::{FeedFetcher, FetchError, ForecastPayload, ForecastSource};

#[derive(Debug, Deserialize)]
pub struct Product {
    pub amoc: Amoc,
    pub forecast: ForecastBlock,
}

#[derive(Debug, Deserialize)]
pub struct Amoc {
    #[serde(rename = "issue-time-utc")]
    pub issue_time_utc: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastBlock {
    #[serde(rename = "area", default)]
    pub areas: Vec<Area>,
}

#[derive(Debug, Deserialize)]
pub struct Area {
    pub aac: String,
    pub description: String,
    #[serde(rename = "forecast-period", default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
pub struct Period {
    pub index: i64,
    #[serde(rename = "start-time-local")]
    pub start_time_local: String,
    #[serde(rename = "$value", default)]
    pub items: Vec<PeriodItem>,
}

#[derive(Debug, Deserialize)]
pub enum PeriodItem {
    #[serde(rename = "element")]
    Element(Field),
    #[serde(rename = "text")]
    Text(Field),
}

#[derive(Debug, Deserialize)]
pub struct Field {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "$value", default)]
    pub value: String,
}

impl Period {
    fn field(&self, kind: &str) -> Option<&str> {
        self.items.iter().find_map(|item| match item {
            PeriodItem::Element(f) | PeriodItem::Text(f) if f.kind == kind => Some(f.value.trim()),
            _ => None,
        })
    }

    fn number(&self, kind: &str) -> Option<f64> {
        self.field(kind)?.parse().ok()
    }
}

/// "0 to 2 mm" -> 2.0, "5 mm" -> 5.0
pub fn precip_range_upper(range: &str) -> Option<f64> {
    range
        .split_whitespace()
        .filter_map(|token| token.parse::<f64>().ok())
        .last()
}

/// "30%" -> 30.0
pub fn percentage(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').trim().parse().ok()
}

fn local_date(start_time_local: &str) -> Option<Date> {
    let day = start_time_local.get(..10)?;
    Date::parse(day, format_description!("[year]-[month]-[day]")).ok()
}

/// Forecast days for one area code; `forecast-period index` is the lead day.
pub fn parse_product(product: &Product, area_code: &str) -> Option<Vec<ForecastPayload>> {
    let area = product.forecast.areas.iter().find(|a| a.aac == area_code)?;
    let fetched_at = product
        .amoc
        .issue_time_utc
        .as_deref()
        .and_then(|t| OffsetDateTime::parse(t.trim(), &Rfc3339).ok())
        .unwrap_or_else(OffsetDateTime::now_utc);

    Some(
        area.periods
            .iter()
            .filter_map(|period| {
                Some(ForecastPayload {
                    source: ForecastSource::Bom,
                    fetched_at,
                    valid_date: local_date(&period.start_time_local)?,
                    lead_day: period.index,
                    temp_max: period.number("air_temperature_maximum"),
                    temp_min: period.number("air_temperature_minimum"),
                    precip_chance: period
                        .field("probability_of_precipitation")
                        .and_then(percentage),
                    precip_amount: period
                        .field("precipitation_range")
                        .and_then(precip_range_upper),
                    narrative: period.field("precis").map(str::to_string),
                    wind_speed: None,
                    wind_direction: None,
                })
            })
            .collect(),
    )
}

pub struct BomForecastService {
    logger: Logger,
    fetcher: Arc<FeedFetcher>,
    product_url: String,
}

impl BomForecastService {
    pub fn new(logger: Logger, fetcher: Arc<FeedFetcher>, product_url: String) -> Self {
        Self {
            logger,
            fetcher,
            product_url,
        }
    }

    pub async fn get_forecasts(&self, area_code: &str) -> Result<Vec<ForecastPayload>, FetchError> {
        let raw = self.fetcher.fetch_text(&self.product_url).await?;
        let product: Product = serde_xml_rs::from_str(&raw).map_err(|e| FetchError::Decode {
            url: self.product_url.clone(),
            reason: e.to_string(),
        })?;

        match parse_product(&product, area_code) {
            Some(forecasts) => {
                info!(
                    self.logger,
                    "parsed {} bom forecast days for {}",
                    forecasts.len(),
                    area_code
                );
                Ok(forecasts)
            }
            None => {
                warn!(self.logger, "area {} not in {}", area_code, self.product_url);
                Ok(vec![])
            }
        }
    }
}
