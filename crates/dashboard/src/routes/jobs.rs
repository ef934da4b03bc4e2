use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use time::{macros::format_description, Date, OffsetDateTime};

use super::ApiError;
use crate::{
    local_time::{local_date_hour, local_zone, yesterday},
    AppState, DailyJobReport,
};

#[derive(Debug, Deserialize)]
pub struct DailyJobParams {
    /// Local date to process, YYYY-MM-DD. Defaults to yesterday.
    pub date: Option<String>,
}

pub async fn run_daily_job(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DailyJobParams>,
) -> Result<Json<DailyJobReport>, ApiError> {
    let now = OffsetDateTime::now_utc();
    let zone = local_zone(state.service.tuning());
    let date = match params.date {
        Some(raw) => Date::parse(&raw, format_description!("[year]-[month]-[day]"))
            .map_err(|e| ApiError::BadRequest(format!("invalid date '{}': {}", raw, e)))?,
        None => yesterday(now, zone),
    };

    if date >= local_date_hour(now, zone).0 {
        return Err(ApiError::BadRequest(format!(
            "{} has not finished yet, only past days can be verified",
            date
        )));
    }

    Ok(Json(state.service.run_daily(date).await))
}
