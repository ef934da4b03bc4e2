use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

use super::ApiError;
use crate::{
    correction::InversionState, verification::SkillReport, AppState, CorrectionStat,
    TodayForecast,
};

const DEFAULT_SKILL_DAYS: i64 = 30;
const MAX_SKILL_DAYS: i64 = 365;

#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Health>, ApiError> {
    state
        .store
        .health_check()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    Ok(Json(Health {
        status: String::from("ok"),
    }))
}

pub async fn today(State(state): State<Arc<AppState>>) -> Json<TodayForecast> {
    Json(state.service.today(OffsetDateTime::now_utc()).await)
}

#[derive(Debug, Serialize)]
pub struct InversionResponse {
    /// False when there are no fresh valley and upper readings
    pub available: bool,
    pub state: Option<InversionState>,
}

pub async fn inversion(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InversionResponse>, ApiError> {
    let found = state.service.inversion(OffsetDateTime::now_utc()).await?;
    Ok(Json(InversionResponse {
        available: found.is_some(),
        state: found,
    }))
}

pub async fn correction_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CorrectionStat>>, ApiError> {
    Ok(Json(state.store.correction_stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct SkillParams {
    pub days: Option<i64>,
}

pub async fn forecast_skill(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SkillParams>,
) -> Result<Json<SkillReport>, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_SKILL_DAYS);
    if !(1..=MAX_SKILL_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_SKILL_DAYS
        )));
    }
    Ok(Json(
        state
            .service
            .skill(OffsetDateTime::now_utc(), days)
            .await?,
    ))
}
