use axum::{extract::State, http::StatusCode, Json};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ApiError;
use crate::{AppState, IngestRun, NewForecast, Observation, Station};

#[derive(Debug, Serialize, Deserialize)]
pub struct Inserted {
    pub received: usize,
    pub inserted: u64,
}

pub async fn add_observations(
    State(state): State<Arc<AppState>>,
    Json(observations): Json<Vec<Observation>>,
) -> Result<Json<Inserted>, ApiError> {
    let received = observations.len();
    let inserted = state.service.ingest_observations(observations).await?;
    Ok(Json(Inserted { received, inserted }))
}

pub async fn add_forecasts(
    State(state): State<Arc<AppState>>,
    Json(forecasts): Json<Vec<NewForecast>>,
) -> Result<Json<Inserted>, ApiError> {
    if let Some(bad) = forecasts.iter().find(|f| f.lead_day < 0) {
        return Err(ApiError::BadRequest(format!(
            "negative lead day {} for {} {}",
            bad.lead_day, bad.source, bad.valid_date
        )));
    }
    let received = forecasts.len();
    let inserted = state.store.insert_forecasts(forecasts).await?;
    info!("stored {} of {} forecasts", inserted, received);
    Ok(Json(Inserted { received, inserted }))
}

pub async fn upsert_stations(
    State(state): State<Arc<AppState>>,
    Json(stations): Json<Vec<Station>>,
) -> Result<Json<Inserted>, ApiError> {
    let primaries = stations.iter().filter(|s| s.is_primary && s.active).count();
    if primaries > 1 {
        return Err(ApiError::BadRequest(format!(
            "{} active stations marked primary, at most one allowed",
            primaries
        )));
    }
    let received = stations.len();
    let inserted = state.store.upsert_stations(stations).await?;
    Ok(Json(Inserted { received, inserted }))
}

pub async fn add_ingest_run(
    State(state): State<Arc<AppState>>,
    Json(run): Json<IngestRun>,
) -> Result<StatusCode, ApiError> {
    info!(
        "ingest run {} {}: {} rows{}",
        run.source,
        run.status.as_str(),
        run.rows,
        run.error
            .as_ref()
            .map(|e| format!(", error: {}", e))
            .unwrap_or_default()
    );
    state.store.record_ingest_run(run).await?;
    Ok(StatusCode::CREATED)
}
