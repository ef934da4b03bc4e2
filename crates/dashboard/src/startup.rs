use crate::{
    add_forecasts, add_ingest_run, add_observations, correction_stats, forecast_skill, health,
    inversion, run_daily_job, today, upsert_stations, DashboardService, Database, WeatherStore,
};
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use hyper::{
    header::{ACCEPT, CONTENT_TYPE},
    Method,
};
use log::info;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use valley_wx_core::Tuning;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WeatherStore>,
    pub service: DashboardService,
}

impl AppState {
    pub fn new(store: Arc<dyn WeatherStore>, tuning: Tuning) -> Self {
        Self {
            service: DashboardService::new(store.clone(), tuning),
            store,
        }
    }
}

pub async fn build_app_state(
    db_dir: &str,
    tuning: Tuning,
) -> Result<(AppState, Arc<Database>), anyhow::Error> {
    let db = Arc::new(
        Database::new(db_dir)
            .await
            .map_err(|e| anyhow!("error setting up SQLite database: {}", e))?,
    );
    Ok((AppState::new(db.clone(), tuning), db))
}

pub fn app(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        // Display
        .route("/api/today", get(today))
        .route("/api/inversion", get(inversion))
        .route("/api/stats", get(correction_stats))
        .route("/api/skill", get(forecast_skill))
        // Ingestion
        .route("/api/observations", post(add_observations))
        .route("/api/forecasts", post(add_forecasts))
        .route("/api/stations", post(upsert_stations))
        .route("/api/ingest-runs", post(add_ingest_run))
        // Jobs
        .route("/api/jobs/daily", post(run_daily_job))
        .with_state(Arc::new(app_state))
        .layer(middleware::from_fn(log_request))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default()
        .to_owned();
    info!(target: "http_request","new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}
