use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use dashboard::{
    app,
    local_time::{local_date_hour, local_zone},
    AppState, Database, ElevationTier, Station,
};
use hyper::{header, Method};
use serde_json::Value;
use std::sync::Arc;
use time::{Date, OffsetDateTime};
use tower::ServiceExt;
use valley_wx_core::Tuning;

pub struct TestApp {
    pub app: Router,
    pub db: Arc<Database>,
    pub tuning: Tuning,
}

pub async fn spawn_app() -> TestApp {
    let db = Arc::new(
        Database::in_memory()
            .await
            .expect("Failed to create in-memory database"),
    );
    let tuning = Tuning::default();
    let state = AppState::new(db.clone(), tuning.clone());
    TestApp {
        app: app(state),
        db,
        tuning,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request.");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::POST, uri, None).await
    }

    pub fn local_today(&self) -> Date {
        local_date_hour(OffsetDateTime::now_utc(), local_zone(&self.tuning)).0
    }
}

pub fn station(id: &str, tier: ElevationTier, elevation_m: f64, is_primary: bool) -> Station {
    Station {
        id: id.to_string(),
        name: format!("{} station", id),
        latitude: -36.73,
        longitude: 146.96,
        elevation_m,
        tier,
        is_primary,
        active: true,
    }
}
