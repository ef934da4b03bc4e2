use crate::helpers::{spawn_app, station};
use dashboard::{
    local_time::{local_day_bounds, local_zone},
    ElevationTier, NewForecast, Observation, Source, WeatherStore,
};
use hyper::StatusCode;
use time::{Duration, OffsetDateTime};

fn forecast(source: Source, valid_date: time::Date, temp_max: f64, temp_min: f64) -> NewForecast {
    NewForecast {
        source,
        fetched_at: OffsetDateTime::now_utc() - Duration::hours(6),
        valid_date,
        lead_day: 0,
        temp_max: Some(temp_max),
        temp_min: Some(temp_min),
        precip_chance: Some(10.0),
        precip_amount: Some(0.0),
        narrative: Some("Mostly sunny.".to_string()),
        wind_speed: None,
        wind_direction: None,
    }
}

#[tokio::test]
async fn today_prefers_bom_max_and_wu_min() {
    let test_app = spawn_app().await;
    let today = test_app.local_today();
    test_app
        .db
        .upsert_stations(vec![station("FLOOR", ElevationTier::ValleyFloor, 320.0, true)])
        .await
        .unwrap();
    test_app
        .db
        .insert_forecasts(vec![
            forecast(Source::Bom, today, 28.0, 8.0),
            forecast(Source::Wu, today, 30.0, 10.0),
        ])
        .await
        .unwrap();

    let (status, body) = test_app.get("/api/today").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max"], 28);
    assert_eq!(body["min"], 10);
    assert_eq!(body["explanation"]["max"]["source"], "bom");
    assert_eq!(body["explanation"]["min"]["source"], "wu");
    assert_eq!(body["explanation"]["max"]["bias_day_used"], -1);
    assert_eq!(body["regime"], "all");

    let displayed = test_app.db.displayed_forecasts_for(today).await.unwrap();
    assert_eq!(displayed.len(), 1);
    assert_eq!(displayed[0].explanation.max.final_value, Some(28));
    assert_eq!(displayed[0].explanation.min.final_value, Some(10));
}

#[tokio::test]
async fn observed_max_lifts_the_display() {
    let test_app = spawn_app().await;
    let today = test_app.local_today();
    test_app
        .db
        .upsert_stations(vec![station("FLOOR", ElevationTier::ValleyFloor, 320.0, true)])
        .await
        .unwrap();
    test_app
        .db
        .insert_forecasts(vec![forecast(Source::Bom, today, 28.0, 8.0)])
        .await
        .unwrap();

    let now = OffsetDateTime::now_utc();
    let (day_start, _) = local_day_bounds(today, local_zone(&test_app.tuning));
    let mut reading = Observation::new("FLOOR", (now - Duration::minutes(10)).max(day_start));
    reading.temperature = Some(29.6);
    test_app.db.insert_observations(vec![reading]).await.unwrap();

    let (status, body) = test_app.get("/api/today").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max"], 30);
    assert_eq!(body["observed_max"], 29.6);
    assert_eq!(body["current_temperature"], 29.6);
    assert_eq!(body["primary_station"], "FLOOR");
}

#[tokio::test]
async fn empty_database_renders_without_numbers() {
    let test_app = spawn_app().await;

    let (status, body) = test_app.get("/api/today").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["max"].is_null());
    assert!(body["min"].is_null());
    assert!(body["primary_station"].is_null());
}

#[tokio::test]
async fn inversion_reports_live_tiers() {
    let test_app = spawn_app().await;
    test_app
        .db
        .upsert_stations(vec![
            station("FLOOR", ElevationTier::ValleyFloor, 300.0, true),
            station("TOP", ElevationTier::Upper, 1300.0, false),
        ])
        .await
        .unwrap();

    let (_, body) = test_app.get("/api/inversion").await;
    assert_eq!(body["available"], false);

    let at = OffsetDateTime::now_utc() - Duration::minutes(5);
    let mut floor = Observation::new("FLOOR", at);
    floor.temperature = Some(-3.0);
    let mut top = Observation::new("TOP", at);
    top.temperature = Some(7.0);
    test_app
        .db
        .insert_observations(vec![floor, top])
        .await
        .unwrap();

    let (status, body) = test_app.get("/api/inversion").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert_eq!(body["state"]["active"], true);
    assert_eq!(body["state"]["stations_used"], 2);
}

#[tokio::test]
async fn health_checks_storage() {
    let test_app = spawn_app().await;
    let (status, body) = test_app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
