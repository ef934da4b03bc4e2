use crate::helpers::{spawn_app, station, TestApp};
use dashboard::{
    local_time::{local_instant, local_zone},
    ElevationTier, NewForecast, Observation, Source, WeatherStore,
};
use hyper::StatusCode;
use time::{macros::date, Date, Duration};

async fn seed_day(test_app: &TestApp, day: Date) {
    let zone = local_zone(&test_app.tuning);
    test_app
        .db
        .upsert_stations(vec![station("FLOOR", ElevationTier::ValleyFloor, 320.0, true)])
        .await
        .unwrap();

    let readings = [(5, 12.0), (9, 19.5), (15, 31.0), (21, 22.0)];
    let observations = readings
        .iter()
        .map(|(hour, temp)| {
            let mut obs = Observation::new("FLOOR", local_instant(day, *hour, zone));
            obs.temperature = Some(*temp);
            obs.wind_gust = Some(6.0);
            obs.precip_total = Some(0.0);
            obs
        })
        .collect();
    test_app.db.insert_observations(observations).await.unwrap();

    let fetched_at = local_instant(day, 0, zone) - Duration::hours(6);
    let forecast = |source: Source, temp_max: f64, temp_min: f64| NewForecast {
        source,
        fetched_at,
        valid_date: day,
        lead_day: 1,
        temp_max: Some(temp_max),
        temp_min: Some(temp_min),
        precip_chance: Some(5.0),
        precip_amount: Some(0.0),
        narrative: None,
        wind_speed: None,
        wind_direction: None,
    };
    test_app
        .db
        .insert_forecasts(vec![
            forecast(Source::Bom, 29.0, 11.0),
            forecast(Source::Wu, 33.0, 13.0),
        ])
        .await
        .unwrap();
}

#[tokio::test]
async fn refuses_days_that_have_not_finished() {
    let test_app = spawn_app().await;
    let today = test_app.local_today();

    let (status, body) = test_app
        .post_empty(&format!("/api/jobs/daily?date={}", today))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = test_app.post_empty("/api/jobs/daily?date=15-01-2024").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verifies_once_and_recomputes_stats() {
    let test_app = spawn_app().await;
    let day = date!(2024 - 01 - 15);
    seed_day(&test_app, day).await;

    let (status, report) = test_app.post_empty("/api/jobs/daily?date=2024-01-15").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["date"], "2024-01-15");
    assert_eq!(report["verified"], 2);
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);
    assert_eq!(report["summary"]["temp_max"], 31.0);
    assert_eq!(report["summary"]["temp_min"], 12.0);

    let records = test_app.db.verifications_since(day).await.unwrap();
    assert_eq!(records.len(), 2);
    let bom = records.iter().find(|r| r.source == Source::Bom).unwrap();
    assert_eq!(bom.bias_max, Some(-2.0));
    assert_eq!(bom.bias_min, Some(-1.0));

    let (status, again) = test_app.post_empty("/api/jobs/daily?date=2024-01-15").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["verified"], 0);
    assert_eq!(test_app.db.verifications_since(day).await.unwrap().len(), 2);

    let (status, stats) = test_app.get("/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    let rows = stats.as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows
        .iter()
        .any(|row| row["source"] == "wu" && row["target"] == "tmax" && row["mean_bias"] == 2.0));
}

#[tokio::test]
async fn skill_window_is_bounded() {
    let test_app = spawn_app().await;

    let (status, _) = test_app.get("/api/skill?days=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = test_app.get("/api/skill?days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["samples"], 0);
}
