use crate::helpers::spawn_app;
use dashboard::WeatherStore;
use hyper::StatusCode;
use serde_json::json;

#[tokio::test]
async fn rejects_two_primary_stations() {
    let test_app = spawn_app().await;
    let body = json!([
        {"id": "FLOOR", "name": "Floor", "latitude": -36.7, "longitude": 146.9,
         "elevation_m": 320.0, "tier": "valley_floor", "is_primary": true},
        {"id": "TOP", "name": "Top", "latitude": -36.7, "longitude": 146.9,
         "elevation_m": 1300.0, "tier": "upper", "is_primary": true}
    ]);

    let (status, body) = test_app.post("/api/stations", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("primary"));
    assert!(test_app.db.active_stations().await.unwrap().is_empty());
}

#[tokio::test]
async fn stations_default_to_active() {
    let test_app = spawn_app().await;
    let body = json!([
        {"id": "FLOOR", "name": "Floor", "latitude": -36.7, "longitude": 146.9,
         "elevation_m": 320.0, "tier": "valley_floor", "is_primary": true},
        {"id": "MID", "name": "Mid", "latitude": -36.7, "longitude": 146.9,
         "elevation_m": 700.0, "tier": "mid_slope"}
    ]);

    let (status, body) = test_app.post("/api/stations", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], 2);

    let primary = test_app.db.primary_station().await.unwrap().unwrap();
    assert_eq!(primary.id, "FLOOR");
    assert_eq!(test_app.db.active_stations().await.unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_observations_are_ignored() {
    let test_app = spawn_app().await;
    let body = json!([
        {"station_id": "FLOOR", "observed_at": "2024-01-15T03:00:00Z",
         "temperature": 21.4, "humidity": 55.0, "pressure": null, "wind_speed": 1.2,
         "wind_gust": 3.0, "wind_direction": 180.0, "precip_rate": 0.0,
         "precip_total": 0.0, "solar_radiation": 640.0, "dewpoint": null,
         "heat_index": null, "wind_chill": null, "uv": 7.0,
         "aggregation_minutes": null}
    ]);

    let (status, first) = test_app.post("/api/observations", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["inserted"], 1);

    let (status, second) = test_app.post("/api/observations", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["received"], 1);
    assert_eq!(second["inserted"], 0);
}

#[tokio::test]
async fn stores_forecasts_and_rejects_negative_lead_days() {
    let test_app = spawn_app().await;
    let forecast = |lead_day: i64| {
        json!({
            "source": "bom", "fetched_at": "2024-01-14T20:00:00Z",
            "valid_date": "2024-01-16", "lead_day": lead_day,
            "temp_max": 31.0, "temp_min": 14.0, "precip_chance": 20.0,
            "precip_amount": 0.4, "narrative": "Partly cloudy.",
            "wind_speed": null, "wind_direction": null
        })
    };

    let (status, body) = test_app.post("/api/forecasts", json!([forecast(-1)])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = test_app.post("/api/forecasts", json!([forecast(1)])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], 1);

    let stored = test_app
        .db
        .forecasts_for_date(time::macros::date!(2024 - 01 - 16))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].temp_max, Some(31.0));
}

#[tokio::test]
async fn records_ingest_runs() {
    let test_app = spawn_app().await;
    let run = json!({
        "source": "wu_pws", "started_at": "2024-01-15T03:00:00Z",
        "finished_at": "2024-01-15T03:00:04Z", "rows": 12,
        "status": "permanent_failure", "error": "upstream returned 503"
    });

    let (status, _) = test_app.post("/api/ingest-runs", run).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn malformed_payloads_are_client_errors() {
    let test_app = spawn_app().await;
    let (status, _) = test_app
        .post("/api/observations", json!({"not": "a list"}))
        .await;
    assert!(status.is_client_error());
}
