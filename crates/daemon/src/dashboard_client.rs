use anyhow::{anyhow, Context};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use slog::{debug, Logger};
use time::{macros::format_description, Date};

use crate::{build_client, ForecastPayload, IngestRunPayload, ObservationPayload, StationPayload};

#[derive(Debug, Deserialize)]
pub struct Inserted {
    pub received: usize,
    pub inserted: u64,
}

/// Posts fetched batches to the dashboard's ingestion API.
pub struct DashboardClient {
    logger: Logger,
    client: ClientWithMiddleware,
    base_url: String,
}

impl DashboardClient {
    pub fn new(logger: Logger, base_url: String, user_agent: &str) -> anyhow::Result<Self> {
        Ok(Self {
            logger,
            client: build_client(user_agent).context("failed to build dashboard client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(self.logger, "posting to {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("error sending request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", url, status, text));
        }
        Ok(response)
    }

    async fn post_batch<T: Serialize>(&self, path: &str, batch: &[T]) -> anyhow::Result<Inserted> {
        if batch.is_empty() {
            return Ok(Inserted {
                received: 0,
                inserted: 0,
            });
        }
        let response = self.post(path, batch).await?;
        response
            .json::<Inserted>()
            .await
            .with_context(|| format!("unexpected response from {}", path))
    }

    pub async fn upsert_stations(&self, stations: &[StationPayload]) -> anyhow::Result<Inserted> {
        self.post_batch("/api/stations", stations).await
    }

    pub async fn add_observations(
        &self,
        observations: &[ObservationPayload],
    ) -> anyhow::Result<Inserted> {
        self.post_batch("/api/observations", observations).await
    }

    pub async fn add_forecasts(&self, forecasts: &[ForecastPayload]) -> anyhow::Result<Inserted> {
        self.post_batch("/api/forecasts", forecasts).await
    }

    pub async fn record_ingest_run(&self, run: &IngestRunPayload) -> anyhow::Result<()> {
        self.post("/api/ingest-runs", run).await?;
        Ok(())
    }

    /// Runs summary, verification and stats for a finished local day.
    pub async fn run_daily_job(&self, date: Date) -> anyhow::Result<serde_json::Value> {
        let date = date.format(format_description!("[year]-[month]-[day]"))?;
        let response = self
            .post(&format!("/api/jobs/daily?date={}", date), &serde_json::json!({}))
            .await?;
        response
            .json()
            .await
            .context("unexpected daily job response")
    }
}
