use slog::{error, info, warn, Logger};
use std::future::Future;
use time::{Date, Duration, OffsetDateTime};
use time_tz::{OffsetDateTimeExt, Tz};

use crate::{
    BomForecastService, DashboardClient, FetchError, IngestRunPayload, IngestStatus, PwsService,
    WuForecastService,
};

/// Upstream feeds the daemon polls; a feed left unconfigured is skipped.
pub struct Feeds {
    pub pws: Option<(PwsService, Vec<String>)>,
    pub wu: Option<(WuForecastService, String)>,
    pub bom: Option<(BomForecastService, String)>,
}

pub struct Ingestor {
    logger: Logger,
    dashboard: DashboardClient,
    feeds: Feeds,
}

/// Upstream failures keep their transient/permanent split, everything else
/// (mostly the dashboard being unreachable) is worth retrying.
fn classify(err: &anyhow::Error) -> IngestStatus {
    match err.downcast_ref::<FetchError>() {
        Some(FetchError::Permanent { .. }) | Some(FetchError::Decode { .. }) => {
            IngestStatus::PermanentFailure
        }
        _ => IngestStatus::TransientFailure,
    }
}

impl Ingestor {
    pub fn new(logger: Logger, dashboard: DashboardClient, feeds: Feeds) -> Self {
        Self {
            logger,
            dashboard,
            feeds,
        }
    }

    pub fn dashboard(&self) -> &DashboardClient {
        &self.dashboard
    }

    /// Runs one feed and writes its outcome to the ingest audit table.
    async fn audited<Fut>(&self, source: &str, work: Fut)
    where
        Fut: Future<Output = anyhow::Result<u64>>,
    {
        let started_at = OffsetDateTime::now_utc();
        let outcome = work.await;
        let finished_at = OffsetDateTime::now_utc();

        let run = match &outcome {
            Ok(rows) => {
                info!(self.logger, "{}: stored {} rows", source, rows);
                IngestRunPayload {
                    source: source.to_string(),
                    started_at,
                    finished_at,
                    rows: *rows as i64,
                    status: IngestStatus::Ok,
                    error: None,
                }
            }
            Err(e) => {
                let status = classify(e);
                error!(self.logger, "{} failed ({:?}): {:#}", source, status, e);
                IngestRunPayload {
                    source: source.to_string(),
                    started_at,
                    finished_at,
                    rows: 0,
                    status,
                    error: Some(format!("{:#}", e)),
                }
            }
        };

        if let Err(e) = self.dashboard.record_ingest_run(&run).await {
            warn!(self.logger, "failed to record ingest run for {}: {:#}", source, e);
        }
    }

    pub async fn run_cycle(&self) {
        if let Some((pws, station_ids)) = &self.feeds.pws {
            self.audited("pws", async {
                let observations = pws.current(station_ids).await?;
                Ok(self.dashboard.add_observations(&observations).await?.inserted)
            })
            .await;
        }

        if let Some((wu, geocode)) = &self.feeds.wu {
            self.audited("wu_forecast", async {
                let forecasts = wu.get_forecasts(geocode).await?;
                Ok(self.dashboard.add_forecasts(&forecasts).await?.inserted)
            })
            .await;
        }

        if let Some((bom, area)) = &self.feeds.bom {
            self.audited("bom_forecast", async {
                let forecasts = bom.get_forecasts(area).await?;
                Ok(self.dashboard.add_forecasts(&forecasts).await?.inserted)
            })
            .await;
        }
    }
}

/// The finished local day whose daily job is due, if it hasn't run yet.
///
/// Yesterday becomes due once the local clock passes `after_hour`, giving
/// late observations time to arrive.
pub fn daily_job_due(
    now: OffsetDateTime,
    zone: &Tz,
    after_hour: u8,
    last_run: Option<Date>,
) -> Option<Date> {
    let local = now.to_timezone(zone);
    if local.hour() < after_hour {
        return None;
    }
    let yesterday = local.date() - Duration::days(1);
    match last_run {
        Some(done) if done >= yesterday => None,
        _ => Some(yesterday),
    }
}
