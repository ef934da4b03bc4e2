use anyhow::anyhow;
use daemon::{
    daily_job_due, get_config_info, setup_logger, BomForecastService, Cli, DashboardClient,
    FeedFetcher, Feeds, Ingestor, PwsService, RateLimiter, WuForecastService,
};
use slog::{error, info, warn, Logger};
use std::{sync::Arc, time::Duration};
use time::{Date, OffsetDateTime};
use time_tz::{timezones, Tz};
use tokio::{signal, sync::Mutex, time::interval};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = get_config_info();
    let logger = setup_logger(&cli);

    info!(logger, "Valley daemon starting...");
    info!(logger, "  Dashboard URL: {}", cli.dashboard_url());
    info!(logger, "  Fetch interval: {} seconds", cli.sleep_interval());
    info!(logger, "  Stations: {}", cli.stations.len());

    let zone = timezones::get_by_name(&cli.timezone())
        .ok_or_else(|| anyhow!("unknown timezone: {}", cli.timezone()))?;
    info!(logger, "  Local zone: {}", cli.timezone());

    let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
        cli.token_capacity(),
        cli.refill_rate(),
    )));
    let fetcher = Arc::new(FeedFetcher::new(
        logger.clone(),
        &cli.user_agent(),
        rate_limiter,
    )?);
    let dashboard = DashboardClient::new(logger.clone(), cli.dashboard_url(), &cli.user_agent())?;
    let ingestor = Ingestor::new(logger.clone(), dashboard, build_feeds(&cli, &logger, fetcher));

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone(), logger.clone()));

    run(cli, logger.clone(), ingestor, zone, token).await;
    info!(logger, "Valley daemon stopped");
    Ok(())
}

fn build_feeds(cli: &Cli, logger: &Logger, fetcher: Arc<FeedFetcher>) -> Feeds {
    let station_ids: Vec<String> = cli.stations.iter().map(|s| s.id.clone()).collect();

    let (pws, wu) = match cli.wu_api_key.clone() {
        Some(key) => {
            let pws = (!station_ids.is_empty()).then(|| {
                (
                    PwsService::new(logger.clone(), fetcher.clone(), cli.wu_base_url(), key.clone()),
                    station_ids,
                )
            });
            let wu = cli.wu_geocode.clone().map(|geocode| {
                (
                    WuForecastService::new(logger.clone(), fetcher.clone(), cli.wu_base_url(), key),
                    geocode,
                )
            });
            (pws, wu)
        }
        None => {
            warn!(logger, "no wu_api_key configured, skipping PWS observations and WU forecasts");
            (None, None)
        }
    };

    let bom = match cli.bom_area.clone() {
        Some(area) => Some((
            BomForecastService::new(logger.clone(), fetcher, cli.bom_url()),
            area,
        )),
        None => {
            warn!(logger, "no bom_area configured, skipping BOM forecasts");
            None
        }
    };

    Feeds { pws, wu, bom }
}

async fn run(
    cli: Cli,
    logger: Logger,
    ingestor: Ingestor,
    zone: &'static Tz,
    token: CancellationToken,
) {
    let sleep_between_checks = cli.sleep_interval();
    let mut stations_registered = cli.stations.is_empty();
    let mut last_daily_job: Option<Date> = None;

    let mut ticker = interval(Duration::from_secs(sleep_between_checks));
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !stations_registered {
            match ingestor.dashboard().upsert_stations(&cli.stations).await {
                Ok(result) => {
                    info!(logger, "registered {} stations", result.received);
                    stations_registered = true;
                }
                Err(e) => error!(logger, "failed to register stations: {:#}", e),
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = ingestor.run_cycle() => {}
        }

        if let Some(date) = daily_job_due(
            OffsetDateTime::now_utc(),
            zone,
            cli.daily_job_hour(),
            last_daily_job,
        ) {
            match ingestor.dashboard().run_daily_job(date).await {
                Ok(report) => {
                    info!(logger, "daily job for {} done: {}", date, report);
                    last_daily_job = Some(date);
                }
                Err(e) => error!(logger, "daily job for {} failed: {:#}", date, e),
            }
        }

        info!(
            logger,
            "Finished cycle, waiting {} seconds for next run", sleep_between_checks
        );
    }
}

async fn cancel_on_signal(token: CancellationToken, logger: Logger) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(logger, "failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(logger, "failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(logger, "shutdown requested");
    token.cancel();
}
