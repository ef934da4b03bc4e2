use clap::Parser;
use slog::{o, Drain, Level, Logger};
use std::{
    env,
    time::{Duration, Instant},
};
use valley_wx_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_DASHBOARD_PORT, DEFAULT_FETCH_INTERVAL,
    DEFAULT_TIMEZONE,
};

use crate::StationPayload;

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "Valley weather daemon - fetches observations and forecasts for the dashboard"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $VALLEY_DAEMON_CONFIG, ./daemon.toml,
    /// $XDG_CONFIG_HOME/valley-wx/daemon.toml, /etc/valley-wx/daemon.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "VALLEY_DAEMON_LEVEL")]
    pub level: Option<String>,

    /// Dashboard server URL the fetched batches are posted to
    #[arg(short, long, env = "VALLEY_DAEMON_DASHBOARD_URL")]
    pub dashboard_url: Option<String>,

    /// Fetch interval in seconds
    #[arg(short, long, env = "VALLEY_DAEMON_SLEEP_INTERVAL")]
    pub sleep_interval: Option<u64>,

    /// Rate limiter refill rate in tokens per second
    #[arg(short, long, env = "VALLEY_DAEMON_REFILL_RATE")]
    pub refill_rate: Option<f64>,

    /// Rate limiter token capacity
    #[arg(short, long, env = "VALLEY_DAEMON_TOKEN_CAPACITY")]
    pub token_capacity: Option<usize>,

    /// HTTP User-Agent header for upstream requests
    #[arg(short, long, env = "VALLEY_DAEMON_USER_AGENT")]
    pub user_agent: Option<String>,

    /// API key for the Weather Underground PWS and forecast APIs
    #[arg(long, env = "VALLEY_DAEMON_WU_API_KEY")]
    pub wu_api_key: Option<String>,

    /// Base URL of the Weather Underground APIs
    #[arg(long, env = "VALLEY_DAEMON_WU_BASE_URL")]
    pub wu_base_url: Option<String>,

    /// "lat,lon" the Weather Underground forecast is requested for
    #[arg(long, env = "VALLEY_DAEMON_WU_GEOCODE")]
    pub wu_geocode: Option<String>,

    /// BOM précis product URL (XML)
    #[arg(long, env = "VALLEY_DAEMON_BOM_URL")]
    pub bom_url: Option<String>,

    /// BOM forecast area code within the product, e.g. VIC_PT042
    #[arg(long, env = "VALLEY_DAEMON_BOM_AREA")]
    pub bom_area: Option<String>,

    /// IANA zone the valley keeps its clocks in, e.g. Australia/Melbourne
    #[arg(long, env = "VALLEY_DAEMON_TIMEZONE")]
    pub timezone: Option<String>,

    /// Local hour after which yesterday's verification job is triggered
    #[arg(long, env = "VALLEY_DAEMON_DAILY_JOB_HOUR")]
    pub daily_job_hour: Option<u8>,

    /// Stations to register and poll, only settable from `[[stations]]` in the config file
    #[arg(skip)]
    #[serde(default)]
    pub stations: Vec<StationPayload>,
}

impl Cli {
    pub fn dashboard_url(&self) -> String {
        self.dashboard_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", DEFAULT_DASHBOARD_PORT))
    }

    pub fn sleep_interval(&self) -> u64 {
        self.sleep_interval.unwrap_or(DEFAULT_FETCH_INTERVAL)
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate.unwrap_or(0.2)
    }

    pub fn token_capacity(&self) -> usize {
        self.token_capacity.unwrap_or(5)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("valley-wx-daemon/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn wu_base_url(&self) -> String {
        self.wu_base_url
            .clone()
            .unwrap_or_else(|| "https://api.weather.com".to_string())
    }

    pub fn bom_url(&self) -> String {
        self.bom_url
            .clone()
            .unwrap_or_else(|| "https://reg.bom.gov.au/fwo/IDV10753.xml".to_string())
    }

    pub fn timezone(&self) -> String {
        self.timezone
            .clone()
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string())
    }

    pub fn daily_job_hour(&self) -> u8 {
        self.daily_job_hour.unwrap_or(1)
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("VALLEY_DAEMON_CONFIG", "daemon.toml")
    };

    // logging isn't set up yet
    let file_config: Cli = load_config(&source).unwrap_or_else(|e| {
        eprintln!("ignoring config file: {:#}", e);
        Cli::default()
    });

    merge_config(cli_args, file_config)
}

/// CLI args override file config (env vars are handled by clap)
fn merge_config(cli_args: Cli, file_config: Cli) -> Cli {
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        dashboard_url: cli_args.dashboard_url.or(file_config.dashboard_url),
        sleep_interval: cli_args.sleep_interval.or(file_config.sleep_interval),
        refill_rate: cli_args.refill_rate.or(file_config.refill_rate),
        token_capacity: cli_args.token_capacity.or(file_config.token_capacity),
        user_agent: cli_args.user_agent.or(file_config.user_agent),
        wu_api_key: cli_args.wu_api_key.or(file_config.wu_api_key),
        wu_base_url: cli_args.wu_base_url.or(file_config.wu_base_url),
        wu_geocode: cli_args.wu_geocode.or(file_config.wu_geocode),
        bom_url: cli_args.bom_url.or(file_config.bom_url),
        bom_area: cli_args.bom_area.or(file_config.bom_area),
        timezone: cli_args.timezone.or(file_config.timezone),
        daily_job_hour: cli_args.daily_job_hour.or(file_config.daily_job_hour),
        stations: file_config.stations,
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = match cli.level.as_ref() {
        Some(level) => parse_level(level),
        None => parse_level(&env::var("RUST_LOG").unwrap_or_default()),
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

/// Token bucket in front of upstream requests.
pub struct RateLimiter {
    capacity: usize,
    tokens: f64,
    last_refill: Instant,
    /// Tokens added per second
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(capacity: usize, refill_rate: f64) -> Self {
        RateLimiter {
            capacity,
            tokens: capacity as f64,
            last_refill: Instant::now(),
            refill_rate,
        }
    }

    fn refill_tokens(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Takes a token if one is available, otherwise reports how long until one is.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill_tokens();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        if self.refill_rate <= 0.0 {
            return Err(Duration::from_secs(60));
        }
        Err(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate))
    }
}
