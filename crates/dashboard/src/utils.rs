use clap::Parser;
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};
use log::LevelFilter;
use std::env;
use time::{format_description::well_known::Iso8601, OffsetDateTime};
use valley_wx_core::{
    find_config_file, get_xdg_data_dir, load_config, ConfigSource, Tuning, DEFAULT_DASHBOARD_PORT,
};

pub use valley_wx_core::create_dir_all;

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "Valley weather dashboard - bias-corrected local forecasts"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $VALLEY_DASHBOARD_CONFIG, ./dashboard.toml,
    /// $XDG_CONFIG_HOME/valley-wx/dashboard.toml, /etc/valley-wx/dashboard.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "VALLEY_DASHBOARD_LEVEL")]
    pub level: Option<String>,

    /// Host to listen on (use 0.0.0.0 for all interfaces)
    #[arg(long, env = "VALLEY_DASHBOARD_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "VALLEY_DASHBOARD_PORT")]
    pub port: Option<String>,

    /// Directory holding the SQLite database
    #[arg(short, long, env = "VALLEY_DASHBOARD_DB_DIR")]
    #[serde(alias = "data_dir")]
    pub db_dir: Option<String>,

    /// Correction tuning, only settable from the `[tuning]` table of the config file
    #[arg(skip)]
    #[serde(default)]
    pub tuning: Option<Tuning>,
}

impl Cli {
    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn port(&self) -> String {
        self.port
            .clone()
            .unwrap_or_else(|| DEFAULT_DASHBOARD_PORT.to_string())
    }

    pub fn db_dir(&self) -> String {
        self.db_dir.clone().unwrap_or_else(|| {
            get_xdg_data_dir()
                .join("dashboard")
                .to_string_lossy()
                .to_string()
        })
    }

    pub fn tuning(&self) -> Tuning {
        self.tuning.clone().unwrap_or_default()
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("VALLEY_DASHBOARD_CONFIG", "dashboard.toml")
    };

    if let Some(path) = source.path() {
        log::info!("Loading config from: {}", path.display());
    }

    // logging isn't set up yet
    let file_config: Cli = load_config(&source).unwrap_or_else(|e| {
        eprintln!("ignoring config file: {:#}", e);
        Cli::default()
    });

    merge_config(cli_args, file_config)
}

/// CLI args (and their env vars) win over the file; tuning only comes from the file.
fn merge_config(cli_args: Cli, file_config: Cli) -> Cli {
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        host: cli_args.host.or(file_config.host),
        port: cli_args.port.or(file_config.port),
        db_dir: cli_args.db_dir.or(file_config.db_dir),
        tuning: file_config.tuning,
    }
}

pub fn get_log_level(cli: &Cli) -> LevelFilter {
    let level_str = cli
        .level
        .clone()
        .or_else(|| env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    match level_str.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub fn setup_logger() -> Dispatch {
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let timestamp = OffsetDateTime::now_utc()
                .format(&Iso8601::DEFAULT)
                .unwrap_or_default();
            out.finish(format_args!(
                "[{} {}] {}: {}",
                timestamp,
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .chain(std::io::stdout())
}
