//! Valley weather core library
//!
//! Shared pieces for the dashboard and daemon services:
//! - Configuration loading (XDG-compliant)
//! - File system utilities
//! - Correction tuning knobs

mod config;
pub mod fs;
mod tuning;

pub use config::{find_config_file, get_xdg_data_dir, load_config, ConfigSource};
pub use fs::create_dir_all;
pub use tuning::*;

/// Application name used for XDG paths
pub const APP_NAME: &str = "valley-wx";

/// Default dashboard port
pub const DEFAULT_DASHBOARD_PORT: u16 = 9810;

/// Default daemon fetch interval (10 minutes)
pub const DEFAULT_FETCH_INTERVAL: u64 = 600;
