//! Config file discovery and loading shared by both binaries.
//!
//! Settings resolve highest first: CLI flags, environment variables, the
//! first config file found, built-in defaults. Clap covers the first two;
//! this module finds and parses the file.

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};

use crate::APP_NAME;

/// Where a service's config file was found.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// `--config` or the service's `*_CONFIG` env var
    Explicit(PathBuf),
    CurrentDir(PathBuf),
    /// `$XDG_CONFIG_HOME/valley-wx/`, else `~/.config/valley-wx/`
    XdgConfig(PathBuf),
    /// `/etc/valley-wx/`
    System(PathBuf),
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p)
            | ConfigSource::CurrentDir(p)
            | ConfigSource::XdgConfig(p)
            | ConfigSource::System(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Some(p) => write!(f, "{}", p.display()),
            None => write!(f, "(defaults)"),
        }
    }
}

/// `$var/valley-wx`, else `~/home_relative/valley-wx`.
fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    let base = match (env::var(var), env::var("HOME")) {
        (Ok(dir), _) => PathBuf::from(dir),
        (Err(_), Ok(home)) => PathBuf::from(home).join(home_relative),
        (Err(_), Err(_)) => PathBuf::from(home_relative),
    };
    base.join(APP_NAME)
}

/// First existing `filename` among: the path in `env_var`, the working
/// directory, the XDG config dir, `/etc/valley-wx`.
pub fn find_config_file(env_var: &str, filename: &str) -> ConfigSource {
    let candidates = [
        env::var(env_var)
            .ok()
            .map(|p| ConfigSource::Explicit(PathBuf::from(p))),
        Some(ConfigSource::CurrentDir(PathBuf::from(filename))),
        Some(ConfigSource::XdgConfig(
            xdg_dir("XDG_CONFIG_HOME", ".config").join(filename),
        )),
        Some(ConfigSource::System(
            Path::new("/etc").join(APP_NAME).join(filename),
        )),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|source| source.path().is_some_and(Path::exists))
        .unwrap_or(ConfigSource::Defaults)
}

/// Default home of the dashboard database.
pub fn get_xdg_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Parses the TOML at `source`; `T::default()` when nothing was found.
pub fn load_config<T: DeserializeOwned + Default>(source: &ConfigSource) -> anyhow::Result<T> {
    let Some(path) = source.path() else {
        return Ok(T::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
