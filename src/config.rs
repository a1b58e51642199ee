//! Persistent watcher configuration model and defaults.

use std::path::{Path, PathBuf};

use log::info;

use crate::{errors::WatcherError, player_registry::DEFAULT_FILTERED_PLAYERS};

const APP_DIR_NAME: &str = "music-watcher";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Play history database location.
    pub database: DatabaseConfig,
    #[serde(default)]
    /// Player filtering.
    pub watcher: WatcherConfig,
    #[serde(default)]
    /// Log verbosity.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DatabaseConfig {
    /// Database file. Falls back to the user data directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct WatcherConfig {
    /// Name suffixes of players that only mirror another player's metadata.
    #[serde(default = "default_filtered_players")]
    pub filtered_players: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            filtered_players: default_filtered_players(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_filtered_players() -> Vec<String> {
    DEFAULT_FILTERED_PLAYERS
        .iter()
        .map(|suffix| suffix.to_string())
        .collect()
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.toml"))
}

pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join("data.db"))
}

/// Reads the config at `path`, writing a default one first if it does not exist.
pub fn load_or_create(path: &Path) -> Result<Config, WatcherError> {
    if !path.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string(&default_config)?)?;
        return Ok(default_config);
    }

    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<Config>(&content)?)
}
