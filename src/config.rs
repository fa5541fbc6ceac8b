//! Persistent application configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

const APP_DIR_NAME: &str = "resumer";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// External player preferences.
    pub player: PlayerConfig,
    #[serde(default)]
    /// Session behavior.
    pub session: SessionConfig,
    #[serde(default)]
    /// Resume-state location.
    pub storage: StorageConfig,
    #[serde(default)]
    /// Terminal layout.
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// External player process settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_command")]
    pub command: String,
    /// Extra arguments placed ahead of the generated ones.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub show_video: bool,
}

/// Session controller settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SessionConfig {
    /// Advance to the next item after one ends naturally.
    #[serde(default = "default_true")]
    pub autoplay: bool,
    /// Background threads used for playlist loading.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Upper bound for "Playing ..." status refreshes.
    #[serde(default = "default_position_updates_per_second")]
    pub position_updates_per_second: u32,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    /// Overrides the default `state.json` location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DisplayConfig {
    /// Row width in columns.
    #[serde(default = "default_display_width")]
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Overrides the default `resumer.log` location for interactive sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_player_command() -> String {
    "mpv".to_string()
}

fn default_worker_threads() -> usize {
    2
}

fn default_position_updates_per_second() -> u32 {
    2
}

fn default_display_width() -> usize {
    80
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: Vec::new(),
            show_video: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autoplay: true,
            worker_threads: default_worker_threads(),
            position_updates_per_second: default_position_updates_per_second(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_display_width(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => log::LevelFilter::Off,
            "error" => log::LevelFilter::Error,
            "info" => log::LevelFilter::Info,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Warn,
        }
    }
}

/// Clamps values into supported ranges.
pub fn sanitize_config(config: Config) -> Config {
    let mut config = config;
    config.session.worker_threads = config.session.worker_threads.clamp(1, 8);
    config.session.position_updates_per_second =
        config.session.position_updates_per_second.clamp(1, 30);
    config.display.width = config.display.width.clamp(40, 400);
    if config.player.command.trim().is_empty() {
        config.player.command = default_player_command();
    }
    config
}

pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.toml"))
}

pub fn default_state_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join("state.json"))
}

pub fn default_log_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join("resumer.log"))
}

/// Reads `config_file`, creating it with defaults when missing.
///
/// Unreadable or invalid files fall back to defaults.
pub fn load_config(config_file: &Path) -> Config {
    if !config_file.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        if let Err(err) = write_config(config_file, &default_config) {
            warn!(
                "Failed to write default config {}: {}",
                config_file.display(),
                err
            );
        }
        return default_config;
    }

    let config = match std::fs::read_to_string(config_file) {
        Ok(content) => toml::from_str::<Config>(&content).unwrap_or_else(|err| {
            warn!(
                "Invalid config {}, using defaults: {}",
                config_file.display(),
                err
            );
            Config::default()
        }),
        Err(err) => {
            warn!("Failed to read config {}: {}", config_file.display(), err);
            Config::default()
        }
    };
    sanitize_config(config)
}

fn write_config(config_file: &Path, config: &Config) -> Result<(), String> {
    if let Some(parent) = config_file.parent() {
        std::fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    }
    let encoded = toml::to_string(config).map_err(|err| err.to_string())?;
    std::fs::write(config_file, encoded).map_err(|err| err.to_string())
}

/// Resolves the state file from CLI override, config, then platform default.
pub fn resolve_state_file(cli_override: Option<&Path>, config: &Config) -> Option<PathBuf> {
    cli_override
        .map(Path::to_path_buf)
        .or_else(|| config.storage.state_file.clone())
        .or_else(default_state_file)
}

/// Resolves the session log file from config, then platform default.
pub fn resolve_log_file(config: &Config) -> Option<PathBuf> {
    config.logging.file.clone().or_else(default_log_file)
}

/// Opens `log_file` for appending, creating missing parent directories.
pub fn open_log_file(log_file: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
}
