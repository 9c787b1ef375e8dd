//! Persistent bridge configuration model and defaults.

use std::path::{Path, PathBuf};

use log::warn;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Audio output device preferences.
    #[serde(default)]
    pub output: OutputConfig,
    /// Scheduling and buffering behavior.
    #[serde(default)]
    pub buffering: BufferingConfig,
}

/// Output device preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OutputConfig {
    /// Exact device name to open. Empty selects the system default.
    #[serde(default)]
    pub output_device_name: String,
}

/// Scheduling and buffering behavior.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BufferingConfig {
    /// Queued audio required before the first buffer is scheduled.
    #[serde(default = "default_prebuffer_ms")]
    pub prebuffer_ms: u32,
    /// Maximum audio the producer may run ahead of the device clock before
    /// chunks are dropped.
    #[serde(default = "default_max_lead_ms")]
    pub max_lead_ms: u32,
    /// Interval of the over/underflow counter report.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_device_name: String::new(),
        }
    }
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            prebuffer_ms: default_prebuffer_ms(),
            max_lead_ms: default_max_lead_ms(),
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

impl Config {
    /// Platform config file location, `<config dir>/pcmbridge/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pcmbridge").join("config.toml"))
    }

    /// Loads the config at `path`, falling back to defaults when the file is
    /// missing or does not parse.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => Self::default(),
        }
    }

    /// Loads the config from the platform default path.
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Self::default(),
        }
    }

    fn parse(contents: &str) -> Self {
        match toml::from_str(contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("Config: failed to parse config file, using defaults: {e}");
                Self::default()
            }
        }
    }

    /// Writes the config to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> bool {
        let serialized = match toml::to_string_pretty(self) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("Config: failed to serialize config: {e}");
                return false;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Config: failed to create config directory: {e}");
                return false;
            }
        }
        match std::fs::write(path, serialized) {
            Ok(()) => true,
            Err(e) => {
                warn!("Config: failed to write config file: {e}");
                false
            }
        }
    }
}

fn default_prebuffer_ms() -> u32 {
    100
}

fn default_max_lead_ms() -> u32 {
    1_000
}

fn default_stats_interval_ms() -> u32 {
    1_000
}
