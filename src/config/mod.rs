use crate::error::ConfigError;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file read when `--config` is not given
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/opt/hostwatch/hostwatch.toml";

/// Root of the agent's configuration tree
pub const DEFAULT_CONFIG_DIR: &str = "/etc/opt/hostwatch";

const MACHINE_ID_FILE: &str = "machine-id";

/// Agent settings loaded from TOML
///
/// Every key is optional; omitted keys take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory holding `plugins-enabled/` and the machine id
    pub config_dir: PathBuf,
    /// Seconds between collection cycles
    pub interval_seconds: u64,
    /// Base URL of the remote collector
    pub api_host: String,
    pub server_key: Option<String>,
    /// Defaults to `{config_dir}/machine-id`
    pub machine_id_path: Option<PathBuf>,
    pub request_timeout_seconds: u64,
    /// How many processes the process collector reports
    pub top_processes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            interval_seconds: 60,
            api_host: "https://collector.local".to_string(),
            server_key: None,
            machine_id_path: None,
            request_timeout_seconds: 10,
            top_processes: 10,
        }
    }
}

impl Settings {
    /// Parse and validate a settings file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        let url = reqwest::Url::parse(&self.api_host)
            .map_err(|e| ConfigError::ParseError(format!("api_host '{}': {}", self.api_host, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "api_host must use http or https: {}",
                self.api_host
            )));
        }

        Ok(())
    }

    /// Load settings, falling back to defaults when the file is missing or invalid
    pub fn load(path: &Path) -> Settings {
        info!("Loading configuration from: {}", path.display());
        match Self::from_file(path) {
            Ok(settings) => settings,
            Err(ConfigError::ReadError(reason)) => {
                warn!(
                    "Configuration file not found or unreadable ({}), using defaults",
                    reason
                );
                Settings::default()
            }
            Err(e) => {
                error!("Configuration error in '{}': {}", path.display(), e);
                warn!("Using default configuration due to invalid config file");
                Settings::default()
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn machine_id_path(&self) -> PathBuf {
        self.machine_id_path
            .clone()
            .unwrap_or_else(|| self.config_dir.join(MACHINE_ID_FILE))
    }
}
