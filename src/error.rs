use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering, configuring or running plugins
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin directory does not exist: {}", path.display())]
    ConfigDirMissing { path: PathBuf },

    #[error("Failed to read plugin config {}: {reason}", path.display())]
    ConfigRead { path: PathBuf, reason: String },

    #[error("Failed to decode plugin config {}: {reason}", path.display())]
    ConfigDecode { path: PathBuf, reason: String },

    #[error("exec: unable to parse command: {0}")]
    InvalidCommand(String),

    #[error("exec: {reason} for command '{command}'")]
    Command { command: String, reason: String },

    #[error("Failed to bind listener on {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("Plugin is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal conditions a plugin ran through while still producing a result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginWarning {
    #[error("Can't read config file {}: {reason}", path.display())]
    ConfigUnreadable { path: PathBuf, reason: String },

    #[error("Can't decode config file {}: {reason}", path.display())]
    ConfigMalformed { path: PathBuf, reason: String },
}

impl PluginWarning {
    /// Downgrade a config loading error into a warning, if it is one
    pub fn from_config_error(err: &PluginError) -> Option<Self> {
        match err {
            PluginError::ConfigRead { path, reason } => Some(PluginWarning::ConfigUnreadable {
                path: path.clone(),
                reason: reason.clone(),
            }),
            PluginError::ConfigDecode { path, reason } => Some(PluginWarning::ConfigMalformed {
                path: path.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// Errors that can occur in host collectors
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Collector unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize collector output: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that can occur when delivering a payload
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Collector returned error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to build transport runtime: {0}")]
    Runtime(String),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors returned by a collection cycle
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Can't deliver metrics: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
