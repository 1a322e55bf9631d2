/// Error types for plugins, collectors, transport and settings
pub mod error;

/// Metric records and grouped collection results
pub mod metrics;

/// Plugin registry, config discovery and built-in plugins
pub mod plugins;

/// Built-in host collectors
pub mod collectors;

/// Payload delivery to the remote collector
pub mod transport;

/// Agent settings
pub mod config;

/// Persistent machine identity
pub mod identity;

/// Collection scheduler
pub mod agent;

// Re-export commonly used types
pub use agent::Agent;
pub use config::Settings;
pub use error::{AgentError, CollectorError, ConfigError, PluginError, PluginWarning, TransportError};
pub use metrics::{Collected, CollectionResult, Metric};
pub use plugins::{Plugin, PluginConfigResolver, PluginRegistry};
pub use transport::{HttpTransport, Payload, Transport};
