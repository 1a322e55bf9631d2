/// Plugin registry with one-shot and service namespaces
pub mod registry;

/// Plugin config path resolution and discovery
pub mod resolver;

/// Scrape adapter for the telegraf test-mode output
pub mod telegraf;

/// StatsD UDP listener service plugin
pub mod statsd;

pub use registry::{Lifecycle, Plugin, PluginFactory, PluginRegistry};
pub use resolver::{PluginConfig, PluginConfigResolver, PLUGINS_ENABLED_DIR};
pub use statsd::StatsdPlugin;
pub use telegraf::TelegrafPlugin;
