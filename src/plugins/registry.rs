use crate::error::PluginError;
use crate::metrics::Collected;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A pluggable data source invoked once per collection cycle
///
/// One-shot plugins only implement `collect`. Long-running plugins also expose
/// a [`Lifecycle`] through [`Plugin::lifecycle`]; the registry never drives that
/// lifecycle itself, the scheduler does.
pub trait Plugin: Send {
    /// One-sentence description of the plugin
    fn description(&self) -> &str;

    /// Example of the JSON config the plugin understands
    fn sample_config(&self) -> &str;

    /// Gather metrics using the config file at `config_path`
    fn collect(&mut self, config_path: &Path) -> Result<Collected, PluginError>;

    /// Start/stop capability of service plugins
    fn lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
        None
    }
}

/// Lifecycle of a service plugin: `Idle --start--> Running --stop--> Idle`
pub trait Lifecycle {
    /// Acquire background resources. On failure the plugin stays idle.
    fn start(&mut self, config_path: &Path) -> Result<(), PluginError>;

    /// Release background resources; a no-op when already idle
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Constructor producing a fresh plugin instance
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Name to constructor tables for one-shot and service plugins
///
/// Built once at startup and shared read-only afterwards. Registering the same
/// name twice in one namespace replaces the earlier constructor.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginFactory>,
    services: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every plugin shipped with the agent
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.add("telegraf", || Box::new(super::TelegrafPlugin::new()));
        registry.add_service("statsd", || Box::new(super::StatsdPlugin::new()));
        registry
    }

    /// Register a one-shot plugin constructor
    pub fn add<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.plugins.insert(name.to_string(), Arc::new(constructor));
    }

    /// Register a service plugin constructor
    pub fn add_service<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.services.insert(name.to_string(), Arc::new(constructor));
    }

    /// Build a fresh one-shot plugin instance
    pub fn create(&self, name: &str) -> Option<Box<dyn Plugin>> {
        self.plugins.get(name).map(|constructor| constructor())
    }

    /// Build a fresh service plugin instance
    pub fn create_service(&self, name: &str) -> Option<Box<dyn Plugin>> {
        self.services.get(name).map(|constructor| constructor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn contains_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered one-shot plugin names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered service plugin names, sorted
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .field("services", &self.service_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CollectionResult;

    struct FixedPlugin {
        value: &'static str,
    }

    impl Plugin for FixedPlugin {
        fn description(&self) -> &str {
            "Reports a fixed value"
        }

        fn sample_config(&self) -> &str {
            "{}"
        }

        fn collect(&mut self, _config_path: &Path) -> Result<Collected, PluginError> {
            let mut result = CollectionResult::new();
            result.insert("fixed", "value", self.value);
            Ok(Collected::new(result))
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = PluginRegistry::with_builtin();
        assert!(registry.contains("telegraf"));
        assert!(!registry.contains("statsd"));
        assert!(registry.contains_service("statsd"));
        assert_eq!(registry.names(), vec!["telegraf"]);
        assert_eq!(registry.service_names(), vec!["statsd"]);
    }

    #[test]
    fn test_namespaces_are_independent() {
        let mut registry = PluginRegistry::new();
        registry.add("cpu", || Box::new(FixedPlugin { value: "1" }));

        assert!(registry.create("cpu").is_some());
        assert!(registry.create_service("cpu").is_none());
        assert!(registry.create("missing").is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = PluginRegistry::new();
        registry.add("cpu", || Box::new(FixedPlugin { value: "first" }));
        registry.add("cpu", || Box::new(FixedPlugin { value: "second" }));

        assert_eq!(registry.names().len(), 1);
        let mut plugin = registry.create("cpu").unwrap();
        let collected = plugin.collect(Path::new("/nonexistent")).unwrap();
        assert_eq!(collected.result.gauge("fixed", "value"), Some("second"));
    }

    #[test]
    fn test_create_returns_fresh_instances() {
        let mut registry = PluginRegistry::new();
        registry.add("cpu", || Box::new(FixedPlugin { value: "1" }));

        let first = registry.create("cpu");
        let second = registry.create("cpu");
        assert!(first.is_some() && second.is_some());
    }

    #[test]
    fn test_one_shot_plugins_have_no_lifecycle() {
        let registry = PluginRegistry::with_builtin();
        let mut telegraf = registry.create("telegraf").unwrap();
        assert!(telegraf.lifecycle().is_none());

        let mut statsd = registry.create_service("statsd").unwrap();
        let lifecycle = statsd.lifecycle().unwrap();
        assert!(!lifecycle.is_running());
    }

    #[test]
    fn test_empty_name_is_accepted() {
        let mut registry = PluginRegistry::new();
        registry.add("", || Box::new(FixedPlugin { value: "1" }));
        assert!(registry.contains(""));
    }
}
