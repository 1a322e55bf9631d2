use crate::error::PluginError;
use crate::plugins::PluginRegistry;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the directory, under the config root, that holds enabled plugin configs
pub const PLUGINS_ENABLED_DIR: &str = "plugins-enabled";

const CONFIG_EXTENSION: &str = ".conf";

/// Location of one plugin's config file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PluginConfig {
    pub path: PathBuf,
    pub name: String,
}

/// Maps plugin names to config files under `{config_dir}/plugins-enabled`
#[derive(Debug, Clone)]
pub struct PluginConfigResolver {
    plugins_dir: PathBuf,
}

impl PluginConfigResolver {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            plugins_dir: config_dir.as_ref().join(PLUGINS_ENABLED_DIR),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Expected config location for `name`; never touches the filesystem
    pub fn resolve(&self, name: &str) -> PluginConfig {
        PluginConfig {
            path: self
                .plugins_dir
                .join(format!("{}{}", name, CONFIG_EXTENSION)),
            name: name.to_string(),
        }
    }

    /// Enabled one-shot plugins: a `{name}.conf` file exists and `name` is registered
    ///
    /// # Arguments
    ///
    /// * `registry` - Only names registered as one-shot plugins are returned
    ///
    /// # Returns
    ///
    /// One `PluginConfig` per enabled plugin, in directory order.
    ///
    /// # Errors
    ///
    /// When the plugins directory is missing it is created (best-effort) and
    /// `PluginError::ConfigDirMissing` is returned; callers should read that as
    /// "no plugins enabled yet". Failures reading the directory surface as
    /// `PluginError::Io`.
    pub fn enumerate(&self, registry: &PluginRegistry) -> Result<Vec<PluginConfig>, PluginError> {
        self.scan(|name| registry.contains(name))
    }

    /// Enabled service plugins, with the same rules as [`Self::enumerate`]
    pub fn enumerate_services(
        &self,
        registry: &PluginRegistry,
    ) -> Result<Vec<PluginConfig>, PluginError> {
        self.scan(|name| registry.contains_service(name))
    }

    fn scan<F>(&self, is_registered: F) -> Result<Vec<PluginConfig>, PluginError>
    where
        F: Fn(&str) -> bool,
    {
        if !self.plugins_dir.exists() {
            if let Err(e) = fs::create_dir_all(&self.plugins_dir) {
                warn!(
                    "Plugin directory doesn't exist and can't be created: {}: {}",
                    self.plugins_dir.display(),
                    e
                );
            }
            return Err(PluginError::ConfigDirMissing {
                path: self.plugins_dir.clone(),
            });
        }

        let mut configs = Vec::new();
        for entry in fs::read_dir(&self.plugins_dir)? {
            let entry = entry?;
            // Follows symlinks; dangling links are skipped
            match fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => {}
                _ => continue,
            }

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(name) = file_name.strip_suffix(CONFIG_EXTENSION) else {
                continue;
            };

            if is_registered(name) {
                configs.push(PluginConfig {
                    path: entry.path(),
                    name: name.to_string(),
                });
            } else {
                debug!("Ignoring config for unknown plugin: {}", file_name);
            }
        }

        Ok(configs)
    }
}

/// Decode a flat JSON plugin config into its typed form
pub fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T, PluginError> {
    let contents = fs::read_to_string(path).map_err(|e| PluginError::ConfigRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    serde_json::from_str(&contents).map_err(|e| PluginError::ConfigDecode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::metrics::Collected;
    use crate::plugins::Plugin;
    use serde::Deserialize;
    use tempfile::TempDir;

    struct NoopPlugin;

    impl Plugin for NoopPlugin {
        fn description(&self) -> &str {
            "Does nothing"
        }

        fn sample_config(&self) -> &str {
            "{}"
        }

        fn collect(&mut self, _config_path: &Path) -> Result<Collected, PluginError> {
            Ok(Collected::default())
        }
    }

    fn registry_with(names: &[&str]) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for name in names {
            registry.add(name, || Box::new(NoopPlugin));
        }
        registry
    }

    fn touch(dir: &Path, file: &str) {
        fs::write(dir.join(file), "{}").unwrap();
    }

    #[test]
    fn test_resolve_builds_path() {
        let resolver = PluginConfigResolver::new("/etc/opt/hostwatch");
        let config = resolver.resolve("testplugin");

        assert_eq!(config.name, "testplugin");
        assert_eq!(
            config.path,
            PathBuf::from("/etc/opt/hostwatch/plugins-enabled/testplugin.conf")
        );
    }

    #[test]
    fn test_resolve_does_not_touch_filesystem() {
        let temp = TempDir::new().unwrap();
        let resolver = PluginConfigResolver::new(temp.path());
        let _ = resolver.resolve("anything");
        assert!(!resolver.plugins_dir().exists());
    }

    #[test]
    fn test_enumerate_missing_directory_creates_it() {
        let temp = TempDir::new().unwrap();
        let resolver = PluginConfigResolver::new(temp.path());

        let result = resolver.enumerate(&registry_with(&["disk"]));
        assert!(matches!(result, Err(PluginError::ConfigDirMissing { .. })));
        assert!(resolver.plugins_dir().is_dir());

        // Second call finds the directory, now empty
        let configs = resolver.enumerate(&registry_with(&["disk"])).unwrap();
        assert!(configs.is_empty());
    }

    #[test]
    fn test_enumerate_filters_unregistered_plugins() {
        let temp = TempDir::new().unwrap();
        let resolver = PluginConfigResolver::new(temp.path());
        fs::create_dir_all(resolver.plugins_dir()).unwrap();

        touch(resolver.plugins_dir(), "disk.conf");
        touch(resolver.plugins_dir(), "cpu.conf");
        touch(resolver.plugins_dir(), "notaplugin.conf");

        let mut configs = resolver.enumerate(&registry_with(&["disk", "cpu"])).unwrap();
        configs.sort();

        assert_eq!(
            configs,
            vec![
                PluginConfig {
                    path: resolver.plugins_dir().join("cpu.conf"),
                    name: "cpu".to_string(),
                },
                PluginConfig {
                    path: resolver.plugins_dir().join("disk.conf"),
                    name: "disk".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_enumerate_ignores_bogus_files() {
        let temp = TempDir::new().unwrap();
        let resolver = PluginConfigResolver::new(temp.path());
        let dir = resolver.plugins_dir().to_path_buf();
        fs::create_dir_all(&dir).unwrap();

        let names: Vec<String> = (1..=5).map(|i| format!("plugin{}", i)).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let registry = registry_with(&name_refs);

        for name in &names {
            touch(&dir, &format!("{}.conf", name));
        }
        assert_eq!(resolver.enumerate(&registry).unwrap().len(), 5);

        for name in &names {
            touch(&dir, &format!("{}.bogus", name));
            touch(&dir, &format!("{}.conf.bak", name));
        }
        fs::create_dir_all(dir.join("plugin6.conf")).unwrap();

        let configs = resolver.enumerate(&registry).unwrap();
        assert_eq!(configs.len(), 5, "Ignore bogus configs");
        assert!(configs.iter().all(|c| c.path.starts_with(&dir)));
    }

    #[cfg(unix)]
    #[test]
    fn test_enumerate_follows_symlinked_configs() {
        let temp = TempDir::new().unwrap();
        let resolver = PluginConfigResolver::new(temp.path());
        let available = temp.path().join("plugins-available");
        fs::create_dir_all(&available).unwrap();
        fs::create_dir_all(resolver.plugins_dir()).unwrap();

        touch(&available, "telegraf.conf");
        std::os::unix::fs::symlink(
            available.join("telegraf.conf"),
            resolver.plugins_dir().join("telegraf.conf"),
        )
        .unwrap();
        std::os::unix::fs::symlink(
            available.join("missing.conf"),
            resolver.plugins_dir().join("disk.conf"),
        )
        .unwrap();

        let configs = resolver
            .enumerate(&registry_with(&["telegraf", "disk"]))
            .unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "telegraf");
        assert_eq!(configs[0].path, resolver.plugins_dir().join("telegraf.conf"));
    }

    #[test]
    fn test_enumerate_services_uses_service_namespace() {
        let temp = TempDir::new().unwrap();
        let resolver = PluginConfigResolver::new(temp.path());
        fs::create_dir_all(resolver.plugins_dir()).unwrap();
        touch(resolver.plugins_dir(), "statsd.conf");
        touch(resolver.plugins_dir(), "telegraf.conf");

        let registry = PluginRegistry::with_builtin();

        let plugins = resolver.enumerate(&registry).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "telegraf");

        let services = resolver.enumerate_services(&registry).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "statsd");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct SampleConfig {
        config: String,
    }

    #[test]
    fn test_read_config_decodes_flat_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sample.conf");
        fs::write(&path, r#"{"config": "/etc/telegraf/telegraf.conf"}"#).unwrap();

        let config: SampleConfig = read_config(&path).unwrap();
        assert_eq!(config.config, "/etc/telegraf/telegraf.conf");
    }

    #[test]
    fn test_read_config_errors() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.conf");
        let result: Result<SampleConfig, _> = read_config(&missing);
        assert!(matches!(result, Err(PluginError::ConfigRead { .. })));

        let malformed = temp.path().join("malformed.conf");
        fs::write(&malformed, "not json").unwrap();
        let result: Result<SampleConfig, _> = read_config(&malformed);
        assert!(matches!(result, Err(PluginError::ConfigDecode { .. })));
    }
}
