use crate::collectors::{self, Collector};
use crate::config::Settings;
use crate::error::{AgentError, PluginError};
use crate::metrics::{Collected, CollectionResult};
use crate::plugins::{Plugin, PluginConfig, PluginConfigResolver, PluginRegistry};
use crate::transport::{Payload, Transport};
use log::{debug, error, info, warn};
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A service plugin started by [`Agent::run`]
struct RunningService {
    config: PluginConfig,
    plugin: Box<dyn Plugin>,
}

/// Collection scheduler
///
/// Each cycle gathers host collector output, every enabled one-shot plugin and
/// every running service plugin into one [`Payload`] and hands it to the
/// transport. Everything runs on the calling thread.
pub struct Agent {
    interval: Duration,
    registry: Arc<PluginRegistry>,
    resolver: PluginConfigResolver,
    collectors: Vec<Box<dyn Collector>>,
    transport: Box<dyn Transport>,
    machine_id: Option<String>,
    server_key: Option<String>,
    services: Vec<RunningService>,
}

impl Agent {
    pub fn new(
        settings: &Settings,
        registry: Arc<PluginRegistry>,
        transport: Box<dyn Transport>,
        machine_id: Option<String>,
    ) -> Self {
        Self {
            interval: settings.interval(),
            registry,
            resolver: PluginConfigResolver::new(&settings.config_dir),
            collectors: collectors::builtin(settings.top_processes),
            transport,
            machine_id,
            server_key: settings.server_key.clone(),
            services: Vec::new(),
        }
    }

    /// Replace the host collectors
    pub fn with_collectors(mut self, collectors: Vec<Box<dyn Collector>>) -> Self {
        self.collectors = collectors;
        self
    }

    /// Override the interval taken from the settings
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Names of the service plugins currently running
    pub fn running_services(&self) -> Vec<&str> {
        self.services
            .iter()
            .map(|service| service.config.name.as_str())
            .collect()
    }

    /// Run one collection cycle and deliver the result
    pub fn run_once(&mut self, debug: bool) -> Result<(), AgentError> {
        let mut payload = self.new_payload();
        self.collect_host_data(&mut payload);

        for config in self.enabled_plugins() {
            if let Some((outcome, elapsed)) = self.run_plugin(&config) {
                debug!("Plugin {} finished in {:?}", config.name, elapsed);
                absorb(&config.name, outcome, &mut payload.plugins);
            }
        }

        for service in &mut self.services {
            let outcome = service.plugin.collect(&service.config.path);
            absorb(&service.config.name, outcome, &mut payload.plugins);
        }

        info!(
            "Metrics collected (interval: {:?}, plugins: {})",
            self.interval,
            payload.plugins.len()
        );
        self.transport.send(&payload, debug)?;
        Ok(())
    }

    /// Collect every interval until `shutdown` fires or disconnects
    ///
    /// Enabled service plugins are started first and stopped on the way out.
    /// Cycle failures are logged and never end the loop.
    pub fn run(&mut self, shutdown: &Receiver<()>, debug: bool) -> Result<(), AgentError> {
        info!("Agent config: interval {:?}", self.interval);
        self.start_services();

        let mut next_tick = Instant::now() + self.interval;
        loop {
            if let Err(e) = self.run_once(debug) {
                error!("Collection cycle failed: {}", e);
            }

            let (wait, following) = schedule_next(next_tick, Instant::now(), self.interval);
            next_tick = following;

            match shutdown.recv_timeout(wait) {
                Ok(()) => {
                    info!("Shutdown signal received");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Shutdown channel closed");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }

        self.stop_services();
        Ok(())
    }

    /// Print a descriptive single cycle to `out`, then deliver it once in debug mode
    pub fn test_report<W: Write>(&mut self, out: &mut W) -> Result<(), AgentError> {
        let mut payload = self.new_payload();
        self.collect_host_data(&mut payload);

        section(out, "System Metrics")?;
        writeln!(out, "{}", pretty(&payload.system))?;

        section(out, "Process Metrics")?;
        writeln!(out, "{}", pretty(&payload.processes))?;

        section(out, "Plugins")?;
        for config in self.enabled_plugins() {
            let Some((outcome, elapsed)) = self.run_plugin(&config) else {
                continue;
            };

            writeln!(out, "Plugin: {}", config.name)?;
            match &outcome {
                Ok(collected) => {
                    writeln!(out, "{}", pretty(&collected.result))?;
                    for warning in &collected.warnings {
                        writeln!(out, "Warning: {}", warning)?;
                    }
                }
                Err(e) => writeln!(out, "Error: {}", e)?,
            }
            writeln!(out, "Executed in {:?}", elapsed)?;
            writeln!(out)?;

            absorb(&config.name, outcome, &mut payload.plugins);
        }

        section(out, "Host Data")?;
        writeln!(out, "{}", pretty(&payload.host))?;

        section(out, "Testing settings")?;
        if self.machine_id.is_none() && self.server_key.is_none() {
            writeln!(out, "Can't find a machine id or a server key.")?;
            writeln!(out, "To solve this problem, run: hostwatch --machineid")?;
        } else {
            writeln!(out, "Settings OK")?;
        }
        writeln!(out)?;

        self.transport.send(&payload, true)?;
        Ok(())
    }

    /// Run a single one-shot plugin against its resolved config, with timing
    ///
    /// `None` when no one-shot plugin has that name.
    pub fn collect_plugin(&self, name: &str) -> Option<(Result<Collected, PluginError>, Duration)> {
        collect_single_plugin(&self.registry, &self.resolver, name)
    }

    /// Start every enabled service plugin that isn't running yet
    pub fn start_services(&mut self) {
        let configs = match self.resolver.enumerate_services(&self.registry) {
            Ok(configs) => configs,
            Err(PluginError::ConfigDirMissing { path }) => {
                info!("No service plugins enabled ({} is missing)", path.display());
                return;
            }
            Err(e) => {
                error!("Can't enumerate service plugins: {}", e);
                return;
            }
        };

        for config in configs {
            if self.services.iter().any(|s| s.config.name == config.name) {
                continue;
            }
            let Some(mut plugin) = self.registry.create_service(&config.name) else {
                continue;
            };

            let started = match plugin.lifecycle() {
                Some(lifecycle) => lifecycle.start(&config.path),
                None => {
                    warn!("Service plugin {} has no lifecycle, skipping", config.name);
                    continue;
                }
            };

            match started {
                Ok(()) => {
                    info!("Started service plugin {}", config.name);
                    self.services.push(RunningService { config, plugin });
                }
                Err(e) => error!("Can't start service plugin {}: {}", config.name, e),
            }
        }
    }

    /// Stop and drop every running service plugin
    pub fn stop_services(&mut self) {
        for mut service in self.services.drain(..) {
            if let Some(lifecycle) = service.plugin.lifecycle() {
                lifecycle.stop();
            }
            info!("Stopped service plugin {}", service.config.name);
        }
    }

    fn new_payload(&self) -> Payload {
        Payload::new(self.machine_id.clone(), self.server_key.clone())
    }

    fn collect_host_data(&mut self, payload: &mut Payload) {
        for collector in &mut self.collectors {
            match collector.collect() {
                Ok(value) => payload.set_slot(collector.name(), value),
                Err(e) => error!("Collector {} failed: {}", collector.name(), e),
            }
        }
    }

    fn enabled_plugins(&self) -> Vec<PluginConfig> {
        match self.resolver.enumerate(&self.registry) {
            Ok(configs) => configs,
            Err(PluginError::ConfigDirMissing { path }) => {
                info!("No plugins enabled ({} is missing)", path.display());
                Vec::new()
            }
            Err(e) => {
                error!("Can't enumerate plugins: {}", e);
                Vec::new()
            }
        }
    }

    fn run_plugin(
        &self,
        config: &PluginConfig,
    ) -> Option<(Result<Collected, PluginError>, Duration)> {
        let mut plugin = self.registry.create(&config.name)?;
        Some(timed_collect(plugin.as_mut(), &config.path))
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop_services();
    }
}

/// Run one one-shot plugin by name, without an agent around it
///
/// # Arguments
///
/// * `registry` - Where the plugin constructor is looked up
/// * `resolver` - Maps `name` to its config file
/// * `name` - One-shot plugin name
///
/// # Returns
///
/// The collect outcome and how long it took, or `None` when no one-shot
/// plugin is registered under `name`.
pub fn collect_single_plugin(
    registry: &PluginRegistry,
    resolver: &PluginConfigResolver,
    name: &str,
) -> Option<(Result<Collected, PluginError>, Duration)> {
    let config = resolver.resolve(name);
    let mut plugin = registry.create(&config.name)?;
    Some(timed_collect(plugin.as_mut(), &config.path))
}

fn timed_collect(plugin: &mut dyn Plugin, path: &Path) -> (Result<Collected, PluginError>, Duration) {
    let start = Instant::now();
    let outcome = plugin.collect(path);
    (outcome, start.elapsed())
}

/// Log a plugin outcome and merge its metrics into `into`
fn absorb(name: &str, outcome: Result<Collected, PluginError>, into: &mut CollectionResult) {
    match outcome {
        Ok(collected) => {
            for warning in &collected.warnings {
                warn!("Plugin {}: {}", name, warning);
            }
            into.merge(collected.result);
        }
        Err(e) => error!("Can't get stats for plugin {}: {}", name, e),
    }
}

/// How long to wait before the next cycle, and the tick after that
///
/// Ticks sit at fixed multiples of the interval. A cycle that ran past its
/// tick is followed immediately and the schedule restarts from `now`.
fn schedule_next(next_tick: Instant, now: Instant, interval: Duration) -> (Duration, Instant) {
    if next_tick > now {
        (next_tick - now, next_tick + interval)
    } else {
        debug!("Collection cycle overran the interval by {:?}", now - next_tick);
        (Duration::ZERO, now + interval)
    }
}

fn section<W: Write>(out: &mut W, title: &str) -> std::io::Result<()> {
    writeln!(out, "------------------")?;
    writeln!(out, "{}:", title)?;
    writeln!(out)
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {}>", e))
}
