use anyhow::{bail, Context};
use clap::Parser;
use hostwatch::agent::collect_single_plugin;
use hostwatch::config::{Settings, DEFAULT_SETTINGS_PATH};
use hostwatch::identity::get_or_create_machine_id;
use hostwatch::{Agent, HttpTransport, PluginConfigResolver, PluginRegistry, Transport};
use log::{error, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

/// Command-line arguments for the hostwatch agent
#[derive(Parser)]
#[command(
    name = "hostwatch",
    version,
    about = "Host telemetry agent - collects system and plugin metrics and ships them to a collector"
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Echo every payload to stdout before delivery
    #[arg(long)]
    debug: bool,

    /// Run one descriptive collection cycle and exit
    #[arg(long)]
    test: bool,

    /// List the available plugins
    #[arg(long)]
    list_plugins: bool,

    /// Print the sample config of a plugin
    #[arg(long, value_name = "NAME")]
    plugin_config: Option<String>,

    /// Run a single plugin and print its result with timing
    #[arg(long, value_name = "NAME")]
    test_plugin: Option<String>,

    /// Print the machine id, creating it if needed
    #[arg(long)]
    machineid: bool,

    /// Write the process id to this file
    #[arg(long, value_name = "FILE")]
    pidfile: Option<PathBuf>,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in Settings::load
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(ref pidfile) = self.pidfile {
            if pidfile.is_dir() {
                return Err(format!("PID file path is a directory: {}", pidfile.display()));
            }
        }

        for (flag, name) in [
            ("--plugin-config", &self.plugin_config),
            ("--test-plugin", &self.test_plugin),
        ] {
            if matches!(name, Some(name) if name.trim().is_empty()) {
                return Err(format!("{} needs a plugin name", flag));
            }
        }

        Ok(())
    }

    fn settings_path(&self) -> &Path {
        self.config
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_PATH))
    }
}

/// Sample config of a one-shot or service plugin
fn sample_config_for(registry: &PluginRegistry, name: &str) -> Option<String> {
    registry
        .create(name)
        .or_else(|| registry.create_service(name))
        .map(|plugin| plugin.sample_config().to_string())
}

fn list_plugins<W: Write>(registry: &PluginRegistry, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "Plugins:")?;
    for name in registry.names() {
        if let Some(plugin) = registry.create(name) {
            writeln!(out, "  {:<12} {}", name, plugin.description())?;
        }
    }

    writeln!(out, "Services:")?;
    for name in registry.service_names() {
        if let Some(plugin) = registry.create_service(name) {
            writeln!(out, "  {:<12} {}", name, plugin.description())?;
        }
    }
    Ok(())
}

/// Write the current PID, creating parent directories with mode 0700
fn write_pidfile(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(parent)
            .with_context(|| format!("Can't create PID file directory {}", parent.display()))?;
    }

    fs::write(path, std::process::id().to_string())
        .with_context(|| format!("Can't write PID file {}", path.display()))?;
    info!("Wrote PID file {}", path.display());
    Ok(())
}

/// Run one plugin and print its result with timing
///
/// Only the registry and the config resolver are involved; no identity or
/// transport is set up.
fn test_plugin<W: Write>(
    registry: &PluginRegistry,
    settings: &Settings,
    name: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    let resolver = PluginConfigResolver::new(&settings.config_dir);
    let Some((outcome, elapsed)) = collect_single_plugin(registry, &resolver, name) else {
        bail!("Non existing plugin: {}", name);
    };

    let collected = outcome.with_context(|| format!("Plugin {} failed", name))?;
    for warning in &collected.warnings {
        warn!("{}", warning);
    }
    writeln!(out, "{}", serde_json::to_string_pretty(&collected.result)?)?;
    writeln!(out, "Executed in {:?}", elapsed)?;
    Ok(())
}

/// Descriptive single cycle; a missing identity is reported, not fatal
fn test_mode<W: Write>(
    settings: &Settings,
    registry: Arc<PluginRegistry>,
    transport: Box<dyn Transport>,
    out: &mut W,
) -> anyhow::Result<()> {
    let machine_id = get_or_create_machine_id(&settings.machine_id_path());
    let mut agent = Agent::new(settings, registry, transport, machine_id);
    agent.test_report(out)?;
    Ok(())
}

/// The daemon loop refuses to start without a machine id or a server key
fn ensure_identity(machine_id: Option<&str>, settings: &Settings) -> anyhow::Result<()> {
    if machine_id.is_none() && settings.server_key.is_none() {
        bail!(
            "Can't find a machine id ({}) or a server key. Run `hostwatch --machineid` to create one.",
            settings.machine_id_path().display()
        );
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let registry = Arc::new(PluginRegistry::with_builtin());
    let mut stdout = std::io::stdout().lock();

    if cli.list_plugins {
        list_plugins(&registry, &mut stdout)?;
        return Ok(());
    }

    if let Some(name) = &cli.plugin_config {
        match sample_config_for(&registry, name) {
            Some(sample) => writeln!(stdout, "{}", sample)?,
            None => bail!("Non existing plugin: {}", name),
        }
        return Ok(());
    }

    let settings = Settings::load(cli.settings_path());

    if cli.machineid {
        match get_or_create_machine_id(&settings.machine_id_path()) {
            Some(id) => writeln!(stdout, "{}", id)?,
            None => bail!(
                "Can't create machine id at {}",
                settings.machine_id_path().display()
            ),
        }
        return Ok(());
    }

    if let Some(name) = &cli.test_plugin {
        return test_plugin(&registry, &settings, name, &mut stdout);
    }

    let transport = HttpTransport::new(
        &settings.api_host,
        settings.server_key.clone(),
        settings.request_timeout(),
    )
    .context("Failed to initialize transport")?;

    if cli.test {
        return test_mode(&settings, registry, Box::new(transport), &mut stdout);
    }
    drop(stdout);

    let machine_id = get_or_create_machine_id(&settings.machine_id_path());
    ensure_identity(machine_id.as_deref(), &settings)?;
    let mut agent = Agent::new(&settings, registry, Box::new(transport), machine_id);

    if let Some(pidfile) = &cli.pidfile {
        write_pidfile(pidfile)?;
    }

    let (shutdown_sender, shutdown_receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("hostwatch is running. Press Ctrl+C to stop.");
    agent.run(&shutdown_receiver, cli.debug)?;
    info!("hostwatch shutdown complete");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli() -> Cli {
        Cli::parse_from(["hostwatch"])
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "hostwatch",
            "--config",
            "/tmp/hw.toml",
            "--debug",
            "--test-plugin",
            "telegraf",
            "--pidfile",
            "/run/hostwatch/hostwatch.pid",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/hw.toml")));
        assert!(cli.debug);
        assert!(!cli.test);
        assert_eq!(cli.test_plugin.as_deref(), Some("telegraf"));
        assert_eq!(cli.pidfile, Some(PathBuf::from("/run/hostwatch/hostwatch.pid")));
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hostwatch.toml");
        fs::write(&path, "interval_seconds = 30").unwrap();

        let cli = Cli {
            config: Some(path),
            ..cli()
        };
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/hostwatch.toml")),
            ..cli()
        };

        // Missing files fall back to defaults
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let temp = TempDir::new().unwrap();

        let cli = Cli {
            config: Some(temp.path().to_path_buf()),
            ..cli()
        };
        assert!(cli.validate().is_err());

        let cli = Cli {
            pidfile: Some(temp.path().to_path_buf()),
            ..self::cli()
        };
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_validation_empty_plugin_name() {
        let cli = Cli {
            test_plugin: Some(" ".to_string()),
            ..cli()
        };
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_settings_path_default() {
        assert_eq!(cli().settings_path(), Path::new(DEFAULT_SETTINGS_PATH));
    }

    #[test]
    fn test_sample_config_lookup() {
        let registry = PluginRegistry::with_builtin();
        assert!(sample_config_for(&registry, "telegraf")
            .unwrap()
            .contains("telegraf.conf"));
        assert!(sample_config_for(&registry, "statsd")
            .unwrap()
            .contains("address"));
        assert!(sample_config_for(&registry, "missing").is_none());
    }

    #[test]
    fn test_list_plugins_output() {
        let registry = PluginRegistry::with_builtin();
        let mut out = Vec::new();
        list_plugins(&registry, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let services_at = text.find("Services:").unwrap();
        assert!(text.find("telegraf").unwrap() < services_at);
        assert!(text.find("statsd").unwrap() > services_at);
    }

    /// Transport recording the debug flag of every send
    struct RecordingTransport {
        sends: Arc<std::sync::Mutex<Vec<bool>>>,
    }

    impl Transport for RecordingTransport {
        fn send(
            &self,
            _payload: &hostwatch::Payload,
            debug: bool,
        ) -> Result<(), hostwatch::TransportError> {
            self.sends.lock().unwrap().push(debug);
            Ok(())
        }
    }

    /// Settings whose machine id can never be created
    fn settings_without_identity(temp: &TempDir) -> Settings {
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        Settings {
            config_dir: temp.path().to_path_buf(),
            machine_id_path: Some(blocker.join("machine-id")),
            server_key: None,
            ..Settings::default()
        }
    }

    #[test]
    fn test_mode_reports_missing_identity_instead_of_failing() {
        let temp = TempDir::new().unwrap();
        let settings = settings_without_identity(&temp);
        let sends = Arc::new(std::sync::Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            sends: Arc::clone(&sends),
        };

        let mut out = Vec::new();
        test_mode(
            &settings,
            Arc::new(PluginRegistry::new()),
            Box::new(transport),
            &mut out,
        )
        .unwrap();

        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("hostwatch --machineid"));
        assert_eq!(*sends.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_ensure_identity() {
        let temp = TempDir::new().unwrap();
        let settings = settings_without_identity(&temp);
        assert!(ensure_identity(None, &settings).is_err());
        assert!(ensure_identity(Some("abc"), &settings).is_ok());

        let settings = Settings {
            server_key: Some("key1".to_string()),
            ..settings
        };
        assert!(ensure_identity(None, &settings).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_plugin_runs_without_identity() {
        let temp = TempDir::new().unwrap();
        let plugins_dir = temp.path().join("plugins-enabled");
        fs::create_dir_all(&plugins_dir).unwrap();
        fs::write(plugins_dir.join("statsd.conf"), "{}").unwrap();
        let settings = Settings {
            config_dir: temp.path().to_path_buf(),
            ..Settings::default()
        };

        let mut registry = PluginRegistry::new();
        registry.add("telegraf", || {
            Box::new(hostwatch::plugins::TelegrafPlugin::with_binary("/bin/echo"))
        });

        let mut out = Vec::new();
        test_plugin(&registry, &settings, "telegraf", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Executed in"));
        assert!(!temp.path().join("machine-id").exists());

        let mut out = Vec::new();
        assert!(test_plugin(&registry, &settings, "statsd", &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_write_pidfile_creates_private_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run").join("hostwatch.pid");

        write_pidfile(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(temp.path().join("run")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
