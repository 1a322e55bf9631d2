use crate::error::{PluginError, PluginWarning};
use crate::metrics::{format_number, Collected, CollectionResult, Metric, ParsedLine};
use crate::plugins::resolver::read_config;
use crate::plugins::Plugin;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};

/// Namespace prefixed to every measurement reported by this adapter
pub const NAMESPACE: &str = "telegraf";

/// Default location of the telegraf binary
pub const DEFAULT_BINARY: &str = "/usr/bin/telegraf";

/// First field of every line that carries a measurement
const MEASUREMENT_MARKER: &str = ">";

const SAMPLE_CONFIG: &str = r#"
#   Available config options:
#
#     {"config": "/etc/telegraf/telegraf.conf"}
#
#
# Config location: /etc/opt/hostwatch/plugins-enabled/telegraf.conf
"#;

/// Plugin config: path to telegraf's own configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelegrafConfig {
    pub config: String,
}

/// Scrape adapter for telegraf
///
/// Runs `telegraf -test -config <path>` and rebuilds metrics from the
/// measurement lines it prints. Every tagged measurement becomes a
/// `telegraf.<measurement>` namespace in the returned [`CollectionResult`].
pub struct TelegrafPlugin {
    binary: String,
    config: TelegrafConfig,
}

impl Default for TelegrafPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegrafPlugin {
    pub fn new() -> Self {
        Self::with_binary(DEFAULT_BINARY)
    }

    /// Use a telegraf binary at a non-default location
    ///
    /// # Arguments
    ///
    /// * `binary` - Path of the executable run in place of `/usr/bin/telegraf`
    ///
    /// # Example
    ///
    /// ```rust
    /// use hostwatch::plugins::TelegrafPlugin;
    ///
    /// let plugin = TelegrafPlugin::with_binary("/opt/telegraf/bin/telegraf");
    /// assert!(plugin.command_line().starts_with("/opt/telegraf/bin/telegraf -test"));
    /// ```
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            config: TelegrafConfig::default(),
        }
    }

    /// Load the plugin config, falling back to an empty one on failure
    fn load_config(&mut self, config_path: &Path) -> Vec<PluginWarning> {
        match read_config::<TelegrafConfig>(config_path) {
            Ok(config) => {
                self.config = config;
                Vec::new()
            }
            Err(e) => {
                warn!("{}", e);
                self.config = TelegrafConfig::default();
                PluginWarning::from_config_error(&e).into_iter().collect()
            }
        }
    }

    /// Command string passed to [`run_command`]
    pub fn command_line(&self) -> String {
        format!(
            "{} -test -config {}",
            shell_words::quote(&self.binary),
            shell_words::quote(&self.config.config)
        )
    }
}

impl Plugin for TelegrafPlugin {
    fn description(&self) -> &str {
        "Collects data from Telegraf"
    }

    fn sample_config(&self) -> &str {
        SAMPLE_CONFIG
    }

    fn collect(&mut self, config_path: &Path) -> Result<Collected, PluginError> {
        let warnings = self.load_config(config_path);
        let command = self.command_line();

        let output = run_command(&command).map_err(|e| {
            error!("Can't execute command: {}", e);
            e
        })?;

        let result = parse_output(&output);
        debug!(
            "telegraf reported {} measurement namespaces",
            result.len()
        );

        Ok(Collected::with_warnings(result, warnings))
    }
}

/// Run `command` without a shell and return its standard output
///
/// The command string is split with shell quoting rules so quoted arguments
/// keep embedded spaces. Standard error is discarded.
pub fn run_command(command: &str) -> Result<String, PluginError> {
    let argv = shell_words::split(command)
        .map_err(|e| PluginError::InvalidCommand(format!("{}: '{}'", e, command)))?;

    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PluginError::InvalidCommand("empty command".to_string()))?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| PluginError::Command {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(PluginError::Command {
            command: command.to_string(),
            reason: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse every line of telegraf output and group the metrics by namespace
pub fn parse_output(output: &str) -> CollectionResult {
    output
        .lines()
        .flat_map(|line| parse_line(line).elements)
        .collect()
}

/// Parse one line of `telegraf -test` output
///
/// Only lines shaped like
/// `> ping,url=www.google.com average_response_ms=2.596,packets_received=1i 1454321712994367057`
/// produce metrics; banners, warnings, untagged measurements and anything
/// else come back empty.
pub fn parse_line(line: &str) -> ParsedLine {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 4 || fields[0] != MEASUREMENT_MARKER {
        return ParsedLine::default();
    }

    // ping,url=www.google.com
    let meta: Vec<&str> = split_nonempty(fields[1], ',').collect();
    if meta.len() < 2 {
        return ParsedLine::default();
    }

    let plugin = format!("{}.{}", NAMESPACE, meta[0]);
    let qualifier = chart_qualifier(&meta[1..]);

    let elements = split_nonempty(fields[2], ',')
        .filter_map(|entry| {
            let parts: Vec<&str> = split_nonempty(entry, '=').collect();
            let [name, raw] = parts.as_slice() else {
                return None;
            };

            Some(Metric::new(
                plugin.clone(),
                format!("{}_{}", qualifier, normalize_field_name(name)),
                normalize_value(raw),
            ))
        })
        .collect();

    ParsedLine {
        elements,
        timestamp: fields[3].parse().ok(),
    }
}

/// `url=www.google.com` -> `url:wwwgooglecom`; several tags are joined with `|`
pub fn chart_qualifier(tags: &[&str]) -> String {
    tags.join("|").replace('.', "").replace('=', ":")
}

/// `average_response_ms` -> `average.response.ms`
pub fn normalize_field_name(name: &str) -> String {
    name.replace('_', ".")
}

/// Shortest decimal form for numbers; otherwise drop every `i` (integer suffix)
pub fn normalize_value(raw: &str) -> String {
    match raw.parse::<f64>() {
        Ok(value) => format_number(value),
        Err(_) => raw.replace('i', ""),
    }
}

fn split_nonempty(s: &str, separator: char) -> impl Iterator<Item = &str> + '_ {
    s.split(separator).filter(|part| !part.is_empty())
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// Identifier made of lowercase letters and underscores
    #[derive(Debug, Clone)]
    struct Ident(String);

    impl Arbitrary for Ident {
        fn arbitrary(g: &mut Gen) -> Self {
            let alphabet: Vec<char> = "abcdefghijklmnopqrstuvwxyz_".chars().collect();
            let len = 1 + usize::arbitrary(g) % 12;
            let mut ident: String = (0..len).map(|_| *g.choose(&alphabet).unwrap()).collect();
            // Keep at least one letter so the identifier never collapses to nothing
            ident.push('x');
            Ident(ident)
        }
    }

    /// A well-formed measurement line plus the number of fields it carries
    #[derive(Debug, Clone)]
    struct MeasurementLine {
        measurement: String,
        tags: Vec<String>,
        fields: Vec<String>,
    }

    impl Arbitrary for MeasurementLine {
        fn arbitrary(g: &mut Gen) -> Self {
            let tag_count = 1 + usize::arbitrary(g) % 4;
            let field_count = 1 + usize::arbitrary(g) % 6;

            let tags = (0..tag_count)
                .map(|_| format!("{}={}.local", Ident::arbitrary(g).0, Ident::arbitrary(g).0))
                .collect();
            let fields = (0..field_count)
                .map(|_| {
                    let value = if bool::arbitrary(g) {
                        format!("{}i", u32::arbitrary(g))
                    } else {
                        format!("{}", f64::from(i16::arbitrary(g)) / 8.0)
                    };
                    format!("{}={}", Ident::arbitrary(g).0, value)
                })
                .collect();

            MeasurementLine {
                measurement: Ident::arbitrary(g).0,
                tags,
                fields,
            }
        }
    }

    impl MeasurementLine {
        fn render(&self) -> String {
            format!(
                "> {},{} {} 1454321712994367057",
                self.measurement,
                self.tags.join(","),
                self.fields.join(",")
            )
        }
    }

    #[quickcheck]
    fn prop_one_metric_per_field(line: MeasurementLine) -> bool {
        let parsed = parse_line(&line.render());
        let tag_refs: Vec<&str> = line.tags.iter().map(String::as_str).collect();
        let qualifier = chart_qualifier(&tag_refs);
        let plugin = format!("telegraf.{}", line.measurement);

        parsed.elements.len() == line.fields.len()
            && parsed
                .elements
                .iter()
                .all(|m| m.plugin == plugin && m.gauge.starts_with(&format!("{}_", qualifier)))
    }

    #[quickcheck]
    fn prop_parsing_is_idempotent(line: String) -> bool {
        parse_line(&line) == parse_line(&line)
    }

    #[quickcheck]
    fn prop_structured_parsing_is_idempotent(line: MeasurementLine) -> bool {
        let rendered = line.render();
        parse_line(&rendered) == parse_line(&rendered)
    }

    #[quickcheck]
    fn prop_lines_without_marker_yield_nothing(line: String) -> bool {
        let first = line.split_whitespace().next();
        if first == Some(MEASUREMENT_MARKER) {
            return true;
        }
        parse_line(&line).is_empty()
    }

    #[quickcheck]
    fn prop_integer_suffix_is_stripped(value: u32) -> bool {
        normalize_value(&format!("{}i", value)) == value.to_string()
    }
}
