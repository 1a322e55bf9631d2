//! Core metric types shared by plugins, the scheduler and the transport
//!
//! Values are carried as text end to end so heterogeneous upstream
//! representations (plain floats, integer-suffixed counters, passthrough
//! strings) survive without lossy reformatting.

use crate::error::PluginWarning;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single measurement produced by a data source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Metric {
    /// Namespace of the originating source, e.g. `telegraf.ping`
    pub plugin: String,
    /// Dotted/tagged metric name
    pub gauge: String,
    /// Numeric or passthrough textual value
    pub value: String,
}

impl Metric {
    pub fn new(
        plugin: impl Into<String>,
        gauge: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            gauge: gauge.into(),
            value: value.into(),
        }
    }
}

/// Metrics parsed out of exactly one line of adapter output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLine {
    pub elements: Vec<Metric>,
    /// Trailing timestamp of the line, kept as metadata only
    pub timestamp: Option<i64>,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Gauges reported under one plugin namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GaugeSet {
    pub gauges: BTreeMap<String, String>,
}

/// Mapping from plugin namespace to its gauges, the unit handed to the transport
///
/// Serializes as `{"<namespace>": {"gauges": {"<gauge>": "<value>"}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CollectionResult(BTreeMap<String, GaugeSet>);

impl CollectionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single gauge value under `plugin`; later values win
    pub fn insert(
        &mut self,
        plugin: impl Into<String>,
        gauge: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.0
            .entry(plugin.into())
            .or_default()
            .gauges
            .insert(gauge.into(), value.into());
    }

    /// Fold another result into this one, overwriting duplicate gauges
    pub fn merge(&mut self, other: CollectionResult) {
        for (plugin, set) in other.0 {
            let entry = self.0.entry(plugin).or_default();
            entry.gauges.extend(set.gauges);
        }
    }

    pub fn get(&self, plugin: &str) -> Option<&GaugeSet> {
        self.0.get(plugin)
    }

    /// Look up one gauge value
    pub fn gauge(&self, plugin: &str, gauge: &str) -> Option<&str> {
        self.0
            .get(plugin)
            .and_then(|set| set.gauges.get(gauge))
            .map(String::as_str)
    }

    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of plugin namespaces present
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Metric> for CollectionResult {
    fn from_iter<T: IntoIterator<Item = Metric>>(iter: T) -> Self {
        let mut result = CollectionResult::new();
        for metric in iter {
            if metric.gauge.is_empty() {
                continue;
            }
            result.insert(metric.plugin, metric.gauge, metric.value);
        }
        result
    }
}

/// Successful output of a plugin collect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    pub result: CollectionResult,
    /// Degraded-but-running conditions hit while collecting
    pub warnings: Vec<PluginWarning>,
}

impl Collected {
    pub fn new(result: CollectionResult) -> Self {
        Self {
            result,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(result: CollectionResult, warnings: Vec<PluginWarning>) -> Self {
        Self { result, warnings }
    }
}

/// Render a number in its shortest exact decimal form, never in exponent notation
///
/// Non-finite values are spelled `+Inf`, `-Inf` and `NaN`.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{}", value)
    }
}
