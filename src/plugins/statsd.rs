//! StatsD listener exposed as a service plugin
//!
//! While running, a background thread receives StatsD datagrams over UDP and
//! folds them into an accumulator. Each collect drains what arrived since the
//! previous collect (gauges keep their last value).

use crate::error::PluginError;
use crate::metrics::{format_number, Collected, CollectionResult};
use crate::plugins::resolver::read_config;
use crate::plugins::{Lifecycle, Plugin};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Namespace under which every StatsD metric is reported
pub const NAMESPACE: &str = "statsd";

/// Address used when the config does not name one
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8125";

/// How long a blocking receive waits before re-checking the running flag
const READ_TIMEOUT: Duration = Duration::from_millis(100);

const MAX_DATAGRAM_SIZE: usize = 65_535;

const SAMPLE_CONFIG: &str = r#"
#   Available config options:
#
#     {"address": "127.0.0.1:8125"}
#
#
# Config location: /etc/opt/hostwatch/plugins-enabled/statsd.conf
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatsdConfig {
    pub address: String,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
        }
    }
}

/// One measurement decoded from a StatsD line
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Counter { name: String, value: f64, rate: f64 },
    /// `delta` is set when the value carried an explicit sign
    Gauge { name: String, value: f64, delta: bool },
    Timer { name: String, value: f64 },
    Set { name: String, member: String },
}

/// Decode `name:value|type[|@rate]`; malformed lines yield `None`
pub fn parse_statsd_line(line: &str) -> Option<Sample> {
    let line = line.trim();
    let (name, rest) = line.split_once(':')?;
    if name.is_empty() {
        return None;
    }

    let mut parts = rest.split('|');
    let raw_value = parts.next()?;
    let kind = parts.next()?;

    let rate = match parts.next() {
        Some(rate) => {
            let rate: f64 = rate.strip_prefix('@')?.parse().ok()?;
            if !(rate > 0.0 && rate <= 1.0) {
                return None;
            }
            rate
        }
        None => 1.0,
    };

    let name = name.to_string();
    match kind {
        "c" => Some(Sample::Counter {
            name,
            value: raw_value.parse().ok()?,
            rate,
        }),
        "g" => Some(Sample::Gauge {
            name,
            value: raw_value.parse().ok()?,
            delta: raw_value.starts_with('+') || raw_value.starts_with('-'),
        }),
        "ms" | "h" => Some(Sample::Timer {
            name,
            value: raw_value.parse().ok()?,
        }),
        "s" if !raw_value.is_empty() => Some(Sample::Set {
            name,
            member: raw_value.to_string(),
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TimerStats {
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl TimerStats {
    fn new(value: f64) -> Self {
        Self {
            count: 1,
            min: value,
            max: value,
            sum: value,
        }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }
}

/// Data received since the last collect
#[derive(Debug, Default)]
struct Accumulator {
    counters: HashMap<String, f64>,
    gauges: HashMap<String, f64>,
    timers: HashMap<String, TimerStats>,
    sets: HashMap<String, HashSet<String>>,
}

impl Accumulator {
    fn record(&mut self, sample: Sample) {
        match sample {
            Sample::Counter { name, value, rate } => {
                *self.counters.entry(name).or_insert(0.0) += value / rate;
            }
            Sample::Gauge { name, value, delta } => {
                let gauge = self.gauges.entry(name).or_insert(0.0);
                if delta {
                    *gauge += value;
                } else {
                    *gauge = value;
                }
            }
            Sample::Timer { name, value } => {
                self.timers
                    .entry(name)
                    .and_modify(|stats| stats.observe(value))
                    .or_insert_with(|| TimerStats::new(value));
            }
            Sample::Set { name, member } => {
                self.sets.entry(name).or_default().insert(member);
            }
        }
    }

    /// Report everything and reset counters, timers and sets
    fn drain(&mut self) -> CollectionResult {
        let mut result = CollectionResult::new();

        for (name, value) in self.counters.drain() {
            result.insert(NAMESPACE, name, format_number(value));
        }
        for (name, value) in &self.gauges {
            result.insert(NAMESPACE, name.clone(), format_number(*value));
        }
        for (name, stats) in self.timers.drain() {
            result.insert(NAMESPACE, format!("{}.count", name), stats.count.to_string());
            result.insert(NAMESPACE, format!("{}.min", name), format_number(stats.min));
            result.insert(NAMESPACE, format!("{}.max", name), format_number(stats.max));
            result.insert(
                NAMESPACE,
                format!("{}.mean", name),
                format_number(stats.sum / stats.count as f64),
            );
        }
        for (name, members) in self.sets.drain() {
            result.insert(NAMESPACE, format!("{}.count", name), members.len().to_string());
        }

        result
    }
}

/// StatsD UDP listener
pub struct StatsdPlugin {
    /// Data shared with the listener thread
    accumulator: Arc<Mutex<Accumulator>>,
    /// Shared state for controlling the listener
    running: Arc<Mutex<bool>>,
    /// Handle to the listener thread
    thread_handle: Option<JoinHandle<()>>,
    /// Address actually bound while running
    local_addr: Option<SocketAddr>,
}

impl Default for StatsdPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsdPlugin {
    pub fn new() -> Self {
        Self {
            accumulator: Arc::new(Mutex::new(Accumulator::default())),
            running: Arc::new(Mutex::new(false)),
            thread_handle: None,
            local_addr: None,
        }
    }

    /// Address the listener is bound to, if running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn load_config(config_path: &Path) -> StatsdConfig {
        read_config(config_path).unwrap_or_else(|e| {
            warn!("{}, listening on {}", e, DEFAULT_ADDRESS);
            StatsdConfig::default()
        })
    }

    fn listener_thread(
        socket: UdpSocket,
        accumulator: Arc<Mutex<Accumulator>>,
        running: Arc<Mutex<bool>>,
    ) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        while running.lock().map(|flag| *flag).unwrap_or(false) {
            match socket.recv_from(&mut buffer) {
                Ok((size, peer)) => {
                    let packet = String::from_utf8_lossy(&buffer[..size]);
                    if let Ok(mut accumulator) = accumulator.lock() {
                        for line in packet.lines().filter(|l| !l.trim().is_empty()) {
                            match parse_statsd_line(line) {
                                Some(sample) => accumulator.record(sample),
                                None => debug!("Skipping malformed statsd line from {}: {}", peer, line),
                            }
                        }
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    // Timeout is expected, re-check the running flag
                }
                Err(e) => {
                    error!("StatsD listener failed: {}", e);
                    break;
                }
            }
        }

        if let Ok(mut flag) = running.lock() {
            *flag = false;
        }
        info!("StatsD listener thread finished");
    }
}

impl Plugin for StatsdPlugin {
    fn description(&self) -> &str {
        "Listens for StatsD metrics over UDP"
    }

    fn sample_config(&self) -> &str {
        SAMPLE_CONFIG
    }

    /// Drain data received since the last collect; `NotRunning` before `start`
    fn collect(&mut self, _config_path: &Path) -> Result<Collected, PluginError> {
        if !self.is_running() {
            return Err(PluginError::NotRunning);
        }

        let result = match self.accumulator.lock() {
            Ok(mut accumulator) => accumulator.drain(),
            Err(_) => CollectionResult::new(),
        };
        Ok(Collected::new(result))
    }

    fn lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
        Some(self)
    }
}

impl Lifecycle for StatsdPlugin {
    fn start(&mut self, config_path: &Path) -> Result<(), PluginError> {
        if self.is_running() {
            info!("StatsD listener already running, skipping start");
            return Ok(());
        }

        let config = Self::load_config(config_path);
        let bind_error = |e: std::io::Error| PluginError::Bind {
            address: config.address.clone(),
            reason: e.to_string(),
        };

        let socket = UdpSocket::bind(config.address.as_str()).map_err(bind_error)?;
        socket.set_read_timeout(Some(READ_TIMEOUT)).map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        if let Ok(mut accumulator) = self.accumulator.lock() {
            *accumulator = Accumulator::default();
        }
        if let Ok(mut running) = self.running.lock() {
            *running = true;
        }

        let accumulator = Arc::clone(&self.accumulator);
        let running = Arc::clone(&self.running);
        let handle = thread::spawn(move || {
            Self::listener_thread(socket, accumulator, running);
        });

        self.thread_handle = Some(handle);
        self.local_addr = Some(local_addr);
        info!("StatsD listener started on {}", local_addr);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            *running = false;
        }

        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for StatsD listener thread to join");
            if handle.join().is_err() {
                error!("Failed to join StatsD listener thread");
            }
            info!("StatsD listener stopped");
        }
        self.local_addr = None;
    }

    fn is_running(&self) -> bool {
        self.thread_handle.is_some() && self.running.lock().map(|flag| *flag).unwrap_or(false)
    }
}

impl Drop for StatsdPlugin {
    fn drop(&mut self) {
        self.stop();
    }
}
