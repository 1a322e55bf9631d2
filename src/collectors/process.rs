use super::Collector;
use crate::error::CollectorError;
use serde::Serialize;
use std::cmp::Ordering;
use sysinfo::{ProcessesToUpdate, System};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    /// Resident memory in bytes
    pub memory: u64,
}

/// The busiest processes on the host
pub struct ProcessCollector {
    system: System,
    limit: usize,
}

impl ProcessCollector {
    /// Create a new ProcessCollector
    ///
    /// # Arguments
    ///
    /// * `limit` - Maximum number of processes reported per collect
    pub fn new(limit: usize) -> Self {
        Self {
            system: System::new(),
            limit,
        }
    }

    pub fn top_processes(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let processes = self
            .system
            .processes()
            .values()
            .map(|process| ProcessInfo {
                pid: process.pid().as_u32(),
                name: process.name().to_string_lossy().to_string(),
                cpu_percent: f64::from(process.cpu_usage()),
                memory: process.memory(),
            })
            .collect();

        top_n(processes, self.limit)
    }
}

/// Order by CPU, then memory, both descending, and keep the first `limit`
fn top_n(mut processes: Vec<ProcessInfo>, limit: usize) -> Vec<ProcessInfo> {
    processes.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.memory.cmp(&a.memory))
            .then_with(|| a.pid.cmp(&b.pid))
    });
    processes.truncate(limit);
    processes
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "processes"
    }

    fn collect(&mut self) -> Result<serde_json::Value, CollectorError> {
        Ok(serde_json::to_value(self.top_processes())?)
    }
}
