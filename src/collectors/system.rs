use super::{percent, Collector};
use crate::error::CollectorError;
use serde::Serialize;
use sysinfo::{Disks, System};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskUsage {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub memory: MemoryUsage,
    pub swap: MemoryUsage,
    pub load_average: LoadAverage,
    pub disks: Vec<DiskUsage>,
}

/// System-wide resource usage
///
/// The `System` handle is kept between cycles so CPU usage is measured over
/// the interval since the previous collect. The very first sample reads 0.
pub struct SystemCollector {
    system: System,
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }

    /// Take a typed snapshot of current usage
    pub fn snapshot(&mut self) -> SystemSnapshot {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();

        let total_memory = self.system.total_memory();
        let used_memory = self.system.used_memory();
        let total_swap = self.system.total_swap();
        let used_swap = self.system.used_swap();
        let load = System::load_average();

        let disks = Disks::new_with_refreshed_list()
            .iter()
            .map(|disk| {
                let total = disk.total_space();
                let available = disk.available_space();
                let used = total.saturating_sub(available);
                DiskUsage {
                    name: disk.name().to_string_lossy().to_string(),
                    mount_point: disk.mount_point().to_string_lossy().to_string(),
                    file_system: disk.file_system().to_string_lossy().to_string(),
                    total,
                    used,
                    available,
                    used_percent: percent(used, total),
                }
            })
            .collect();

        SystemSnapshot {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            memory: MemoryUsage {
                total: total_memory,
                used: used_memory,
                used_percent: percent(used_memory, total_memory),
            },
            swap: MemoryUsage {
                total: total_swap,
                used: used_swap,
                used_percent: percent(used_swap, total_swap),
            },
            load_average: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            disks,
        }
    }
}

impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    fn collect(&mut self) -> Result<serde_json::Value, CollectorError> {
        Ok(serde_json::to_value(self.snapshot())?)
    }
}
