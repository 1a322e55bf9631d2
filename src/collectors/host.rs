use super::Collector;
use crate::error::CollectorError;
use serde::Serialize;
use sysinfo::System;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostInfo {
    pub hostname: String,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub kernel: Option<String>,
    /// Seconds since boot
    pub uptime: u64,
    pub cpu_count: usize,
}

/// Hostname, OS and kernel details
pub struct HostCollector {
    system: System,
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }

    pub fn host_info(&self) -> Result<HostInfo, CollectorError> {
        let hostname = System::host_name()
            .ok_or_else(|| CollectorError::Unavailable("hostname".to_string()))?;

        Ok(HostInfo {
            hostname,
            os: System::name(),
            os_version: System::os_version(),
            kernel: System::kernel_version(),
            uptime: System::uptime(),
            cpu_count: self.system.cpus().len(),
        })
    }
}

impl Collector for HostCollector {
    fn name(&self) -> &str {
        "host"
    }

    fn collect(&mut self) -> Result<serde_json::Value, CollectorError> {
        Ok(serde_json::to_value(self.host_info()?)?)
    }
}
