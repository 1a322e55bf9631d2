use crate::error::CollectorError;

/// CPU, memory, swap, load and disk usage
pub mod system;

/// Top processes by resource usage
pub mod process;

/// Static host description
pub mod host;

pub use host::HostCollector;
pub use process::ProcessCollector;
pub use system::SystemCollector;

/// A built-in source of host data, called once per collection cycle
///
/// The returned value is opaque to the scheduler; it lands in the payload
/// slot named by [`Collector::name`].
pub trait Collector: Send {
    /// Payload slot name (`"system"`, `"processes"`, `"host"`)
    fn name(&self) -> &str;

    fn collect(&mut self) -> Result<serde_json::Value, CollectorError>;
}

/// Collectors shipped with the agent, in payload order
pub fn builtin(top_processes: usize) -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(SystemCollector::new()),
        Box::new(ProcessCollector::new(top_processes)),
        Box::new(HostCollector::new()),
    ]
}

/// Share of `used` in `total` as a percentage; 0 when `total` is 0
pub(crate) fn percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_collector_names() {
        let collectors = builtin(5);
        let names: Vec<&str> = collectors.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["system", "processes", "host"]);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(10, 10), 100.0);
    }
}
