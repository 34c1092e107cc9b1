//! Default instruments describing the current process.
use lightmetric::{Collector, MetricFamilySamples, MetricType, Sample};
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

const RESIDENT_MEMORY: &str = "process_resident_memory_bytes";
const VIRTUAL_MEMORY: &str = "process_virtual_memory_bytes";
const START_TIME: &str = "process_start_time_seconds";
const CPU_USAGE: &str = "process_cpu_usage_ratio";

/// Collects memory, start time and CPU usage of the current process.
///
/// Statistics are read from the operating system on every collection. CPU usage is measured
/// between two collections, so the first collection always reports zero.
///
/// On platforms where the current process cannot be inspected, nothing is collected.
pub struct ProcessCollector {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessCollector {
    /// Creates a new [`ProcessCollector`] for the current process.
    pub fn new() -> ProcessCollector {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!(error = e, "Current process cannot be inspected.");
                None
            }
        };

        ProcessCollector { pid, system: Mutex::new(System::new()) }
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        ProcessCollector::new()
    }
}

impl std::fmt::Debug for ProcessCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCollector").field("pid", &self.pid).finish_non_exhaustive()
    }
}

impl Collector for ProcessCollector {
    fn metric_names(&self) -> Vec<String> {
        [RESIDENT_MEMORY, VIRTUAL_MEMORY, START_TIME, CPU_USAGE]
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamilySamples> {
        let Some(pid) = self.pid else {
            return Vec::new();
        };

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory().with_cpu(),
        );

        let Some(process) = system.process(pid) else {
            debug!(%pid, "Current process not found while collecting process metrics.");
            return Vec::new();
        };

        vec![
            gauge(RESIDENT_MEMORY, "Resident memory size in bytes.", process.memory() as f64),
            gauge(VIRTUAL_MEMORY, "Virtual memory size in bytes.", process.virtual_memory() as f64),
            gauge(
                START_TIME,
                "Start time of the process since unix epoch in seconds.",
                process.start_time() as f64,
            ),
            gauge(
                CPU_USAGE,
                "CPU usage of the process since the previous collection, as a ratio of one core.",
                f64::from(process.cpu_usage()) / 100.0,
            ),
        ]
    }
}

fn gauge(name: &str, help: &str, value: f64) -> MetricFamilySamples {
    MetricFamilySamples {
        name: name.to_string(),
        metric_type: MetricType::Gauge,
        help: help.to_string(),
        samples: vec![Sample::new(name, vec![], vec![], value)],
    }
}

#[cfg(test)]
mod tests {
    use super::ProcessCollector;
    use lightmetric::{Collector, MetricType, Registry};
    use std::sync::Arc;

    #[test]
    fn test_metric_names() {
        let collector = ProcessCollector::new();
        assert_eq!(
            collector.metric_names(),
            vec![
                "process_resident_memory_bytes",
                "process_virtual_memory_bytes",
                "process_start_time_seconds",
                "process_cpu_usage_ratio",
            ]
        );
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[test]
    fn test_collect_current_process() {
        let registry = Registry::new();
        registry.register(Arc::new(ProcessCollector::new())).unwrap();

        let gathered = registry.gather();
        assert_eq!(gathered.len(), 4);
        assert!(gathered.iter().all(|mfs| mfs.metric_type == MetricType::Gauge));
        assert!(gathered.iter().all(|mfs| mfs.samples.len() == 1));

        let resident = &gathered[0];
        assert_eq!(resident.name, "process_resident_memory_bytes");
        assert!(resident.samples[0].value > 0.0);

        let start_time = &gathered[2];
        assert!(start_time.samples[0].value > 0.0);
    }
}
