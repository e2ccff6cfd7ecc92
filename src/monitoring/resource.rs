//! Resource Usage Monitoring
//!
//! Samples CPU and memory usage of the engine process during a run.
//! The engine polls this from a dedicated thread and attaches the final
//! summary to the run result.

use std::fmt;
use std::time::{Duration, Instant};

use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    /// When this sample was taken
    pub timestamp: Instant,
    /// CPU usage percentage (0-100+)
    pub cpu_usage: f32,
    /// Memory usage in megabytes
    pub memory_mb: u64,
}

/// Aggregate of all samples taken during a run.
#[derive(Debug, Clone)]
pub struct ResourceSummary {
    /// Mean CPU usage across samples
    pub avg_cpu: f32,
    /// Highest observed memory usage in megabytes
    pub peak_memory_mb: u64,
    /// Number of samples behind the aggregate
    pub samples: usize,
}

impl fmt::Display for ResourceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.samples == 0 {
            return write!(f, "No resource data collected");
        }
        write!(
            f,
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {} MB\n  Samples: {}",
            self.avg_cpu, self.peak_memory_mb, self.samples
        )
    }
}

/// Monitors system resource usage for the current process.
pub struct ResourceMonitor {
    system: System,
    process_id: Pid,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    /// Creates a new resource monitor for the current process.
    pub fn new() -> Self {
        Self {
            system: System::new(),
            process_id: get_current_pid().expect("Failed to get process ID"),
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a resource usage sample.
    ///
    /// The first call performs CPU warmup (required for accurate readings).
    /// Subsequent calls are rate-limited by `min_interval`.
    pub fn sample(&mut self) {
        let pid = self.process_id;
        let now = Instant::now();

        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        if let Some(process) = self.system.process(pid) {
            self.samples.push(ResourceSample {
                timestamp: now,
                cpu_usage: process.cpu_usage(),
                memory_mb: process.memory() / (1024 * 1024),
            });
        }
    }

    /// Folds all samples into a summary.
    pub fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            avg_cpu: self.average_cpu(),
            peak_memory_mb: self.peak_memory_mb(),
            samples: self.samples.len(),
        }
    }

    /// Returns all collected samples.
    pub fn samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    /// Returns the peak memory usage in MB.
    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    /// Returns the average CPU usage.
    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_monitor_creation() {
        let monitor = ResourceMonitor::new();
        assert!(monitor.samples().is_empty());
    }

    #[test]
    fn test_first_sample_is_warmup() {
        let mut monitor = ResourceMonitor::new();

        monitor.sample();
        assert!(monitor.samples().is_empty());

        thread::sleep(Duration::from_millis(300));
        monitor.sample();
        assert!(!monitor.samples().is_empty());
    }

    #[test]
    fn test_min_interval_rate_limits() {
        let mut monitor = ResourceMonitor::new().with_min_interval(Duration::from_millis(200));

        monitor.sample();
        monitor.sample();
        assert!(monitor.samples().is_empty());

        thread::sleep(Duration::from_millis(250));
        monitor.sample();
        assert!(!monitor.samples().is_empty());
    }

    #[test]
    fn test_summary_aggregates_samples() {
        let mut monitor = ResourceMonitor::new();
        monitor.sample();
        thread::sleep(Duration::from_millis(300));
        monitor.sample();

        let summary = monitor.summary();
        assert!(summary.samples >= 1);
        assert!(summary.avg_cpu >= 0.0);

        let rendered = summary.to_string();
        assert!(rendered.contains("Average CPU"));
        assert!(rendered.contains("Peak Memory"));
    }

    #[test]
    fn test_empty_summary_display() {
        let summary = ResourceMonitor::new().summary();
        assert_eq!(summary.samples, 0);
        assert!(summary.to_string().contains("No resource data collected"));
    }

    #[test]
    fn test_average_cpu_without_samples() {
        let monitor = ResourceMonitor::new();
        assert_eq!(monitor.average_cpu(), 0.0);
        assert_eq!(monitor.peak_memory_mb(), 0);
    }
}
