use crate::error::{Result, TelemetryError};
use std::time::Duration;
use sysinfo::System;

pub const DEFAULT_CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Point-in-time host resource estimates for the exporter.
#[derive(Debug, Clone)]
pub struct SystemSampler {
    cpu_sample_interval: Duration,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_SAMPLE_INTERVAL)
    }
}

impl SystemSampler {
    pub fn new(cpu_sample_interval: Duration) -> Self {
        Self {
            cpu_sample_interval,
        }
    }

    /// `(total - free) / total * 100`, rounded to two decimals.
    pub fn memory_usage_percent(&self) -> Result<f64> {
        let mut sys = System::new();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return Err(TelemetryError::System(
                "total memory reported as zero".to_string(),
            ));
        }
        let free = sys.free_memory().min(total);
        let used = total - free;
        Ok(round2(used as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
    }

    /// Two-sample CPU estimate: refresh the per-core counters, suspend for
    /// the configured spacing, refresh again and aggregate the busy share
    /// across all cores. The sleep is a tokio suspension, so request
    /// handling interleaves freely during the window; the result is an
    /// estimate of recent load, not an instantaneous value.
    pub async fn cpu_usage_percent(&self) -> Result<f64> {
        let mut sys = System::new();
        sys.refresh_cpu_usage();

        // sysinfo needs a minimum spacing between refreshes to compute a
        // meaningful delta.
        let spacing = self.cpu_sample_interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        tokio::time::sleep(spacing).await;
        sys.refresh_cpu_usage();

        let cpus = sys.cpus();
        if cpus.is_empty() {
            return Err(TelemetryError::System("no CPUs reported".to_string()));
        }
        let total: f64 = cpus.iter().map(|cpu| f64::from(cpu.cpu_usage())).sum();
        Ok(round2(total / cpus.len() as f64).clamp(0.0, 100.0))
    }
}
