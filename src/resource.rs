//! Resource monitoring for batch throttling.
//!
//! Observes system memory against throttle and ceiling thresholds and
//! recommends a worker count. The recommendation is never zero: the batch
//! semaphore is built from it, and a zero-permit semaphore would deadlock
//! the executor.

use crate::config::ResourceConfig;
use serde::Serialize;
use std::sync::Mutex;
use sysinfo::System;

const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// Memory pressure status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Below the throttle threshold.
    Normal,
    /// Above throttle: halve the workers.
    Throttle,
    /// Above ceiling: single worker.
    Critical,
}

/// Monitors system memory and recommends worker counts.
pub struct ResourceMonitor {
    system: Mutex<System>,
    ram_throttle_gb: f64,
    ram_ceiling_gb: f64,
}

impl ResourceMonitor {
    /// Creates a monitor from configuration.
    #[must_use]
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            system: Mutex::new(System::new()),
            ram_throttle_gb: config.ram_throttle_gb,
            ram_ceiling_gb: config.ram_ceiling_gb,
        }
    }

    /// Samples memory and classifies pressure.
    ///
    /// Fails open: if sampling is unavailable the status is Normal.
    #[must_use]
    pub fn check_status(&self) -> ResourceStatus {
        let Ok(mut system) = self.system.lock() else {
            return ResourceStatus::Normal;
        };
        system.refresh_memory();
        #[allow(clippy::cast_precision_loss)]
        let used_gb = system.used_memory() as f64 / BYTES_PER_GB;
        drop(system);

        if used_gb > self.ram_ceiling_gb {
            tracing::warn!(used_gb, ceiling_gb = self.ram_ceiling_gb, "RAM critical");
            ResourceStatus::Critical
        } else if used_gb > self.ram_throttle_gb {
            tracing::warn!(used_gb, throttle_gb = self.ram_throttle_gb, "RAM throttle");
            ResourceStatus::Throttle
        } else {
            ResourceStatus::Normal
        }
    }

    /// Recommends a worker count for the current memory status.
    ///
    /// Invariant: the result is always at least 1, whatever `max` is.
    #[must_use]
    pub fn recommended_workers(&self, max: usize) -> usize {
        let recommended = match self.check_status() {
            ResourceStatus::Normal => max,
            ResourceStatus::Throttle => max / 2,
            ResourceStatus::Critical => 1,
        };
        recommended.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(throttle: f64, ceiling: f64) -> ResourceMonitor {
        ResourceMonitor::new(&ResourceConfig {
            ram_throttle_gb: throttle,
            ram_ceiling_gb: ceiling,
        })
    }

    #[test]
    fn test_normal_status_with_huge_thresholds() {
        // No machine this test runs on has a petabyte of RAM in use.
        let monitor = monitor(1_000_000.0, 2_000_000.0);
        assert_eq!(monitor.check_status(), ResourceStatus::Normal);
        assert_eq!(monitor.recommended_workers(6), 6);
    }

    #[test]
    fn test_critical_status_with_zero_thresholds() {
        // Any memory use at all exceeds a zero ceiling.
        let monitor = monitor(0.0, 0.0);
        assert_eq!(monitor.check_status(), ResourceStatus::Critical);
        assert_eq!(monitor.recommended_workers(6), 1);
    }

    #[test]
    fn test_throttle_halves_workers() {
        // Ceiling out of reach, throttle at zero: always throttled.
        let monitor = monitor(0.0, 2_000_000.0);
        assert_eq!(monitor.check_status(), ResourceStatus::Throttle);
        assert_eq!(monitor.recommended_workers(6), 3);
    }

    #[test]
    fn test_never_returns_zero_workers() {
        // Throttled with max 1 would floor-divide to 0 without the clamp.
        let throttled = monitor(0.0, 2_000_000.0);
        assert_eq!(throttled.recommended_workers(1), 1);
        assert_eq!(throttled.recommended_workers(0), 1);

        let critical = monitor(0.0, 0.0);
        assert_eq!(critical.recommended_workers(0), 1);
    }
}
