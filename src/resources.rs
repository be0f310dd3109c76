//! Host load sampling for the poll scheduler

use std::time::Duration;

use async_trait::async_trait;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::info;

/// Window over which CPU usage is averaged
const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Instantaneous host load, both values in percent (0–100)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Something that can report current host load
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self) -> ResourceSample;
}

/// `sysinfo`-backed sampler
///
/// CPU usage is a delta between two refreshes, so each sample waits out
/// [`CPU_SAMPLE_WINDOW`] between them.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceSampler for SysinfoSampler {
    async fn sample(&self) -> ResourceSample {
        let mut sys = self.system.lock().await;
        sys.refresh_cpu_usage();
        tokio::time::sleep(CPU_SAMPLE_WINDOW.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let sample = ResourceSample {
            cpu_percent: sys.global_cpu_usage(),
            memory_percent: memory_percent(sys.used_memory(), sys.total_memory()),
        };
        info!(
            cpu_percent = sample.cpu_percent,
            memory_percent = sample.memory_percent,
            "resource usage sampled"
        );
        sample
    }
}

fn memory_percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

#[cfg(test)]
mod tests {
    use super::{ResourceSampler, SysinfoSampler, memory_percent};

    #[test]
    fn memory_percent_handles_zero_total() {
        assert_eq!(memory_percent(10, 0), 0.0);
        assert_eq!(memory_percent(50, 200), 25.0);
    }

    #[tokio::test]
    async fn live_sample_is_within_percent_range() {
        let sample = SysinfoSampler::new().sample().await;
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!(sample.cpu_percent >= 0.0);
    }
}
