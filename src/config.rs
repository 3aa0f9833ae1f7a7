//! Analyzer configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stack-frame prefixes that never count as an allocation site: the managed
/// runtime's own standard library plus this analyzer's namespace.
pub const DEFAULT_FRAMEWORK_PREFIXES: &[&str] = &["java.", "javax.", "sun.", "jdk.", "heapscope"];

/// Tuning knobs for the profiling core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Record every Nth allocation. 0 disables sampling (record all).
    pub sampling_interval: u32,
    /// Registry eviction threshold.
    pub max_tracked_objects: usize,
    /// Cadence of the registry cleanup worker.
    pub cleanup_interval_ms: u64,
    /// Age beyond which an object counts toward age-based leak detection.
    pub age_threshold_ms: u64,
    /// Instance-count threshold shared by the leak strategies.
    pub growth_threshold: u32,
    /// Number of snapshots retained by the sliding-window analyzer.
    pub window_size: usize,
    /// Capacity of the recent-allocations ring at the facade.
    pub recent_allocations_cap: usize,
    /// Maximum retained snapshots.
    pub snapshot_history_cap: usize,
    /// Maximum retained leak reports.
    pub report_history_cap: usize,
    /// Slot count of the agent event queue (rounded up to a power of two).
    pub event_queue_capacity: usize,
    /// Frame prefixes skipped when deriving an allocation site.
    pub framework_prefixes: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sampling_interval: 10,
            max_tracked_objects: 100_000,
            cleanup_interval_ms: 5_000,
            age_threshold_ms: 60_000,
            growth_threshold: 100,
            window_size: 10,
            recent_allocations_cap: 10_000,
            snapshot_history_cap: 100,
            report_history_cap: 50,
            event_queue_capacity: 65_536,
            framework_prefixes: DEFAULT_FRAMEWORK_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl AnalyzerConfig {
    /// Reject configurations the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_tracked_objects == 0 {
            return Err(Error::Config("max_tracked_objects must be > 0".into()));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(Error::Config("cleanup_interval_ms must be > 0".into()));
        }
        if self.window_size == 0 {
            return Err(Error::Config("window_size must be > 0".into()));
        }
        if self.recent_allocations_cap == 0 {
            return Err(Error::Config("recent_allocations_cap must be > 0".into()));
        }
        if self.snapshot_history_cap == 0 {
            return Err(Error::Config("snapshot_history_cap must be > 0".into()));
        }
        if self.report_history_cap == 0 {
            return Err(Error::Config("report_history_cap must be > 0".into()));
        }
        if self.event_queue_capacity < 2 {
            return Err(Error::Config("event_queue_capacity must be >= 2".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampling_interval, 10);
        assert_eq!(config.max_tracked_objects, 100_000);
        assert_eq!(config.window_size, 10);
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = AnalyzerConfig {
            max_tracked_objects: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
