//! Read-only boundary to the runtime's own memory and collector metrics.
//!
//! The embedding process provides an implementation; when none is
//! available the core falls back to [`NullHeapSource`] and reports zeros.

use serde::{Deserialize, Serialize};

/// Heap totals as the runtime reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used: u64,
    pub committed: u64,
    pub max: u64,
}

impl MemoryUsage {
    pub fn new(used: u64, committed: u64, max: u64) -> Self {
        Self {
            used,
            committed,
            max,
        }
    }

    pub fn usage_percent(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        self.used as f64 / self.max as f64 * 100.0
    }
}

/// Cumulative counters of one garbage collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSample {
    pub name: String,
    pub count: u64,
    pub time_ms: u64,
}

/// Provider of heap totals, per-pool usage, and per-collector counters.
pub trait HeapStatsSource: Send + Sync {
    fn heap_usage(&self) -> MemoryUsage;

    fn pool_usages(&self) -> Vec<(String, MemoryUsage)> {
        Vec::new()
    }

    fn collectors(&self) -> Vec<CollectorSample> {
        Vec::new()
    }
}

/// Source of last resort: everything reads zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHeapSource;

impl HeapStatsSource for NullHeapSource {
    fn heap_usage(&self) -> MemoryUsage {
        MemoryUsage::default()
    }
}
