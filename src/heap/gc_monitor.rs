//! Garbage-collection monitoring.
//!
//! Polls the runtime's per-collector cumulative counters at a fixed cadence
//! and folds the deltas into running totals. Agent-delivered GC start/finish
//! pairs feed the same totals through `record_pause`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::now_millis;
use crate::heap::source::HeapStatsSource;
use crate::heap::{join_bounded, WORKER_JOIN_LIMIT};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_TICK: Duration = Duration::from_millis(100);

/// Accumulated collection totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStatistics {
    pub collection_count: u64,
    pub collection_time_ms: u64,
    /// Wall-clock time a collection was last observed, 0 if never.
    pub last_collection_time_ms: u64,
}

impl GcStatistics {
    pub fn avg_pause_ms(&self) -> f64 {
        if self.collection_count > 0 {
            self.collection_time_ms as f64 / self.collection_count as f64
        } else {
            0.0
        }
    }
}

struct MonitorState {
    source: Arc<dyn HeapStatsSource>,
    running: AtomicBool,
    last_count: AtomicU64,
    last_time_ms: AtomicU64,
    total_collections: AtomicU64,
    total_pause_ms: AtomicU64,
    last_collection_ms: AtomicU64,
}

impl MonitorState {
    fn poll(&self) {
        let mut count = 0u64;
        let mut time_ms = 0u64;
        for collector in self.source.collectors() {
            count += collector.count;
            time_ms += collector.time_ms;
        }

        let delta_count = count.saturating_sub(self.last_count.load(Ordering::Relaxed));
        let delta_time = time_ms.saturating_sub(self.last_time_ms.load(Ordering::Relaxed));
        if delta_count > 0 {
            self.total_collections.fetch_add(delta_count, Ordering::Relaxed);
            self.total_pause_ms.fetch_add(delta_time, Ordering::Relaxed);
            self.last_collection_ms.store(now_millis(), Ordering::Relaxed);
        }
        self.last_count.store(count, Ordering::Relaxed);
        self.last_time_ms.store(time_ms, Ordering::Relaxed);
    }
}

pub struct GcMonitor {
    state: Arc<MonitorState>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl GcMonitor {
    pub fn new(source: Arc<dyn HeapStatsSource>) -> Self {
        Self {
            state: Arc::new(MonitorState {
                source,
                running: AtomicBool::new(false),
                last_count: AtomicU64::new(0),
                last_time_ms: AtomicU64::new(0),
                total_collections: AtomicU64::new(0),
                total_pause_ms: AtomicU64::new(0),
                last_collection_ms: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Relaxed)
    }

    /// Start the poller. No-op when already running.
    pub fn start(&self) {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return;
        }

        // Baseline so pre-existing collections are not counted as new.
        let mut count = 0u64;
        let mut time_ms = 0u64;
        for collector in self.state.source.collectors() {
            count += collector.count;
            time_ms += collector.time_ms;
        }
        self.state.last_count.store(count, Ordering::Relaxed);
        self.state.last_time_ms.store(time_ms, Ordering::Relaxed);

        let state = Arc::clone(&self.state);
        let handle = thread::Builder::new()
            .name("heapscope-gc-monitor".to_string())
            .spawn(move || {
                debug!("gc monitor started");
                let mut last_poll = Instant::now();
                while state.running.load(Ordering::Relaxed) {
                    thread::sleep(POLL_TICK);
                    if last_poll.elapsed() < POLL_INTERVAL {
                        continue;
                    }
                    last_poll = Instant::now();
                    state.poll();
                }
                debug!("gc monitor stopped");
            });

        match handle {
            Ok(handle) => *self.thread.lock() = Some(handle),
            Err(error) => {
                self.state.running.store(false, Ordering::SeqCst);
                warn!(%error, "failed to start gc monitor");
            }
        }
    }

    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            join_bounded(handle, WORKER_JOIN_LIMIT);
        }
    }

    /// Fold one agent-observed pause into the totals.
    pub fn record_pause(&self, pause_ms: u64) {
        self.state.total_collections.fetch_add(1, Ordering::Relaxed);
        self.state.total_pause_ms.fetch_add(pause_ms, Ordering::Relaxed);
        self.state.last_collection_ms.store(now_millis(), Ordering::Relaxed);
    }

    pub fn statistics(&self) -> GcStatistics {
        GcStatistics {
            collection_count: self.state.total_collections.load(Ordering::Relaxed),
            collection_time_ms: self.state.total_pause_ms.load(Ordering::Relaxed),
            last_collection_time_ms: self.state.last_collection_ms.load(Ordering::Relaxed),
        }
    }
}

impl Drop for GcMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::source::{CollectorSample, MemoryUsage, NullHeapSource};
    use parking_lot::RwLock;

    struct ScriptedSource {
        collectors: RwLock<Vec<CollectorSample>>,
    }

    impl HeapStatsSource for ScriptedSource {
        fn heap_usage(&self) -> MemoryUsage {
            MemoryUsage::default()
        }

        fn collectors(&self) -> Vec<CollectorSample> {
            self.collectors.read().clone()
        }
    }

    #[test]
    fn start_baselines_existing_collections() {
        let source = Arc::new(ScriptedSource {
            collectors: RwLock::new(vec![CollectorSample {
                name: "old-gen".to_string(),
                count: 40,
                time_ms: 900,
            }]),
        });
        let monitor = GcMonitor::new(source.clone());
        monitor.start();
        monitor.stop();

        // Nothing happened after start, so totals stay zero.
        let stats = monitor.statistics();
        assert_eq!(stats.collection_count, 0);
        assert_eq!(stats.collection_time_ms, 0);
    }

    #[test]
    fn poll_accumulates_deltas() {
        let source = Arc::new(ScriptedSource {
            collectors: RwLock::new(vec![CollectorSample {
                name: "young-gen".to_string(),
                count: 10,
                time_ms: 100,
            }]),
        });
        let monitor = GcMonitor::new(source.clone());
        monitor.state.last_count.store(10, Ordering::Relaxed);
        monitor.state.last_time_ms.store(100, Ordering::Relaxed);

        source.collectors.write()[0].count = 13;
        source.collectors.write()[0].time_ms = 160;
        monitor.state.poll();

        let stats = monitor.statistics();
        assert_eq!(stats.collection_count, 3);
        assert_eq!(stats.collection_time_ms, 60);
        assert!(stats.last_collection_time_ms > 0);
        assert_eq!(stats.avg_pause_ms(), 20.0);
    }

    #[test]
    fn record_pause_feeds_totals() {
        let monitor = GcMonitor::new(Arc::new(NullHeapSource));
        monitor.record_pause(12);
        monitor.record_pause(8);

        let stats = monitor.statistics();
        assert_eq!(stats.collection_count, 2);
        assert_eq!(stats.collection_time_ms, 20);
        assert_eq!(stats.avg_pause_ms(), 10.0);
    }

    #[test]
    fn start_stop_is_idempotent() {
        let monitor = GcMonitor::new(Arc::new(NullHeapSource));
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
    }
}
