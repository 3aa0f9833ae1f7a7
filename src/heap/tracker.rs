//! Live object registry.
//!
//! Maps object id to allocation record and keeps per-class and per-site
//! aggregates in step. Class aggregates move with the live set (they are
//! decremented on free and on eviction); site aggregates are cumulative
//! allocation pressure and only ever grow. A background worker evicts the
//! oldest entries whenever the live set exceeds its cap.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::now_millis;
use crate::core::record::AllocationRecord;
use crate::core::snapshot::ClassStats;
use crate::heap::{join_bounded, WORKER_JOIN_LIMIT};

/// Aggregate statistics for one allocation site. Unlike class statistics
/// these are never decremented: a site describes cumulative pressure, not
/// the live set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStats {
    pub site: String,
    pub allocation_count: u64,
    pub total_size: u64,
    pub avg_size: u64,
}

impl SiteStats {
    fn new(site: impl Into<String>, allocation_count: u64, total_size: u64) -> Self {
        Self {
            site: site.into(),
            allocation_count,
            total_size,
            avg_size: if allocation_count > 0 {
                total_size / allocation_count
            } else {
                0
            },
        }
    }
}

impl fmt::Display for SiteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} allocs, {} bytes",
            self.site, self.allocation_count, self.total_size
        )
    }
}

/// Lifetime counters of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerCounters {
    /// Live entries.
    pub tracked_count: u64,
    /// Cumulative inserts.
    pub total_tracked: u64,
    /// Cumulative removes through `untrack`.
    pub total_freed: u64,
    /// Entries removed by capacity eviction.
    pub evicted_entries: u64,
}

#[derive(Debug, Default)]
struct ClassAggregate {
    instance_count: u64,
    total_size: u64,
}

#[derive(Debug, Default)]
struct SiteAggregate {
    allocation_count: u64,
    total_size: u64,
}

pub struct ObjectTracker {
    registry: DashMap<u64, Arc<AllocationRecord>>,
    class_stats: DashMap<String, ClassAggregate>,
    site_stats: DashMap<String, SiteAggregate>,

    tracked_count: AtomicU64,
    total_tracked: AtomicU64,
    total_freed: AtomicU64,
    evicted_entries: AtomicU64,

    max_tracked_objects: usize,
    cleanup_interval: Duration,

    cleanup_running: Arc<AtomicBool>,
    cleanup_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ObjectTracker {
    /// Create a tracker and start its cleanup worker.
    pub fn spawn(max_tracked_objects: usize, cleanup_interval_ms: u64) -> Arc<Self> {
        let tracker = Arc::new(Self::new(max_tracked_objects, cleanup_interval_ms));
        tracker.start_cleanup();
        tracker
    }

    pub fn new(max_tracked_objects: usize, cleanup_interval_ms: u64) -> Self {
        Self {
            registry: DashMap::new(),
            class_stats: DashMap::new(),
            site_stats: DashMap::new(),
            tracked_count: AtomicU64::new(0),
            total_tracked: AtomicU64::new(0),
            total_freed: AtomicU64::new(0),
            evicted_entries: AtomicU64::new(0),
            max_tracked_objects,
            cleanup_interval: Duration::from_millis(cleanup_interval_ms),
            cleanup_running: Arc::new(AtomicBool::new(false)),
            cleanup_thread: Mutex::new(None),
        }
    }

    /// Track an allocation. A record whose object id is already present is
    /// ignored.
    pub fn track(&self, record: Arc<AllocationRecord>) {
        match self.registry.entry(record.object_id()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
            }
        }
        self.tracked_count.fetch_add(1, Ordering::Relaxed);
        self.total_tracked.fetch_add(1, Ordering::Relaxed);

        {
            let mut aggregate = self
                .class_stats
                .entry(record.class_name().to_string())
                .or_default();
            aggregate.instance_count += 1;
            aggregate.total_size += record.size();
        }
        {
            let mut aggregate = self
                .site_stats
                .entry(record.allocation_site().to_string())
                .or_default();
            aggregate.allocation_count += 1;
            aggregate.total_size += record.size();
        }
    }

    /// Remove a tracked object, returning its record if it was present.
    /// Class statistics shrink with it; site statistics do not.
    pub fn untrack(&self, object_id: u64) -> Option<Arc<AllocationRecord>> {
        self.remove_entry(object_id, &self.total_freed)
    }

    fn evict(&self, object_id: u64) -> Option<Arc<AllocationRecord>> {
        self.remove_entry(object_id, &self.evicted_entries)
    }

    fn remove_entry(&self, object_id: u64, lifecycle: &AtomicU64) -> Option<Arc<AllocationRecord>> {
        let (_, record) = self.registry.remove(&object_id)?;
        self.tracked_count.fetch_sub(1, Ordering::Relaxed);
        lifecycle.fetch_add(1, Ordering::Relaxed);

        if let Entry::Occupied(mut occupied) =
            self.class_stats.entry(record.class_name().to_string())
        {
            let aggregate = occupied.get_mut();
            if aggregate.instance_count <= 1 {
                occupied.remove();
            } else {
                aggregate.instance_count -= 1;
                aggregate.total_size = aggregate.total_size.saturating_sub(record.size());
            }
        }
        Some(record)
    }

    pub fn get(&self, object_id: u64) -> Option<Arc<AllocationRecord>> {
        self.registry.get(&object_id).map(|entry| entry.value().clone())
    }

    pub fn is_tracked(&self, object_id: u64) -> bool {
        self.registry.contains_key(&object_id)
    }

    pub fn get_all(&self) -> Vec<Arc<AllocationRecord>> {
        self.registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_by_class(&self, class_name: &str) -> Vec<Arc<AllocationRecord>> {
        self.registry
            .iter()
            .filter(|entry| entry.value().class_name() == class_name)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Records allocated at or after `timestamp_ms`.
    pub fn get_after(&self, timestamp_ms: u64) -> Vec<Arc<AllocationRecord>> {
        self.registry
            .iter()
            .filter(|entry| entry.value().timestamp_ms() >= timestamp_ms)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Records at least `age_ms` old.
    pub fn get_older_than(&self, age_ms: u64) -> Vec<Arc<AllocationRecord>> {
        let cutoff = now_millis().saturating_sub(age_ms);
        self.registry
            .iter()
            .filter(|entry| entry.value().timestamp_ms() <= cutoff)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn class_statistics(&self) -> HashMap<String, ClassStats> {
        self.class_stats
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    ClassStats::new(
                        entry.key().clone(),
                        entry.value().instance_count,
                        entry.value().total_size,
                    ),
                )
            })
            .collect()
    }

    pub fn site_statistics(&self) -> HashMap<String, SiteStats> {
        self.site_stats
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    SiteStats::new(
                        entry.key().clone(),
                        entry.value().allocation_count,
                        entry.value().total_size,
                    ),
                )
            })
            .collect()
    }

    /// The `limit` classes with the largest live footprint, descending.
    pub fn top_classes(&self, limit: usize) -> Vec<ClassStats> {
        let mut stats: Vec<ClassStats> = self.class_statistics().into_values().collect();
        stats.sort_by(|a, b| b.total_size.cmp(&a.total_size));
        stats.truncate(limit);
        stats
    }

    /// The `limit` sites with the largest cumulative footprint, descending.
    pub fn top_sites(&self, limit: usize) -> Vec<SiteStats> {
        let mut stats: Vec<SiteStats> = self.site_statistics().into_values().collect();
        stats.sort_by(|a, b| b.total_size.cmp(&a.total_size));
        stats.truncate(limit);
        stats
    }

    pub fn tracked_count(&self) -> u64 {
        self.tracked_count.load(Ordering::Relaxed)
    }

    pub fn total_tracked(&self) -> u64 {
        self.total_tracked.load(Ordering::Relaxed)
    }

    pub fn total_freed(&self) -> u64 {
        self.total_freed.load(Ordering::Relaxed)
    }

    pub fn evicted_entries(&self) -> u64 {
        self.evicted_entries.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> TrackerCounters {
        TrackerCounters {
            tracked_count: self.tracked_count(),
            total_tracked: self.total_tracked(),
            total_freed: self.total_freed(),
            evicted_entries: self.evicted_entries(),
        }
    }

    /// Empty the registry and its aggregates. Lifetime counters other than
    /// the live count are preserved; later inserts are fresh tracking.
    pub fn clear(&self) {
        self.registry.clear();
        self.class_stats.clear();
        self.site_stats.clear();
        self.tracked_count.store(0, Ordering::Relaxed);
    }

    /// Evict oldest-timestamp entries until the live set is back under the
    /// cap. Runs on the cleanup worker; callable directly as well.
    pub fn enforce_capacity(&self) {
        while self.tracked_count() > self.max_tracked_objects as u64 {
            let oldest = self
                .registry
                .iter()
                .map(|entry| {
                    (
                        entry.value().timestamp_ms(),
                        entry.value().object_id(),
                    )
                })
                .min();
            match oldest {
                Some((_, object_id)) => {
                    if self.evict(object_id).is_some() {
                        debug!(object_id, "evicted oldest tracked object");
                    }
                }
                None => break,
            }
        }
    }

    /// Start the periodic cleanup worker. No-op when already running.
    pub fn start_cleanup(self: &Arc<Self>) {
        if self.cleanup_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let running = Arc::clone(&self.cleanup_running);
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.cleanup_interval;
        let tick = Duration::from_millis(interval.as_millis().clamp(10, 100) as u64);

        let handle = thread::Builder::new()
            .name("heapscope-cleanup".to_string())
            .spawn(move || {
                debug!("cleanup worker started");
                let mut last_pass = Instant::now();
                while running.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    if last_pass.elapsed() < interval {
                        continue;
                    }
                    last_pass = Instant::now();

                    let Some(tracker) = weak.upgrade() else { break };
                    if catch_unwind(AssertUnwindSafe(|| tracker.enforce_capacity())).is_err() {
                        warn!("cleanup pass panicked; continuing");
                    }
                }
                debug!("cleanup worker stopped");
            });

        match handle {
            Ok(handle) => *self.cleanup_thread.lock() = Some(handle),
            Err(error) => {
                self.cleanup_running.store(false, Ordering::SeqCst);
                warn!(%error, "failed to start cleanup worker");
            }
        }
    }

    /// Stop the cleanup worker. The registry stays usable for reads and
    /// writes afterwards.
    pub fn stop_cleanup(&self) {
        self.cleanup_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.cleanup_thread.lock().take() {
            join_bounded(handle, WORKER_JOIN_LIMIT);
        }
    }
}

impl Drop for ObjectTracker {
    fn drop(&mut self) {
        self.cleanup_running.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for ObjectTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTracker")
            .field("tracked_count", &self.tracked_count())
            .field("total_tracked", &self.total_tracked())
            .field("total_freed", &self.total_freed())
            .field("evicted_entries", &self.evicted_entries())
            .field("max_tracked_objects", &self.max_tracked_objects)
            .finish()
    }
}
