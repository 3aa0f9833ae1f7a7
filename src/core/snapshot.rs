//! Point-in-time heap snapshots and snapshot diffing.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::record::AllocationRecord;
use crate::core::{current_thread_id, current_thread_name, now_millis};

static SNAPSHOT_IDS: AtomicU64 = AtomicU64::new(0);

/// Aggregate statistics for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStats {
    pub class_name: String,
    pub instance_count: u64,
    pub total_size: u64,
    pub avg_size: u64,
}

impl ClassStats {
    pub fn new(class_name: impl Into<String>, instance_count: u64, total_size: u64) -> Self {
        Self {
            class_name: class_name.into(),
            instance_count,
            total_size,
            avg_size: if instance_count > 0 {
                total_size / instance_count
            } else {
                0
            },
        }
    }
}

impl fmt::Display for ClassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} instances, {} bytes (avg: {})",
            self.class_name, self.instance_count, self.total_size, self.avg_size
        )
    }
}

/// Immutable point-in-time view of heap totals, class aggregates, and a
/// bounded set of recent allocations. Snapshot ids are strictly increasing
/// across the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapSnapshot {
    snapshot_id: u64,
    timestamp_ms: u64,
    thread_id: u64,
    thread_name: String,
    total_heap_used: u64,
    total_heap_committed: u64,
    total_heap_max: u64,
    class_stats: HashMap<String, ClassStats>,
    allocations: HashMap<u64, Arc<AllocationRecord>>,
}

impl HeapSnapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
    }

    pub fn snapshot_id(&self) -> u64 {
        self.snapshot_id
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn total_heap_used(&self) -> u64 {
        self.total_heap_used
    }

    pub fn total_heap_committed(&self) -> u64 {
        self.total_heap_committed
    }

    pub fn total_heap_max(&self) -> u64 {
        self.total_heap_max
    }

    pub fn class_stats(&self) -> &HashMap<String, ClassStats> {
        &self.class_stats
    }

    pub fn allocations(&self) -> &HashMap<u64, Arc<AllocationRecord>> {
        &self.allocations
    }

    pub fn age_ms(&self) -> u64 {
        now_millis().saturating_sub(self.timestamp_ms)
    }

    /// Diff this snapshot (as the base) against a later one.
    pub fn compare(&self, current: &HeapSnapshot) -> SnapshotDiff {
        SnapshotDiff::between(self, current)
    }
}

impl PartialEq for HeapSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot_id == other.snapshot_id
    }
}

impl Eq for HeapSnapshot {}

impl PartialOrd for HeapSnapshot {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapSnapshot {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.timestamp_ms
            .cmp(&other.timestamp_ms)
            .then(self.snapshot_id.cmp(&other.snapshot_id))
    }
}

impl fmt::Display for HeapSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HeapSnapshot{{id={}, time={}, classes={}, allocs={}, heap={}MB}}",
            self.snapshot_id,
            self.timestamp_ms,
            self.class_stats.len(),
            self.allocations.len(),
            self.total_heap_used / 1024 / 1024
        )
    }
}

#[derive(Debug)]
pub struct SnapshotBuilder {
    snapshot_id: u64,
    timestamp_ms: u64,
    thread_id: u64,
    thread_name: String,
    total_heap_used: u64,
    total_heap_committed: u64,
    total_heap_max: u64,
    class_stats: HashMap<String, ClassStats>,
    allocations: HashMap<u64, Arc<AllocationRecord>>,
}

impl SnapshotBuilder {
    fn new() -> Self {
        Self {
            snapshot_id: SNAPSHOT_IDS.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp_ms: now_millis(),
            thread_id: current_thread_id(),
            thread_name: current_thread_name(),
            total_heap_used: 0,
            total_heap_committed: 0,
            total_heap_max: 0,
            class_stats: HashMap::new(),
            allocations: HashMap::new(),
        }
    }

    pub fn timestamp_ms(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn heap_totals(mut self, used: u64, committed: u64, max: u64) -> Self {
        self.total_heap_used = used;
        self.total_heap_committed = committed;
        self.total_heap_max = max;
        self
    }

    pub fn class_stats(mut self, class_stats: HashMap<String, ClassStats>) -> Self {
        self.class_stats = class_stats;
        self
    }

    pub fn class_stat(mut self, class_name: impl Into<String>, count: u64, size: u64) -> Self {
        let stats = ClassStats::new(class_name, count, size);
        self.class_stats.insert(stats.class_name.clone(), stats);
        self
    }

    pub fn allocation(mut self, record: Arc<AllocationRecord>) -> Self {
        self.allocations.insert(record.object_id(), record);
        self
    }

    pub fn allocations(mut self, records: impl IntoIterator<Item = Arc<AllocationRecord>>) -> Self {
        for record in records {
            self.allocations.insert(record.object_id(), record);
        }
        self
    }

    pub fn build(self) -> HeapSnapshot {
        HeapSnapshot {
            snapshot_id: self.snapshot_id,
            timestamp_ms: self.timestamp_ms,
            thread_id: self.thread_id,
            thread_name: self.thread_name,
            total_heap_used: self.total_heap_used,
            total_heap_committed: self.total_heap_committed,
            total_heap_max: self.total_heap_max,
            class_stats: self.class_stats,
            allocations: self.allocations,
        }
    }
}

/// Per-class movement between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDiff {
    pub class_name: String,
    pub instance_delta: i64,
    pub size_delta: i64,
}

impl fmt::Display for ClassDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:+} instances, {:+} bytes",
            self.class_name, self.instance_delta, self.size_delta
        )
    }
}

/// The difference between a base snapshot and a later one. Classes absent
/// from the base count as full deltas; allocations are matched by object id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub base_snapshot_id: u64,
    pub current_snapshot_id: u64,
    pub time_delta_ms: i64,
    pub heap_delta: i64,
    pub class_diffs: HashMap<String, ClassDiff>,
    pub new_allocations: Vec<Arc<AllocationRecord>>,
    pub freed_allocations: Vec<u64>,
}

impl SnapshotDiff {
    fn between(base: &HeapSnapshot, current: &HeapSnapshot) -> Self {
        let mut class_diffs = HashMap::new();
        for (class_name, current_stats) in &current.class_stats {
            let diff = match base.class_stats.get(class_name) {
                Some(base_stats) => ClassDiff {
                    class_name: class_name.clone(),
                    instance_delta: current_stats.instance_count as i64
                        - base_stats.instance_count as i64,
                    size_delta: current_stats.total_size as i64 - base_stats.total_size as i64,
                },
                None => ClassDiff {
                    class_name: class_name.clone(),
                    instance_delta: current_stats.instance_count as i64,
                    size_delta: current_stats.total_size as i64,
                },
            };
            class_diffs.insert(class_name.clone(), diff);
        }

        let mut new_allocations: Vec<Arc<AllocationRecord>> = current
            .allocations
            .iter()
            .filter(|(object_id, _)| !base.allocations.contains_key(*object_id))
            .map(|(_, record)| record.clone())
            .collect();
        new_allocations.sort_by_key(|record| record.object_id());

        let mut freed_allocations: Vec<u64> = base
            .allocations
            .keys()
            .filter(|object_id| !current.allocations.contains_key(*object_id))
            .copied()
            .collect();
        freed_allocations.sort_unstable();

        Self {
            base_snapshot_id: base.snapshot_id,
            current_snapshot_id: current.snapshot_id,
            time_delta_ms: current.timestamp_ms as i64 - base.timestamp_ms as i64,
            heap_delta: current.total_heap_used as i64 - base.total_heap_used as i64,
            class_diffs,
            new_allocations,
            freed_allocations,
        }
    }

    /// Classes whose instance count grew by at least `min_growth`, sorted by
    /// growth descending.
    pub fn potential_leaks(&self, min_growth: i64) -> Vec<ClassDiff> {
        let mut leaks: Vec<ClassDiff> = self
            .class_diffs
            .values()
            .filter(|diff| diff.instance_delta >= min_growth)
            .cloned()
            .collect();
        leaks.sort_by(|a, b| b.instance_delta.cmp(&a.instance_delta));
        leaks
    }
}

impl fmt::Display for SnapshotDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SnapshotDiff{{time={}ms, heap={:+}MB, classes={}}}",
            self.time_delta_ms,
            self.heap_delta / 1024 / 1024,
            self.class_diffs.len()
        )
    }
}
