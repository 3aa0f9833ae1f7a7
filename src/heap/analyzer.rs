//! The heap analyzer facade.
//!
//! Owns the registry, recorder, GC monitor, and leak detector; consumes
//! the agent event stream; and answers every query the front-ends ask.
//! Ingest and queries never fail: missing data degrades to empty results.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AnalyzerConfig;
use crate::core::counter::{CounterMap, ThreadSafeCounter};
use crate::core::now_millis;
use crate::core::record::AllocationRecord;
use crate::core::snapshot::{HeapSnapshot, SnapshotDiff};
use crate::error::Result;
use crate::event::queue::EventConsumer;
use crate::event::ProfilerEvent;
use crate::heap::gc_monitor::{GcMonitor, GcStatistics};
use crate::heap::recorder::{AllocationRecorder, MemorySample};
use crate::heap::size_estimator::{ClassLayout, SizeEstimator, StructuralSizeEstimator};
use crate::heap::source::{HeapStatsSource, MemoryUsage, NullHeapSource};
use crate::heap::tracker::ObjectTracker;
use crate::heap::{join_bounded, WORKER_JOIN_LIMIT};
use crate::leak::detector::LeakDetector;
use crate::leak::report::LeakReport;

/// Idle sleep of the event-processor thread when the queue is empty.
const EVENT_IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Facade-level allocation totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStats {
    pub allocation_count: u64,
    pub total_bytes: u64,
    pub top_classes: Vec<(String, u64)>,
    pub top_threads: Vec<(String, u64)>,
}

pub struct HeapAnalyzer {
    config: AnalyzerConfig,

    tracker: Arc<ObjectTracker>,
    recorder: AllocationRecorder,
    gc_monitor: GcMonitor,
    detector: LeakDetector,
    heap_source: Arc<dyn HeapStatsSource>,
    size_estimator: Arc<dyn SizeEstimator>,

    analyzing: AtomicBool,
    analysis_started_ms: AtomicU64,

    snapshots: RwLock<Vec<Arc<HeapSnapshot>>>,
    recent_allocations: Mutex<VecDeque<Arc<AllocationRecord>>>,

    alloc_counter: ThreadSafeCounter,
    class_alloc_counter: CounterMap<String>,
    thread_alloc_counter: CounterMap<String>,

    events_stop: Arc<AtomicBool>,
    event_thread: Mutex<Option<thread::JoinHandle<()>>>,
    stream_terminated: Arc<AtomicBool>,
}

impl HeapAnalyzer {
    /// Default configuration, null heap source.
    pub fn new() -> Arc<Self> {
        Self::with_config(AnalyzerConfig::default()).expect("default configuration is valid")
    }

    pub fn with_config(config: AnalyzerConfig) -> Result<Arc<Self>> {
        Self::with_parts(
            config,
            Arc::new(NullHeapSource),
            Arc::new(StructuralSizeEstimator::default()),
        )
    }

    pub fn with_parts(
        config: AnalyzerConfig,
        heap_source: Arc<dyn HeapStatsSource>,
        size_estimator: Arc<dyn SizeEstimator>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let tracker = ObjectTracker::spawn(config.max_tracked_objects, config.cleanup_interval_ms);
        let detector = LeakDetector::new(
            tracker.clone(),
            config.age_threshold_ms,
            config.growth_threshold,
            config.window_size,
            config.report_history_cap,
        );
        let recorder = AllocationRecorder::new(heap_source.clone(), config.sampling_interval);
        let gc_monitor = GcMonitor::new(heap_source.clone());

        Ok(Arc::new(Self {
            config,
            tracker,
            recorder,
            gc_monitor,
            detector,
            heap_source,
            size_estimator,
            analyzing: AtomicBool::new(false),
            analysis_started_ms: AtomicU64::new(0),
            snapshots: RwLock::new(Vec::new()),
            recent_allocations: Mutex::new(VecDeque::new()),
            alloc_counter: ThreadSafeCounter::new(),
            class_alloc_counter: CounterMap::new(),
            thread_alloc_counter: CounterMap::new(),
            events_stop: Arc::new(AtomicBool::new(false)),
            event_thread: Mutex::new(None),
            stream_terminated: Arc::new(AtomicBool::new(false)),
        }))
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Start monitoring and detection. Idempotent.
    pub fn start_analysis(&self) {
        if self.analyzing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.analysis_started_ms.store(now_millis(), Ordering::Relaxed);
        self.gc_monitor.start();
        self.recorder.start();
        self.detector.start();
        self.tracker.start_cleanup();
        info!("heap analysis started");
    }

    /// Stop monitoring and detection. Idempotent; in-flight detection
    /// completes normally.
    pub fn stop_analysis(&self) {
        if !self.analyzing.swap(false, Ordering::SeqCst) {
            return;
        }
        self.detector.stop();
        self.gc_monitor.stop();
        self.recorder.stop();
        self.tracker.stop_cleanup();
        info!("heap analysis stopped");
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing.load(Ordering::SeqCst)
    }

    pub fn analysis_started_ms(&self) -> u64 {
        self.analysis_started_ms.load(Ordering::Relaxed)
    }

    /// Ingest one record: remember it, feed the byte counters, and track
    /// it in the registry. Accepted from any thread, analyzing or not.
    pub fn record_allocation(&self, record: AllocationRecord) {
        let record = Arc::new(record);

        {
            let mut recent = self.recent_allocations.lock();
            recent.push_back(record.clone());
            while recent.len() > self.config.recent_allocations_cap {
                recent.pop_front();
            }
        }

        self.alloc_counter.add(record.size());
        self.class_alloc_counter
            .add(record.class_name().to_string(), record.size());
        self.thread_alloc_counter
            .add(record.thread_name().to_string(), record.size());

        self.tracker.track(record);
    }

    /// Ingest through the instrumentation path: the recorder's flag and
    /// sampling policy decide whether the record is kept.
    pub fn record_sampled_allocation(&self, record: AllocationRecord) {
        if let Some(record) = self.recorder.offer(record) {
            self.record_allocation(record);
        }
    }

    /// Consume an agent event stream on a dedicated thread. The thread
    /// drains the queue and exits when the agent signals end-of-stream.
    pub fn attach_event_stream(self: &Arc<Self>, mut events: EventConsumer) -> Result<()> {
        self.events_stop.store(false, Ordering::SeqCst);
        self.stream_terminated.store(false, Ordering::SeqCst);

        let weak: Weak<Self> = Arc::downgrade(self);
        let stop = Arc::clone(&self.events_stop);
        let terminated = Arc::clone(&self.stream_terminated);

        let handle = thread::Builder::new()
            .name("heapscope-events".to_string())
            .spawn(move || {
                debug!("event processor started");
                let mut gc_start_ms: Option<u64> = None;
                loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match events.pop() {
                        Some(event) => {
                            let Some(analyzer) = weak.upgrade() else { break };
                            analyzer.apply_event(event, &mut gc_start_ms);
                        }
                        None if events.is_closed() => {
                            // The close flag may become visible before the
                            // final publish; re-check the queue once the
                            // close has been observed.
                            if let Some(event) = events.pop() {
                                let Some(analyzer) = weak.upgrade() else { break };
                                analyzer.apply_event(event, &mut gc_start_ms);
                                continue;
                            }
                            terminated.store(true, Ordering::SeqCst);
                            debug!("event stream terminated");
                            break;
                        }
                        None => thread::sleep(EVENT_IDLE_SLEEP),
                    }
                }
                debug!("event processor stopped");
            })?;

        *self.event_thread.lock() = Some(handle);
        Ok(())
    }

    /// Stop the event-processor thread without waiting for end-of-stream.
    pub fn detach_event_stream(&self) {
        self.events_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.event_thread.lock().take() {
            join_bounded(handle, WORKER_JOIN_LIMIT);
        }
    }

    /// True once the agent closed the stream and the queue was drained.
    pub fn is_stream_terminated(&self) -> bool {
        self.stream_terminated.load(Ordering::SeqCst)
    }

    fn apply_event(&self, event: ProfilerEvent, gc_start_ms: &mut Option<u64>) {
        match event {
            ProfilerEvent::Alloc {
                tag,
                size,
                timestamp_ms,
                class_name,
                thread_id,
                thread_name,
                frames,
            } => {
                let size = if size == 0 {
                    self.size_estimator.estimate(&ClassLayout::opaque())
                } else {
                    size
                };
                let record = AllocationRecord::new(
                    tag,
                    class_name,
                    size,
                    timestamp_ms,
                    thread_id,
                    thread_name,
                    frames,
                    &self.config.framework_prefixes,
                );
                self.record_allocation(record);
            }
            ProfilerEvent::Free { tag, .. } => {
                self.tracker.untrack(tag);
            }
            ProfilerEvent::GcStart { timestamp_ms } => {
                *gc_start_ms = Some(timestamp_ms);
            }
            ProfilerEvent::GcFinish { timestamp_ms } => {
                if let Some(start_ms) = gc_start_ms.take() {
                    self.gc_monitor
                        .record_pause(timestamp_ms.saturating_sub(start_ms));
                } else {
                    warn!("gc finish without matching start");
                }
            }
        }
    }

    /// Capture a snapshot of the current registry state, heap totals, and
    /// recent allocations, and feed it to the sliding window.
    pub fn take_snapshot(&self) -> Arc<HeapSnapshot> {
        let mut snapshots = self.snapshots.write();

        let usage = self.heap_source.heap_usage();
        let recent: Vec<Arc<AllocationRecord>> =
            self.recent_allocations.lock().iter().cloned().collect();

        let snapshot = Arc::new(
            HeapSnapshot::builder()
                .heap_totals(usage.used, usage.committed, usage.max)
                .class_stats(self.tracker.class_statistics())
                .allocations(recent)
                .build(),
        );

        snapshots.push(snapshot.clone());
        while snapshots.len() > self.config.snapshot_history_cap {
            snapshots.remove(0);
        }
        drop(snapshots);

        self.detector.observe_snapshot(&snapshot);
        debug!(snapshot_id = snapshot.snapshot_id(), "snapshot captured");
        snapshot
    }

    pub fn snapshots(&self) -> Vec<Arc<HeapSnapshot>> {
        self.snapshots.read().clone()
    }

    pub fn latest_snapshot(&self) -> Option<Arc<HeapSnapshot>> {
        self.snapshots.read().last().cloned()
    }

    /// Diff two retained snapshots by id. `None` when either is unknown.
    pub fn compare_snapshots(&self, base_id: u64, current_id: u64) -> Option<SnapshotDiff> {
        let snapshots = self.snapshots.read();
        let base = snapshots.iter().find(|s| s.snapshot_id() == base_id)?;
        let current = snapshots.iter().find(|s| s.snapshot_id() == current_id)?;
        Some(base.compare(current))
    }

    /// Run leak detection. `None` while analysis is stopped.
    pub fn detect_leaks(&self) -> Option<Arc<LeakReport>> {
        self.detector.detect()
    }

    pub fn leak_detector(&self) -> &LeakDetector {
        &self.detector
    }

    pub fn tracker(&self) -> &Arc<ObjectTracker> {
        &self.tracker
    }

    pub fn recorder(&self) -> &AllocationRecorder {
        &self.recorder
    }

    pub fn heap_memory_usage(&self) -> MemoryUsage {
        self.heap_source.heap_usage()
    }

    pub fn heap_pool_usages(&self) -> Vec<(String, MemoryUsage)> {
        self.heap_source.pool_usages()
    }

    pub fn gc_statistics(&self) -> GcStatistics {
        self.gc_monitor.statistics()
    }

    pub fn memory_history(&self) -> Vec<MemorySample> {
        self.recorder.memory_history()
    }

    pub fn allocation_stats(&self) -> AllocationStats {
        AllocationStats {
            allocation_count: self.alloc_counter.count(),
            total_bytes: self.alloc_counter.sum(),
            top_classes: self.class_alloc_counter.sorted_by_sum(10),
            top_threads: self.thread_alloc_counter.sorted_by_sum(10),
        }
    }

    /// Retained recent allocations in arrival order, at most `limit`.
    pub fn recent_allocations(&self, limit: usize) -> Vec<Arc<AllocationRecord>> {
        let recent = self.recent_allocations.lock();
        recent.iter().take(limit).cloned().collect()
    }

    /// Drop all accumulated state. Later ingest is fresh tracking.
    pub fn clear(&self) {
        self.snapshots.write().clear();
        self.recent_allocations.lock().clear();
        self.alloc_counter.reset();
        self.class_alloc_counter.clear();
        self.thread_alloc_counter.clear();
        self.recorder.clear();
        self.tracker.clear();
        self.detector.clear();
        info!("analyzer state cleared");
    }
}

impl Drop for HeapAnalyzer {
    fn drop(&mut self) {
        self.events_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.event_thread.lock().take() {
            join_bounded(handle, WORKER_JOIN_LIMIT);
        }
        self.stop_analysis();
    }
}
