//! Instrumentation-path allocation recorder.
//!
//! Stands in for the native agent when none is loaded: callers hand it
//! records built at constructor completion and it applies the same sampling
//! policy the agent would. It also keeps a short history of heap usage,
//! sampled on its own worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::now_millis;
use crate::core::record::AllocationRecord;
use crate::event::agent::SamplingPolicy;
use crate::heap::source::HeapStatsSource;
use crate::heap::{join_bounded, WORKER_JOIN_LIMIT};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
const MAX_MEMORY_HISTORY: usize = 1_000;

/// One heap-usage observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub timestamp_ms: u64,
    pub used: u64,
    pub committed: u64,
    pub max: u64,
}

impl MemorySample {
    pub fn usage_percent(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        self.used as f64 / self.max as f64 * 100.0
    }
}

struct RecorderState {
    recording: AtomicBool,
    record_count: AtomicU64,
    record_bytes: AtomicU64,
    sampling: SamplingPolicy,
    history: Mutex<VecDeque<MemorySample>>,
    source: Arc<dyn HeapStatsSource>,
}

impl RecorderState {
    fn sample_memory(&self) {
        let usage = self.source.heap_usage();
        let sample = MemorySample {
            timestamp_ms: now_millis(),
            used: usage.used,
            committed: usage.committed,
            max: usage.max,
        };
        let mut history = self.history.lock();
        history.push_back(sample);
        while history.len() > MAX_MEMORY_HISTORY {
            history.pop_front();
        }
    }
}

pub struct AllocationRecorder {
    state: Arc<RecorderState>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AllocationRecorder {
    pub fn new(source: Arc<dyn HeapStatsSource>, sampling_interval: u32) -> Self {
        Self {
            state: Arc::new(RecorderState {
                recording: AtomicBool::new(false),
                record_count: AtomicU64::new(0),
                record_bytes: AtomicU64::new(0),
                sampling: SamplingPolicy::new(sampling_interval),
                history: Mutex::new(VecDeque::new()),
                source,
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state.recording.load(Ordering::Relaxed)
    }

    /// Start recording and the memory-sampling worker. No-op when running.
    pub fn start(&self) {
        if self.state.recording.swap(true, Ordering::SeqCst) {
            return;
        }

        let state = Arc::clone(&self.state);
        let handle = thread::Builder::new()
            .name("heapscope-recorder".to_string())
            .spawn(move || {
                debug!("allocation recorder sampling loop started");
                while state.recording.load(Ordering::Relaxed) {
                    state.sample_memory();
                    thread::sleep(SAMPLE_INTERVAL);
                }
                debug!("allocation recorder sampling loop stopped");
            });

        match handle {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                info!("allocation recorder started");
            }
            Err(error) => {
                self.state.recording.store(false, Ordering::SeqCst);
                warn!(%error, "failed to start allocation recorder");
            }
        }
    }

    pub fn stop(&self) {
        if !self.state.recording.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            join_bounded(handle, WORKER_JOIN_LIMIT);
        }
        info!("allocation recorder stopped");
    }

    /// Apply the recording flag and sampling policy to one record. Returns
    /// the record back when it should be forwarded to the analyzer.
    pub fn offer(&self, record: AllocationRecord) -> Option<AllocationRecord> {
        if !self.state.recording.load(Ordering::Relaxed) {
            return None;
        }
        if !self.state.sampling.admit() {
            return None;
        }
        self.state.record_count.fetch_add(1, Ordering::Relaxed);
        self.state
            .record_bytes
            .fetch_add(record.size(), Ordering::Relaxed);
        Some(record)
    }

    pub fn record_count(&self) -> u64 {
        self.state.record_count.load(Ordering::Relaxed)
    }

    pub fn record_bytes(&self) -> u64 {
        self.state.record_bytes.load(Ordering::Relaxed)
    }

    pub fn sampling_interval(&self) -> u32 {
        self.state.sampling.interval()
    }

    pub fn set_sampling_interval(&self, interval: u32) {
        self.state.sampling.set_interval(interval);
    }

    pub fn memory_history(&self) -> Vec<MemorySample> {
        self.state.history.lock().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.state.history.lock().clear();
        self.state.record_count.store(0, Ordering::Relaxed);
        self.state.record_bytes.store(0, Ordering::Relaxed);
    }
}

impl Drop for AllocationRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::source::NullHeapSource;

    fn record(object_id: u64, size: u64) -> AllocationRecord {
        AllocationRecord::builder()
            .object_id(object_id)
            .class_name("com.acme.Widget")
            .size(size)
            .build()
    }

    #[test]
    fn offer_refuses_when_not_recording() {
        let recorder = AllocationRecorder::new(Arc::new(NullHeapSource), 0);
        assert!(recorder.offer(record(1, 64)).is_none());
        assert_eq!(recorder.record_count(), 0);
    }

    #[test]
    fn offer_applies_sampling() {
        let recorder = AllocationRecorder::new(Arc::new(NullHeapSource), 4);
        recorder.start();
        let admitted = (0..40)
            .filter(|id| recorder.offer(record(*id, 10)).is_some())
            .count();
        recorder.stop();

        assert_eq!(admitted, 10);
        assert_eq!(recorder.record_count(), 10);
        assert_eq!(recorder.record_bytes(), 100);
    }

    #[test]
    fn sampling_interval_is_mutable_at_runtime() {
        let recorder = AllocationRecorder::new(Arc::new(NullHeapSource), 10);
        recorder.set_sampling_interval(0);
        recorder.start();
        assert!(recorder.offer(record(1, 8)).is_some());
        recorder.stop();
    }

    #[test]
    fn memory_history_fills_while_running() {
        let recorder = AllocationRecorder::new(Arc::new(NullHeapSource), 0);
        recorder.start();
        thread::sleep(Duration::from_millis(250));
        recorder.stop();

        let history = recorder.memory_history();
        assert!(!history.is_empty());
        assert_eq!(history[0].used, 0);
    }

    #[test]
    fn clear_resets_counters_and_history() {
        let recorder = AllocationRecorder::new(Arc::new(NullHeapSource), 0);
        recorder.start();
        recorder.offer(record(1, 8));
        recorder.stop();
        recorder.clear();

        assert_eq!(recorder.record_count(), 0);
        assert!(recorder.memory_history().is_empty());
    }
}
