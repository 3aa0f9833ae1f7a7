//! The agent-side contract.
//!
//! The analyzer consumes the event stream of an in-process agent embedded
//! in the target runtime. This module carries the contract the core
//! requires of that agent (capability set, sampling policy, cumulative
//! memory gauges) and `AgentEmitter`, the reference producer that honors
//! it. An alternative source that feeds records straight into the facade
//! satisfies the same contract; the core treats both uniformly.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::record::StackFrame;
use crate::event::queue::EventProducer;
use crate::event::ProfilerEvent;

/// Capabilities the agent must negotiate with the runtime at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub can_tag_objects: bool,
    pub can_generate_allocation_samples: bool,
    pub can_generate_object_free_events: bool,
    pub can_generate_gc_events: bool,
    pub can_get_method_names: bool,
    pub can_get_source_file_names: bool,
    pub can_get_line_numbers: bool,
}

impl AgentCapabilities {
    /// The full set this analyzer asks for.
    pub fn required() -> Self {
        Self {
            can_tag_objects: true,
            can_generate_allocation_samples: true,
            can_generate_object_free_events: true,
            can_generate_gc_events: true,
            can_get_method_names: true,
            can_get_source_file_names: true,
            can_get_line_numbers: true,
        }
    }

    /// Whether `self` grants everything `required` asks for.
    pub fn satisfies(&self, required: &AgentCapabilities) -> bool {
        (!required.can_tag_objects || self.can_tag_objects)
            && (!required.can_generate_allocation_samples || self.can_generate_allocation_samples)
            && (!required.can_generate_object_free_events || self.can_generate_object_free_events)
            && (!required.can_generate_gc_events || self.can_generate_gc_events)
            && (!required.can_get_method_names || self.can_get_method_names)
            && (!required.can_get_source_file_names || self.can_get_source_file_names)
            && (!required.can_get_line_numbers || self.can_get_line_numbers)
    }
}

/// Admit-every-Nth allocation sampling, applied before enqueueing.
/// An interval of 0 disables sampling entirely.
#[derive(Debug, Default)]
pub struct SamplingPolicy {
    interval: AtomicU32,
    counter: AtomicU64,
}

impl SamplingPolicy {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: AtomicU32::new(interval),
            counter: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval.load(Ordering::Relaxed)
    }

    /// Runtime-mutable.
    pub fn set_interval(&self, interval: u32) {
        self.interval.store(interval, Ordering::Relaxed);
    }

    /// Whether the next allocation should be recorded.
    pub fn admit(&self) -> bool {
        let interval = self.interval.load(Ordering::Relaxed);
        if interval <= 1 {
            return true;
        }
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        count % interval as u64 == 0
    }
}

/// Cumulative byte/count gauges kept on the agent side, readable without
/// draining the queue.
#[derive(Debug, Default)]
pub struct AgentStats {
    total_allocated: AtomicU64,
    total_freed: AtomicU64,
    current_usage: AtomicU64,
    alloc_count: AtomicU64,
    free_count: AtomicU64,
}

impl AgentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_alloc(&self, size: u64) {
        self.total_allocated.fetch_add(size, Ordering::Relaxed);
        self.current_usage.fetch_add(size, Ordering::Relaxed);
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_free(&self, size: u64) {
        self.total_freed.fetch_add(size, Ordering::Relaxed);
        let mut current = self.current_usage.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(size);
            match self.current_usage.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AgentMemoryStats {
        AgentMemoryStats {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            total_freed: self.total_freed.load(Ordering::Relaxed),
            current_usage: self.current_usage.load(Ordering::Relaxed),
            alloc_count: self.alloc_count.load(Ordering::Relaxed),
            free_count: self.free_count.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the agent gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMemoryStats {
    pub total_allocated: u64,
    pub total_freed: u64,
    pub current_usage: u64,
    pub alloc_count: u64,
    pub free_count: u64,
}

/// Reference producer side of the contract: samples allocations, maintains
/// the gauges, and never blocks the runtime on a full queue.
pub struct AgentEmitter {
    producer: EventProducer,
    sampling: SamplingPolicy,
    stats: AgentStats,
    capabilities: AgentCapabilities,
}

impl AgentEmitter {
    pub fn new(producer: EventProducer, sampling_interval: u32) -> Self {
        Self {
            producer,
            sampling: SamplingPolicy::new(sampling_interval),
            stats: AgentStats::new(),
            capabilities: AgentCapabilities::required(),
        }
    }

    pub fn capabilities(&self) -> &AgentCapabilities {
        &self.capabilities
    }

    pub fn sampling(&self) -> &SamplingPolicy {
        &self.sampling
    }

    pub fn memory_stats(&self) -> AgentMemoryStats {
        self.stats.snapshot()
    }

    /// Events the queue refused because it was full.
    pub fn dropped_events(&self) -> u64 {
        self.producer.dropped_events()
    }

    /// Offer one allocation. The gauges always see it; the queue only sees
    /// it when the sampling policy admits it.
    #[allow(clippy::too_many_arguments)]
    pub fn emit_alloc(
        &mut self,
        tag: u64,
        size: u64,
        timestamp_ms: u64,
        class_name: impl Into<String>,
        thread_id: u64,
        thread_name: impl Into<String>,
        frames: Vec<StackFrame>,
    ) -> bool {
        self.stats.record_alloc(size);
        if !self.sampling.admit() {
            return false;
        }
        self.producer.push(ProfilerEvent::Alloc {
            tag,
            size,
            timestamp_ms,
            class_name: class_name.into(),
            thread_id,
            thread_name: thread_name.into(),
            frames,
        })
    }

    /// Frees are never sampled; every one is offered to the queue.
    pub fn emit_free(&mut self, tag: u64, size: u64, timestamp_ms: u64, thread_id: u64) -> bool {
        self.stats.record_free(size);
        self.producer.push(ProfilerEvent::Free {
            tag,
            size,
            timestamp_ms,
            thread_id,
        })
    }

    pub fn emit_gc_start(&mut self, timestamp_ms: u64) -> bool {
        self.producer.push(ProfilerEvent::GcStart { timestamp_ms })
    }

    pub fn emit_gc_finish(&mut self, timestamp_ms: u64) -> bool {
        self.producer.push(ProfilerEvent::GcFinish { timestamp_ms })
    }

    /// Signal end-of-stream on runtime exit.
    pub fn close(&mut self) {
        self.producer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::queue::event_channel;

    #[test]
    fn required_capabilities_satisfy_themselves() {
        let caps = AgentCapabilities::required();
        assert!(caps.satisfies(&caps));

        let mut partial = caps;
        partial.can_get_line_numbers = false;
        assert!(!partial.satisfies(&caps));
        assert!(caps.satisfies(&partial));
    }

    #[test]
    fn sampling_admits_every_nth() {
        let policy = SamplingPolicy::new(10);
        let admitted = (0..100).filter(|_| policy.admit()).count();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn sampling_disabled_admits_all() {
        let policy = SamplingPolicy::new(0);
        assert!((0..50).all(|_| policy.admit()));
    }

    #[test]
    fn emitter_gauges_track_all_allocations() {
        let (producer, mut consumer) = event_channel(64);
        let mut emitter = AgentEmitter::new(producer, 5);

        for tag in 0..20u64 {
            emitter.emit_alloc(tag, 100, 1_000, "com.acme.Widget", 1, "main", vec![]);
        }
        emitter.emit_free(3, 100, 2_000, 1);

        let stats = emitter.memory_stats();
        assert_eq!(stats.alloc_count, 20);
        assert_eq!(stats.total_allocated, 2_000);
        assert_eq!(stats.free_count, 1);
        assert_eq!(stats.current_usage, 1_900);

        // Only every 5th allocation reached the queue, plus the free.
        let mut queued = 0;
        while consumer.pop().is_some() {
            queued += 1;
        }
        assert_eq!(queued, 5);
    }
}
