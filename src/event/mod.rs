//! Event intake from the in-process agent: event schema, the lock-free
//! queue between agent and analyzer, and the agent-side contract.

pub mod agent;
pub mod queue;

use crate::core::record::StackFrame;

/// One event emitted by the agent embedded in the target runtime.
///
/// `tag` uniquely names a live object; the agent guarantees the same tag
/// never refers to two different live objects at the same time.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfilerEvent {
    Alloc {
        tag: u64,
        size: u64,
        timestamp_ms: u64,
        class_name: String,
        thread_id: u64,
        thread_name: String,
        frames: Vec<StackFrame>,
    },
    Free {
        tag: u64,
        size: u64,
        timestamp_ms: u64,
        thread_id: u64,
    },
    GcStart {
        timestamp_ms: u64,
    },
    GcFinish {
        timestamp_ms: u64,
    },
}

impl ProfilerEvent {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            ProfilerEvent::Alloc { timestamp_ms, .. }
            | ProfilerEvent::Free { timestamp_ms, .. }
            | ProfilerEvent::GcStart { timestamp_ms }
            | ProfilerEvent::GcFinish { timestamp_ms } => *timestamp_ms,
        }
    }
}
