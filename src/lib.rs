//! # heapscope
//!
//! In-process memory-profiling core for managed-heap runtimes. An embedded
//! agent streams allocation and free events through a lock-free queue; the
//! analyzer maintains a live object registry with per-class and per-site
//! aggregates, captures point-in-time heap snapshots, and runs a
//! multi-strategy leak detector over the history.
//!
//! ## Features
//!
//! - **High-rate intake**: bounded SPSC ring between agent and analyzer;
//!   producers never block, overflow is dropped and counted
//! - **Live registry**: concurrent object-id map with per-class and
//!   per-allocation-site aggregates and oldest-first capacity eviction
//! - **Snapshots**: immutable heap views with diffing and growth queries
//! - **Leak detection**: age-based, growth-based, and sliding-window
//!   strategies with severity-scored reports and listener callbacks
//! - **Degrades, never fails**: queries on a cleared or idle analyzer
//!   return zeros and empties, not errors
//!
//! ## Quick start
//!
//! ```rust
//! use heapscope::{AllocationRecord, HeapAnalyzer, StackFrame};
//!
//! let analyzer = HeapAnalyzer::new();
//! analyzer.start_analysis();
//!
//! analyzer.record_allocation(
//!     AllocationRecord::builder()
//!         .object_id(1)
//!         .class_name("com.acme.Widget")
//!         .size(128)
//!         .frame(StackFrame::new("com.acme.App", "boot", "App.java", 42))
//!         .build(),
//! );
//!
//! let snapshot = analyzer.take_snapshot();
//! assert_eq!(snapshot.class_stats()["com.acme.Widget"].instance_count, 1);
//!
//! let report = analyzer.detect_leaks().expect("analysis is running");
//! println!("{} candidates", report.candidate_count());
//! analyzer.stop_analysis();
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod heap;
pub mod leak;

pub use config::AnalyzerConfig;
pub use error::{Error, Result};

pub use crate::core::counter::{CounterMap, CounterStats, ThreadSafeCounter};
pub use crate::core::record::{
    format_duration, AllocationRecord, RecordBuilder, StackFrame, MAX_STACK_FRAMES,
};
pub use crate::core::snapshot::{ClassDiff, ClassStats, HeapSnapshot, SnapshotDiff};

pub use crate::event::agent::{
    AgentCapabilities, AgentEmitter, AgentMemoryStats, AgentStats, SamplingPolicy,
};
pub use crate::event::queue::{event_channel, EventConsumer, EventProducer, DEFAULT_QUEUE_CAPACITY};
pub use crate::event::ProfilerEvent;

pub use crate::heap::analyzer::{AllocationStats, HeapAnalyzer};
pub use crate::heap::gc_monitor::{GcMonitor, GcStatistics};
pub use crate::heap::recorder::{AllocationRecorder, MemorySample};
pub use crate::heap::registration;
pub use crate::heap::size_estimator::{
    ClassLayout, SizeEstimator, StructuralSizeEstimator,
};
pub use crate::heap::source::{CollectorSample, HeapStatsSource, MemoryUsage, NullHeapSource};
pub use crate::heap::tracker::{ObjectTracker, SiteStats, TrackerCounters};

pub use crate::leak::detector::{LeakDetector, LeakListener};
pub use crate::leak::report::{LeakCandidate, LeakKind, LeakReport, ReportSummary};
pub use crate::leak::window::{TimeWindowAnalyzer, WindowStats, WindowSummary};
