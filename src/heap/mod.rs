//! Heap-side components: live object registry, facade, workers, and the
//! runtime metrics boundary.

pub mod analyzer;
pub mod gc_monitor;
pub mod recorder;
pub mod registration;
pub mod size_estimator;
pub mod source;
pub mod tracker;

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Join a worker with a bounded wait; a worker that does not finish in time
/// is detached rather than waited on.
pub(crate) fn join_bounded(handle: JoinHandle<()>, limit: Duration) {
    let deadline = Instant::now() + limit;
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.is_finished() {
        let _ = handle.join();
    }
}

pub(crate) const WORKER_JOIN_LIMIT: Duration = Duration::from_millis(500);
