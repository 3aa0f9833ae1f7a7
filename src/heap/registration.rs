//! Process-wide analyzer handle.
//!
//! The embedded event source reaches the analyzer through one registered
//! handle rather than a hidden global. At most one handle is live at a
//! time, enforced by a compare-and-set on registration; dispatch while no
//! handle is registered is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::core::record::AllocationRecord;
use crate::error::{Error, Result};
use crate::heap::analyzer::HeapAnalyzer;

static REGISTERED: AtomicBool = AtomicBool::new(false);
static LIVE: Lazy<RwLock<Option<Arc<HeapAnalyzer>>>> = Lazy::new(|| RwLock::new(None));

/// Install `analyzer` as the live handle. Fails while another handle is
/// registered.
pub fn register(analyzer: Arc<HeapAnalyzer>) -> Result<()> {
    if REGISTERED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(Error::AlreadyRegistered);
    }
    *LIVE.write() = Some(analyzer);
    Ok(())
}

/// Drop the live handle, if any.
pub fn deregister() {
    *LIVE.write() = None;
    REGISTERED.store(false, Ordering::SeqCst);
}

pub fn registered() -> Option<Arc<HeapAnalyzer>> {
    LIVE.read().clone()
}

/// Route one record to the live analyzer. No-op when none is registered.
pub fn dispatch_allocation(record: AllocationRecord) {
    if let Some(analyzer) = registered() {
        analyzer.record_allocation(record);
    }
}
