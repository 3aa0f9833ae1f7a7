//! Multi-strategy leak detection.
//!
//! Three strategies run over the registry and the sliding window:
//! age-based (too many long-lived objects of one class), growth-based
//! (a class's live count far over threshold), and window-based (consistent
//! growth across recent snapshots). Candidates from all three land in a
//! single report; listeners are notified synchronously and their failures
//! are swallowed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::core::now_millis;
use crate::core::record::AllocationRecord;
use crate::core::snapshot::{ClassStats, HeapSnapshot};
use crate::heap::tracker::ObjectTracker;
use crate::leak::report::{LeakCandidate, LeakKind, LeakReport};
use crate::leak::window::TimeWindowAnalyzer;

pub type LeakListener = Box<dyn Fn(&Arc<LeakReport>) + Send + Sync>;

pub struct LeakDetector {
    age_threshold_ms: u64,
    growth_threshold: u64,
    report_history_cap: usize,

    tracker: Arc<ObjectTracker>,
    window: TimeWindowAnalyzer,

    detecting: AtomicBool,
    in_detect: AtomicBool,
    detection_count: AtomicU64,

    reports: RwLock<Vec<Arc<LeakReport>>>,
    listeners: RwLock<Vec<LeakListener>>,
}

impl LeakDetector {
    pub fn new(
        tracker: Arc<ObjectTracker>,
        age_threshold_ms: u64,
        growth_threshold: u32,
        window_size: usize,
        report_history_cap: usize,
    ) -> Self {
        Self {
            age_threshold_ms,
            growth_threshold: growth_threshold as u64,
            report_history_cap,
            tracker,
            window: TimeWindowAnalyzer::new(window_size),
            detecting: AtomicBool::new(false),
            in_detect: AtomicBool::new(false),
            detection_count: AtomicU64::new(0),
            reports: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn start(&self) {
        self.detecting.store(true, Ordering::SeqCst);
        info!(
            age_threshold_ms = self.age_threshold_ms,
            growth_threshold = self.growth_threshold,
            "leak detector started"
        );
    }

    pub fn stop(&self) {
        self.detecting.store(false, Ordering::SeqCst);
        info!("leak detector stopped");
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting.load(Ordering::SeqCst)
    }

    pub fn age_threshold_ms(&self) -> u64 {
        self.age_threshold_ms
    }

    pub fn growth_threshold(&self) -> u64 {
        self.growth_threshold
    }

    pub fn window(&self) -> &TimeWindowAnalyzer {
        &self.window
    }

    /// Feed one snapshot into the sliding window.
    pub fn observe_snapshot(&self, snapshot: &HeapSnapshot) {
        self.window.add_snapshot(snapshot);
    }

    /// Run all strategies. Returns `None` when detection is stopped. A
    /// listener that re-enters `detect` gets the last report back without
    /// a second pass.
    pub fn detect(&self) -> Option<Arc<LeakReport>> {
        if !self.detecting.load(Ordering::SeqCst) {
            return None;
        }
        if self.in_detect.swap(true, Ordering::SeqCst) {
            return self.latest_report();
        }

        let report = self.run_detection();
        self.in_detect.store(false, Ordering::SeqCst);
        Some(report)
    }

    fn run_detection(&self) -> Arc<LeakReport> {
        let mut candidates = Vec::new();
        candidates.extend(self.detect_by_age());
        candidates.extend(self.detect_by_growth());
        candidates.extend(self.detect_by_window());

        let has_findings = !candidates.is_empty();
        let report = Arc::new(LeakReport::new(
            now_millis(),
            candidates,
            self.detection_count.load(Ordering::Relaxed),
        ));

        if has_findings {
            self.detection_count.fetch_add(1, Ordering::Relaxed);
            {
                let mut reports = self.reports.write();
                reports.push(report.clone());
                while reports.len() > self.report_history_cap {
                    reports.remove(0);
                }
            }
            debug!(
                report_id = report.report_id(),
                candidates = report.candidate_count(),
                "leak report recorded"
            );
            self.notify_listeners(&report);
        }

        report
    }

    /// Classes with at least `growth_threshold` objects past the age cutoff.
    fn detect_by_age(&self) -> Vec<LeakCandidate> {
        let old_objects = self.tracker.get_older_than(self.age_threshold_ms);

        let mut by_class: HashMap<String, Vec<Arc<AllocationRecord>>> = HashMap::new();
        for record in old_objects {
            by_class
                .entry(record.class_name().to_string())
                .or_default()
                .push(record);
        }

        let mut candidates = Vec::new();
        for (class_name, records) in by_class {
            if (records.len() as u64) < self.growth_threshold {
                continue;
            }
            let total_size: u64 = records.iter().map(|r| r.size()).sum();
            let description = format!(
                "Found {} objects older than {} seconds",
                records.len(),
                self.age_threshold_ms / 1_000
            );
            candidates.push(LeakCandidate::new(
                class_name,
                records.len() as u64,
                total_size,
                LeakKind::AgeBased,
                records[0].allocation_site().to_string(),
                records,
                description,
            ));
        }
        candidates
    }

    /// Classes whose live count is at least twice the growth threshold.
    fn detect_by_growth(&self) -> Vec<LeakCandidate> {
        let mut candidates = Vec::new();
        for (class_name, stats) in self.tracker.class_statistics() {
            if stats.instance_count < self.growth_threshold * 2 {
                continue;
            }
            let records = self.tracker.get_by_class(&class_name);
            let description = format!(
                "Class has {} instances ({} bytes)",
                stats.instance_count, stats.total_size
            );
            candidates.push(LeakCandidate::new(
                class_name,
                stats.instance_count,
                stats.total_size,
                LeakKind::GrowthBased,
                top_allocation_site(&records),
                records,
                description,
            ));
        }
        candidates
    }

    /// Classes the window analyzer sees growing consistently.
    fn detect_by_window(&self) -> Vec<LeakCandidate> {
        let current_stats = self.tracker.class_statistics();
        let window_stats = self.window.analyze(&current_stats);

        let mut candidates = Vec::new();
        for (class_name, stats) in window_stats {
            if !stats.is_consistent_growth() || stats.growth_count < 3 {
                continue;
            }
            let Some(info) = current_stats.get(&class_name) else {
                continue;
            };
            if info.instance_count < self.growth_threshold {
                continue;
            }

            let records = self.tracker.get_by_class(&class_name);
            let description = format!(
                "Consistent growth over {} windows (total growth: {} instances)",
                stats.growth_count, stats.total_growth
            );
            candidates.push(LeakCandidate::new(
                class_name,
                info.instance_count,
                info.total_size,
                LeakKind::WindowBased,
                top_allocation_site(&records),
                records,
                description,
            ));
        }
        candidates
    }

    fn notify_listeners(&self, report: &Arc<LeakReport>) {
        let listeners = self.listeners.read();
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(report))).is_err() {
                warn!("leak listener panicked; ignoring");
            }
        }
    }

    pub fn add_listener(&self, listener: impl Fn(&Arc<LeakReport>) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    pub fn reports(&self) -> Vec<Arc<LeakReport>> {
        self.reports.read().clone()
    }

    pub fn latest_report(&self) -> Option<Arc<LeakReport>> {
        self.reports.read().last().cloned()
    }

    pub fn detection_count(&self) -> u64 {
        self.detection_count.load(Ordering::Relaxed)
    }

    /// Drop report history and window state.
    pub fn clear(&self) {
        self.reports.write().clear();
        self.window.clear();
    }
}

/// The most frequent allocation site across `records`; ties go to the site
/// encountered first.
fn top_allocation_site(records: &[Arc<AllocationRecord>]) -> String {
    if records.is_empty() {
        return "unknown".to_string();
    }

    let mut counts: HashMap<&str, u64> = HashMap::new();
    for record in records {
        *counts.entry(record.allocation_site()).or_insert(0) += 1;
    }

    let mut top_site = records[0].allocation_site();
    let mut top_count = 0u64;
    for record in records {
        let site = record.allocation_site();
        let count = counts[site];
        if count > top_count {
            top_count = count;
            top_site = site;
        }
    }
    top_site.to_string()
}
