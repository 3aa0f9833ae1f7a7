//! Sliding-window growth analysis.
//!
//! Keeps the most recent snapshot summaries and, per class, a bounded ring
//! of `(instance_count, total_size)` samples ordered newest-first. The
//! window-based leak strategy asks it how often and how steeply each class
//! grew across the window.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::snapshot::{ClassStats, HeapSnapshot};

/// Minimum samples a class needs before it is analyzed.
const MIN_SAMPLES: usize = 3;

/// OLS denominators below this are treated as degenerate.
const SLOPE_EPSILON: f64 = 1e-4;

/// Retained summary of one observed snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSummary {
    pub snapshot_id: u64,
    pub timestamp_ms: u64,
    pub heap_used: u64,
    pub class_stats: HashMap<String, ClassStats>,
}

#[derive(Debug, Default)]
struct ClassWindow {
    /// Newest-first `(instance_count, total_size)` samples.
    samples: VecDeque<(u64, u64)>,
}

/// Growth metrics for one class over the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub class_name: String,
    /// Adjacent sample pairs that grew.
    pub growth_count: u32,
    /// Sum of the positive deltas.
    pub total_growth: u64,
    pub max_instance_count: u64,
    pub min_instance_count: u64,
    /// Least-squares slope of instance count over the window, oldest to
    /// newest; positive means growth.
    pub slope: f64,
    pub current_instances: u64,
    pub current_size: u64,
}

impl WindowStats {
    /// Growth in enough of the window to look deliberate.
    pub fn is_consistent_growth(&self) -> bool {
        self.growth_count as u64 >= (self.max_instance_count / 4).max(1)
    }

    /// Average instances gained per growing step.
    pub fn growth_rate(&self) -> f64 {
        if self.growth_count > 0 {
            self.total_growth as f64 / self.growth_count as f64
        } else {
            0.0
        }
    }
}

impl fmt::Display for WindowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WindowStats{{class={}, growth={}, totalGrowth={}, slope={:.2}}}",
            self.class_name, self.growth_count, self.total_growth, self.slope
        )
    }
}

pub struct TimeWindowAnalyzer {
    window_size: usize,
    windows: Mutex<VecDeque<WindowSummary>>,
    class_windows: DashMap<String, ClassWindow>,
    snapshot_count: AtomicU64,
    first_snapshot_ms: AtomicU64,
    last_snapshot_ms: AtomicU64,
}

impl TimeWindowAnalyzer {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: Mutex::new(VecDeque::new()),
            class_windows: DashMap::new(),
            snapshot_count: AtomicU64::new(0),
            first_snapshot_ms: AtomicU64::new(0),
            last_snapshot_ms: AtomicU64::new(0),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Fold one snapshot into the window.
    pub fn add_snapshot(&self, snapshot: &HeapSnapshot) {
        let _ = self.first_snapshot_ms.compare_exchange(
            0,
            snapshot.timestamp_ms(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        self.last_snapshot_ms
            .store(snapshot.timestamp_ms(), Ordering::Relaxed);

        {
            let mut windows = self.windows.lock();
            windows.push_back(WindowSummary {
                snapshot_id: snapshot.snapshot_id(),
                timestamp_ms: snapshot.timestamp_ms(),
                heap_used: snapshot.total_heap_used(),
                class_stats: snapshot.class_stats().clone(),
            });
            while windows.len() > self.window_size {
                windows.pop_front();
            }
        }

        for (class_name, stats) in snapshot.class_stats() {
            let mut window = self.class_windows.entry(class_name.clone()).or_default();
            window
                .samples
                .push_front((stats.instance_count, stats.total_size));
            while window.samples.len() > self.window_size {
                window.samples.pop_back();
            }
        }

        self.snapshot_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Compute growth metrics for every class with enough samples.
    pub fn analyze(&self, current_stats: &HashMap<String, ClassStats>) -> HashMap<String, WindowStats> {
        let mut results = HashMap::new();
        for entry in self.class_windows.iter() {
            let samples = &entry.value().samples;
            if samples.len() < MIN_SAMPLES {
                continue;
            }

            let mut growth_count = 0u32;
            let mut total_growth = 0u64;
            for i in 0..samples.len() - 1 {
                let newer = samples[i].0 as i64;
                let older = samples[i + 1].0 as i64;
                if newer > older {
                    growth_count += 1;
                    total_growth += (newer - older) as u64;
                }
            }

            let counts: Vec<u64> = samples.iter().map(|(count, _)| *count).collect();
            let max_instance_count = counts.iter().copied().max().unwrap_or(0);
            let min_instance_count = counts.iter().copied().min().unwrap_or(0);

            // Regress in chronological order so growth reads as positive.
            let chronological: Vec<u64> = counts.iter().rev().copied().collect();
            let slope = least_squares_slope(&chronological);

            let current = current_stats.get(entry.key());
            results.insert(
                entry.key().clone(),
                WindowStats {
                    class_name: entry.key().clone(),
                    growth_count,
                    total_growth,
                    max_instance_count,
                    min_instance_count,
                    slope,
                    current_instances: current.map(|s| s.instance_count).unwrap_or(0),
                    current_size: current.map(|s| s.total_size).unwrap_or(0),
                },
            );
        }
        results
    }

    pub fn snapshot_count(&self) -> u64 {
        self.snapshot_count.load(Ordering::Relaxed)
    }

    /// Milliseconds between the first and the most recent snapshot.
    pub fn analysis_duration_ms(&self) -> u64 {
        let first = self.first_snapshot_ms.load(Ordering::Relaxed);
        let last = self.last_snapshot_ms.load(Ordering::Relaxed);
        if first > 0 {
            last.saturating_sub(first)
        } else {
            0
        }
    }

    pub fn summaries(&self) -> Vec<WindowSummary> {
        self.windows.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.windows.lock().clear();
        self.class_windows.clear();
        self.snapshot_count.store(0, Ordering::Relaxed);
        self.first_snapshot_ms.store(0, Ordering::Relaxed);
        self.last_snapshot_ms.store(0, Ordering::Relaxed);
    }
}

fn least_squares_slope(values: &[u64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for (i, value) in values.iter().enumerate() {
        let x = i as f64;
        let y = *value as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denominator = n as f64 * sum_x2 - sum_x * sum_x;
    if denominator.abs() < SLOPE_EPSILON {
        return 0.0;
    }
    (n as f64 * sum_xy - sum_x * sum_y) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::HeapSnapshot;

    fn snapshot_with(class_name: &str, count: u64, size: u64, timestamp_ms: u64) -> HeapSnapshot {
        HeapSnapshot::builder()
            .timestamp_ms(timestamp_ms)
            .class_stat(class_name, count, size)
            .build()
    }

    #[test]
    fn too_few_samples_yield_nothing() {
        let analyzer = TimeWindowAnalyzer::new(5);
        analyzer.add_snapshot(&snapshot_with("A", 10, 100, 1_000));
        analyzer.add_snapshot(&snapshot_with("A", 20, 200, 2_000));

        let results = analyzer.analyze(&HashMap::new());
        assert!(results.is_empty());
    }

    #[test]
    fn growth_counts_adjacent_increases() {
        let analyzer = TimeWindowAnalyzer::new(5);
        for (i, count) in [10u64, 20, 30, 40, 50].iter().enumerate() {
            analyzer.add_snapshot(&snapshot_with("Grow", *count, count * 1_000, 1_000 * (i as u64 + 1)));
        }

        let current = HashMap::from([(
            "Grow".to_string(),
            ClassStats::new("Grow", 50, 50_000),
        )]);
        let results = analyzer.analyze(&current);
        let stats = &results["Grow"];
        assert_eq!(stats.growth_count, 4);
        assert_eq!(stats.total_growth, 40);
        assert_eq!(stats.max_instance_count, 50);
        assert_eq!(stats.min_instance_count, 10);
        assert!(stats.slope > 0.0);
        assert!(stats.is_consistent_growth());
        assert_eq!(stats.current_instances, 50);
    }

    #[test]
    fn flat_series_has_zero_slope() {
        let analyzer = TimeWindowAnalyzer::new(5);
        for i in 1..=4u64 {
            analyzer.add_snapshot(&snapshot_with("Flat", 7, 700, 1_000 * i));
        }

        let results = analyzer.analyze(&HashMap::new());
        let stats = &results["Flat"];
        assert_eq!(stats.growth_count, 0);
        assert_eq!(stats.slope, 0.0);
        assert!(!stats.is_consistent_growth());
    }

    #[test]
    fn ring_is_bounded_by_window_size() {
        let analyzer = TimeWindowAnalyzer::new(3);
        for i in 1..=10u64 {
            analyzer.add_snapshot(&snapshot_with("A", i, i * 10, 1_000 * i));
        }

        let results = analyzer.analyze(&HashMap::new());
        let stats = &results["A"];
        // Only the last three samples (8, 9, 10) remain.
        assert_eq!(stats.min_instance_count, 8);
        assert_eq!(stats.max_instance_count, 10);
        assert_eq!(analyzer.summaries().len(), 3);
    }

    #[test]
    fn duration_spans_first_to_last() {
        let analyzer = TimeWindowAnalyzer::new(5);
        analyzer.add_snapshot(&snapshot_with("A", 1, 10, 5_000));
        analyzer.add_snapshot(&snapshot_with("A", 2, 20, 9_000));
        assert_eq!(analyzer.analysis_duration_ms(), 4_000);
        assert_eq!(analyzer.snapshot_count(), 2);

        analyzer.clear();
        assert_eq!(analyzer.analysis_duration_ms(), 0);
        assert_eq!(analyzer.snapshot_count(), 0);
    }

    #[test]
    fn slope_helper_matches_hand_computation() {
        // y = 2x + 1 over x = 0..4
        assert!((least_squares_slope(&[1, 3, 5, 7, 9]) - 2.0).abs() < 1e-9);
        assert_eq!(least_squares_slope(&[5, 5, 5]), 0.0);
        assert_eq!(least_squares_slope(&[5]), 0.0);
    }
}
