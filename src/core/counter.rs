//! High-throughput atomic counters.
//!
//! `ThreadSafeCounter` accumulates count/sum/min/max/stddev without locks;
//! `CounterMap` keeps one counter per key with create-if-absent semantics.
//! These back the per-class and per-thread allocation-byte totals at the
//! facade.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct ThreadSafeCounter {
    count: AtomicU64,
    sum: AtomicU64,
    sum_squared: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    first: AtomicU64,
    last: AtomicU64,
    initialized: AtomicBool,
}

impl Default for ThreadSafeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadSafeCounter {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            sum_squared: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
            first: AtomicU64::new(0),
            last: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one observation of `value`.
    pub fn add(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.sum_squared
            .fetch_add(value.saturating_mul(value), Ordering::Relaxed);

        self.update_min(value);
        self.update_max(value);

        if !self.initialized.swap(true, Ordering::Relaxed) {
            self.first.store(value, Ordering::Relaxed);
        }
        self.last.store(value, Ordering::Relaxed);
    }

    fn update_min(&self, value: u64) {
        let mut current = self.min.load(Ordering::Relaxed);
        while value < current {
            match self.min.compare_exchange_weak(
                current,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn update_max(&self, value: u64) {
        let mut current = self.max.load(Ordering::Relaxed);
        while value > current {
            match self.max.compare_exchange_weak(
                current,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn average(&self) -> f64 {
        let count = self.count();
        if count > 0 {
            self.sum() as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn min(&self) -> u64 {
        if self.initialized.load(Ordering::Relaxed) {
            self.min.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn max(&self) -> u64 {
        if self.initialized.load(Ordering::Relaxed) {
            self.max.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn first(&self) -> u64 {
        self.first.load(Ordering::Relaxed)
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }

    /// Population standard deviation; 0 with fewer than two observations.
    pub fn stddev(&self) -> f64 {
        let count = self.count();
        if count < 2 {
            return 0.0;
        }
        let mean = self.average();
        let variance = self.sum_squared.load(Ordering::Relaxed) as f64 / count as f64 - mean * mean;
        variance.max(0.0).sqrt()
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.sum_squared.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
        self.first.store(0, Ordering::Relaxed);
        self.last.store(0, Ordering::Relaxed);
        self.initialized.store(false, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CounterStats {
        CounterStats {
            count: self.count(),
            sum: self.sum(),
            average: self.average(),
            min: self.min(),
            max: self.max(),
            stddev: self.stddev(),
            first: self.first(),
            last: self.last(),
        }
    }
}

/// Point-in-time summary of a counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterStats {
    pub count: u64,
    pub sum: u64,
    pub average: f64,
    pub min: u64,
    pub max: u64,
    pub stddev: f64,
    pub first: u64,
    pub last: u64,
}

/// One `ThreadSafeCounter` per key, created on first use.
#[derive(Debug)]
pub struct CounterMap<K: Eq + Hash> {
    counters: DashMap<K, Arc<ThreadSafeCounter>>,
}

impl<K: Eq + Hash + Clone> Default for CounterMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> CounterMap<K> {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    pub fn add(&self, key: K, value: u64) {
        self.counter(key).add(value);
    }

    pub fn increment(&self, key: K) {
        self.counter(key).increment();
    }

    fn counter(&self, key: K) -> Arc<ThreadSafeCounter> {
        self.counters
            .entry(key)
            .or_insert_with(|| Arc::new(ThreadSafeCounter::new()))
            .clone()
    }

    pub fn get(&self, key: &K) -> Option<Arc<ThreadSafeCounter>> {
        self.counters.get(key).map(|entry| entry.value().clone())
    }

    pub fn keys(&self) -> Vec<K> {
        self.counters.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// The `limit` keys with the largest sums, descending.
    pub fn sorted_by_sum(&self, limit: usize) -> Vec<(K, u64)> {
        let mut entries: Vec<(K, u64)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().sum()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(limit);
        entries
    }

    pub fn clear(&self) {
        self.counters.clear();
    }
}
