//! Registry lifecycle scenarios: allocation round-trips, capacity
//! eviction, and aggregate invariants under concurrency.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use heapscope::{AllocationRecord, HeapAnalyzer, ObjectTracker, StackFrame};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn record_at_site(object_id: u64, class_name: &str, size: u64, timestamp_ms: u64) -> AllocationRecord {
    AllocationRecord::builder()
        .object_id(object_id)
        .class_name(class_name)
        .size(size)
        .timestamp_ms(timestamp_ms)
        .frame(StackFrame::new("C", "f", "C.java", 10))
        .build()
}

#[test]
fn allocation_free_round_trip() {
    let analyzer = HeapAnalyzer::new();
    analyzer.start_analysis();

    analyzer.record_allocation(record_at_site(1, "C", 100, 1_000));

    let tracker = analyzer.tracker();
    assert_eq!(tracker.tracked_count(), 1);

    let classes = tracker.class_statistics();
    assert_eq!(classes["C"].instance_count, 1);
    assert_eq!(classes["C"].total_size, 100);
    assert_eq!(classes["C"].avg_size, 100);

    let sites = tracker.site_statistics();
    assert_eq!(sites["C.f(C.java:10)"].allocation_count, 1);
    assert_eq!(sites["C.f(C.java:10)"].total_size, 100);

    tracker.untrack(1);

    assert_eq!(tracker.tracked_count(), 0);
    assert!(!tracker.class_statistics().contains_key("C"));

    // Site statistics describe cumulative pressure and survive the free.
    let sites = tracker.site_statistics();
    assert_eq!(sites["C.f(C.java:10)"].allocation_count, 1);
    assert_eq!(sites["C.f(C.java:10)"].total_size, 100);

    assert_eq!(tracker.total_tracked(), 1);
    assert_eq!(tracker.total_freed(), 1);
    analyzer.stop_analysis();
}

#[test]
fn background_cleanup_evicts_oldest() {
    let tracker = ObjectTracker::spawn(3, 50);
    for id in 1..=4u64 {
        tracker.track(Arc::new(record_at_site(id, "C", 10, 1_000 * id)));
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while tracker.tracked_count() > 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(tracker.tracked_count(), 3);
    assert!(!tracker.is_tracked(1));
    for id in 2..=4u64 {
        assert!(tracker.is_tracked(id));
    }
    tracker.stop_cleanup();
}

#[test]
fn class_counts_sum_to_tracked_count() {
    let tracker = ObjectTracker::spawn(10_000, 60_000);
    let now = now_ms();
    for id in 0..300u64 {
        let class = format!("com.acme.C{}", id % 7);
        tracker.track(Arc::new(record_at_site(id, &class, 8, now)));
    }
    for id in (0..300u64).step_by(3) {
        tracker.untrack(id);
    }

    let total: u64 = tracker
        .class_statistics()
        .values()
        .map(|stats| stats.instance_count)
        .sum();
    assert_eq!(total, tracker.tracked_count());
    tracker.stop_cleanup();
}

#[test]
fn lifetime_identity_under_concurrent_churn() {
    let tracker = ObjectTracker::spawn(100_000, 60_000);
    let threads = 4;
    let per_thread = 2_000u64;

    let mut handles = vec![];
    for worker in 0..threads {
        let tracker = Arc::clone(&tracker);
        handles.push(thread::spawn(move || {
            let base = worker as u64 * per_thread;
            let now = now_ms();
            for i in 0..per_thread {
                let id = base + i;
                tracker.track(Arc::new(record_at_site(id, "com.acme.Churn", 16, now)));
                if i % 2 == 0 {
                    tracker.untrack(id);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let counters = tracker.counters();
    assert_eq!(counters.total_tracked, threads as u64 * per_thread);
    assert!(counters.total_tracked >= counters.tracked_count);
    assert_eq!(
        counters.total_tracked,
        counters.tracked_count + counters.total_freed + counters.evicted_entries
    );
    tracker.stop_cleanup();
}

#[test]
fn randomized_churn_keeps_aggregates_consistent() {
    use rand::Rng;

    let tracker = ObjectTracker::spawn(100_000, 60_000);
    let mut rng = rand::thread_rng();
    let now = now_ms();
    let mut live: Vec<u64> = Vec::new();

    for id in 0..5_000u64 {
        let class = format!("com.acme.R{}", rng.gen_range(0..12));
        let size = rng.gen_range(16..4_096);
        tracker.track(Arc::new(record_at_site(id, &class, size, now)));
        live.push(id);

        if rng.gen_bool(0.4) {
            let victim = live.swap_remove(rng.gen_range(0..live.len()));
            tracker.untrack(victim);
        }
    }

    let classes = tracker.class_statistics();
    let class_total: u64 = classes.values().map(|s| s.instance_count).sum();
    assert_eq!(class_total, tracker.tracked_count());
    assert_eq!(tracker.tracked_count(), live.len() as u64);
    for stats in classes.values() {
        assert_eq!(
            stats.avg_size,
            if stats.instance_count > 0 {
                stats.total_size / stats.instance_count
            } else {
                0
            }
        );
    }
    tracker.stop_cleanup();
}

#[test]
fn eviction_at_exact_capacity_removes_one() {
    let tracker = ObjectTracker::spawn(5, 60_000);
    for id in 1..=5u64 {
        tracker.track(Arc::new(record_at_site(id, "C", 10, 1_000 * id)));
    }
    tracker.enforce_capacity();
    assert_eq!(tracker.tracked_count(), 5);
    assert_eq!(tracker.evicted_entries(), 0);

    tracker.track(Arc::new(record_at_site(6, "C", 10, 6_000)));
    tracker.enforce_capacity();

    assert_eq!(tracker.tracked_count(), 5);
    assert_eq!(tracker.evicted_entries(), 1);
    assert!(!tracker.is_tracked(1));
    assert!(tracker.is_tracked(6));
    tracker.stop_cleanup();
}
