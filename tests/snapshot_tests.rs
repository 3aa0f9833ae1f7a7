//! Snapshot capture, ordering, diffing, and concurrency.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use heapscope::{AllocationRecord, HeapAnalyzer, StackFrame};

fn leaky_record(object_id: u64) -> AllocationRecord {
    AllocationRecord::builder()
        .object_id(object_id)
        .class_name("com.acme.Leaky")
        .size(1_024)
        .frame(StackFrame::new("com.acme.Pool", "acquire", "Pool.java", 31))
        .build()
}

#[test]
fn diff_reports_new_instances_and_allocations() {
    let analyzer = HeapAnalyzer::new();
    analyzer.start_analysis();

    let base = analyzer.take_snapshot();
    for id in 0..50u64 {
        analyzer.record_allocation(leaky_record(id));
    }
    let current = analyzer.take_snapshot();

    let diff = analyzer
        .compare_snapshots(base.snapshot_id(), current.snapshot_id())
        .expect("both snapshots retained");

    assert!(diff.time_delta_ms >= 0);
    let class_diff = &diff.class_diffs["com.acme.Leaky"];
    assert_eq!(class_diff.instance_delta, 50);
    assert_eq!(class_diff.size_delta, 51_200);
    assert_eq!(diff.new_allocations.len(), 50);
    assert_eq!(diff.freed_allocations.len(), 0);

    analyzer.stop_analysis();
}

#[test]
fn diff_sees_freed_allocations() {
    use heapscope::HeapSnapshot;

    let base = HeapSnapshot::builder()
        .allocations((0..10u64).map(|id| Arc::new(leaky_record(id))))
        .build();
    let current = HeapSnapshot::builder()
        .allocations((5..12u64).map(|id| Arc::new(leaky_record(id))))
        .build();

    let diff = base.compare(&current);
    assert_eq!(diff.new_allocations.len(), 2);
    assert_eq!(diff.freed_allocations, vec![0, 1, 2, 3, 4]);
}

#[test]
fn snapshot_ids_are_strictly_monotonic() {
    let analyzer = HeapAnalyzer::new();
    let mut previous = 0u64;
    for _ in 0..10 {
        let snapshot = analyzer.take_snapshot();
        assert!(snapshot.snapshot_id() > previous);
        previous = snapshot.snapshot_id();
    }
}

#[test]
fn ordering_follows_capture_order() {
    let analyzer = HeapAnalyzer::new();
    let older = analyzer.take_snapshot();
    thread::sleep(std::time::Duration::from_millis(5));
    let newer = analyzer.take_snapshot();

    assert!(older.snapshot_id() < newer.snapshot_id());
    let diff = older.compare(&newer);
    assert!(diff.time_delta_ms >= 0);
    assert!(*older < *newer);
}

#[test]
fn concurrent_captures_produce_distinct_ids() {
    let analyzer = HeapAnalyzer::new();
    let threads = 4;
    let per_thread = 20;

    let mut handles = vec![];
    for _ in 0..threads {
        let analyzer = Arc::clone(&analyzer);
        handles.push(thread::spawn(move || {
            (0..per_thread)
                .map(|_| analyzer.take_snapshot().snapshot_id())
                .collect::<Vec<u64>>()
        }));
    }

    let mut all_ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(all_ids.insert(id), "duplicate snapshot id {}", id);
        }
    }
    assert_eq!(all_ids.len(), threads * per_thread);
}

#[test]
fn snapshot_after_clear_is_empty() {
    let analyzer = HeapAnalyzer::new();
    for id in 0..10u64 {
        analyzer.record_allocation(leaky_record(id));
    }
    analyzer.clear();

    let snapshot = analyzer.take_snapshot();
    assert!(snapshot.class_stats().is_empty());
    assert!(snapshot.allocations().is_empty());
    assert_eq!(snapshot.total_heap_used(), 0);
}

#[test]
fn snapshots_serialize_for_the_report_layer() {
    let analyzer = HeapAnalyzer::new();
    analyzer.record_allocation(leaky_record(1));
    let snapshot = analyzer.take_snapshot();

    let json = serde_json::to_string(&*snapshot).expect("snapshot serializes");
    assert!(json.contains("com.acme.Leaky"));
}
