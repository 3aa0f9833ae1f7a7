//! Bounded single-producer/single-consumer event queue.
//!
//! A Lamport ring: the producer publishes with a release store of the tail,
//! the consumer reads with an acquire load, and slot indices wrap with a
//! bitmask (capacity is rounded up to a power of two). Neither side ever
//! blocks or allocates; when the ring is full the producer drops the event
//! and counts it. The two halves are handed out as non-clonable endpoints,
//! which is what makes the single-producer/single-consumer discipline hold.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use crate::event::ProfilerEvent;

/// Default slot count of the agent event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 65_536;

struct Ring {
    slots: Box<[UnsafeCell<MaybeUninit<ProfilerEvent>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    dropped: AtomicU64,
    closed: AtomicBool,
}

// Slots are only touched from the producer (writes at tail) and the consumer
// (reads at head), and publication is ordered by the release/acquire pair on
// `tail`.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Drop for Ring {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        for position in head..tail {
            let slot = &self.slots[position & self.mask];
            unsafe { (*slot.get()).assume_init_drop() };
        }
    }
}

/// Create a connected producer/consumer pair over a ring of at least
/// `capacity` slots.
pub fn event_channel(capacity: usize) -> (EventProducer, EventConsumer) {
    let capacity = capacity.max(2).next_power_of_two();
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let ring = Arc::new(Ring {
        slots,
        mask: capacity - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });
    (
        EventProducer { ring: ring.clone() },
        EventConsumer { ring },
    )
}

/// The agent-side half. Exactly one producer exists per queue; `push` takes
/// `&mut self` so the discipline is enforced by ownership.
pub struct EventProducer {
    ring: Arc<Ring>,
}

impl EventProducer {
    /// Publish one event. Returns `false` when the ring is full; the event
    /// is dropped and counted, never blocked on.
    pub fn push(&mut self, event: ProfilerEvent) -> bool {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == self.ring.slots.len() {
            self.ring.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let slot = &self.ring.slots[tail & self.ring.mask];
        unsafe { (*slot.get()).write(event) };
        self.ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Signal end-of-stream. The consumer drains whatever is still queued.
    pub fn close(&mut self) {
        self.ring.closed.store(true, Ordering::Release);
    }

    pub fn dropped_events(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        queue_len(&self.ring)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.slots.len()
    }
}

impl Drop for EventProducer {
    fn drop(&mut self) {
        self.close();
    }
}

/// The analyzer-side half.
pub struct EventConsumer {
    ring: Arc<Ring>,
}

impl EventConsumer {
    pub fn pop(&mut self) -> Option<ProfilerEvent> {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.ring.slots[head & self.ring.mask];
        let event = unsafe { (*slot.get()).assume_init_read() };
        self.ring.head.store(head.wrapping_add(1), Ordering::Release);
        Some(event)
    }

    /// True once the producer signalled end-of-stream. Queued events may
    /// still remain; drain with `pop` until it returns `None`.
    pub fn is_closed(&self) -> bool {
        self.ring.closed.load(Ordering::Acquire)
    }

    pub fn dropped_events(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        queue_len(&self.ring)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Approximate occupancy; exact only when neither side is mid-operation.
fn queue_len(ring: &Ring) -> usize {
    let tail = ring.tail.load(Ordering::Relaxed);
    let head = ring.head.load(Ordering::Relaxed);
    tail.wrapping_sub(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn gc_event(timestamp_ms: u64) -> ProfilerEvent {
        ProfilerEvent::GcStart { timestamp_ms }
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let (producer, _consumer) = event_channel(1_000);
        assert_eq!(producer.capacity(), 1_024);
    }

    #[test]
    fn fifo_within_single_producer() {
        let (mut producer, mut consumer) = event_channel(8);
        for timestamp in 1..=5u64 {
            assert!(producer.push(gc_event(timestamp)));
        }
        for timestamp in 1..=5u64 {
            assert_eq!(consumer.pop(), Some(gc_event(timestamp)));
        }
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn full_ring_drops_newest_and_counts() {
        let (mut producer, mut consumer) = event_channel(4);
        for timestamp in 0..4u64 {
            assert!(producer.push(gc_event(timestamp)));
        }
        assert!(!producer.push(gc_event(99)));
        assert_eq!(producer.dropped_events(), 1);

        // The oldest four survive untouched.
        assert_eq!(consumer.pop(), Some(gc_event(0)));
        assert_eq!(consumer.len(), 3);
    }

    #[test]
    fn close_is_visible_after_drain() {
        let (mut producer, mut consumer) = event_channel(4);
        producer.push(gc_event(1));
        producer.close();
        assert!(consumer.is_closed());
        assert_eq!(consumer.pop(), Some(gc_event(1)));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn producer_drop_closes_stream() {
        let (producer, consumer) = event_channel(4);
        drop(producer);
        assert!(consumer.is_closed());
    }

    #[test]
    fn cross_thread_transfer_preserves_order() {
        let (mut producer, mut consumer) = event_channel(64);
        let total = 10_000u64;

        let sender = thread::spawn(move || {
            let mut sent = 0;
            while sent < total {
                if producer.push(gc_event(sent)) {
                    sent += 1;
                }
            }
        });

        let mut expected = 0u64;
        while expected < total {
            if let Some(ProfilerEvent::GcStart { timestamp_ms }) = consumer.pop() {
                assert_eq!(timestamp_ms, expected);
                expected += 1;
            }
        }
        sender.join().unwrap();
    }
}
