//! Capture queue
//!
//! Single-producer/single-consumer bounded ring buffer bridging the sampler
//! context and the consumer loop. Indices are monotonically increasing and
//! published with acquire/release ordering; slots are atomic, so no lock is
//! taken on either side and a `push` never blocks or allocates.
//!
//! Overflow policy: overwrite-oldest. When the ring is full the producer
//! advances the read index past the oldest slot before writing — recency
//! matters more than completeness for live tracking. Because of that, the
//! read index is advanced by compare-and-swap from both sides; a `pop` racing
//! an overwriting `push` may observe the overwriting value, but every value
//! returned is one that was pushed, in arrival order.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

struct Shared {
    slots: Box<[AtomicU16]>,
    /// Next write index, written only by the producer
    head: AtomicU64,
    /// Next read index, CAS-advanced by the consumer (and by the producer on
    /// overflow)
    tail: AtomicU64,
}

impl Shared {
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }
}

/// Create a queue of the given capacity, split into its two endpoints.
///
/// Panics if `capacity` is zero.
pub fn sample_queue(capacity: usize) -> (SampleProducer, SampleConsumer) {
    assert!(capacity > 0, "queue capacity must be non-zero");
    let slots = (0..capacity).map(|_| AtomicU16::new(0)).collect();
    let shared = Arc::new(Shared {
        slots,
        head: AtomicU64::new(0),
        tail: AtomicU64::new(0),
    });
    (
        SampleProducer {
            shared: Arc::clone(&shared),
        },
        SampleConsumer { shared },
    )
}

/// Producer endpoint; owned by the capture context.
pub struct SampleProducer {
    shared: Arc<Shared>,
}

impl SampleProducer {
    /// Push one sample, overwriting the oldest queued sample when full.
    pub fn push(&self, value: u16) {
        let shared = &self.shared;
        let head = shared.head.load(Ordering::Acquire);
        loop {
            let tail = shared.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) < shared.capacity() {
                break;
            }
            // Full: reclaim the oldest slot. If the CAS loses to a concurrent
            // pop, space has opened either way.
            let _ = shared.tail.compare_exchange(
                tail,
                tail + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        let slot = (head % shared.capacity()) as usize;
        shared.slots[slot].store(value, Ordering::Relaxed);
        shared.head.store(head + 1, Ordering::Release);
    }
}

/// Consumer endpoint; owned by the processing loop.
pub struct SampleConsumer {
    shared: Arc<Shared>,
}

impl SampleConsumer {
    /// Whether at least one sample is queued.
    pub fn has_data(&self) -> bool {
        !self.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued samples.
    pub fn len(&self) -> usize {
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    /// Pop the oldest queued sample; `None` when empty. Never blocks.
    pub fn pop(&self) -> Option<u16> {
        let shared = &self.shared;
        loop {
            let tail = shared.tail.load(Ordering::Acquire);
            let head = shared.head.load(Ordering::Acquire);
            if tail == head {
                return None;
            }
            let slot = (tail % shared.capacity()) as usize;
            let value = shared.slots[slot].load(Ordering::Relaxed);
            if shared
                .tail
                .compare_exchange_weak(tail, tail + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(value);
            }
        }
    }
}
