use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use super::Buffer::{RingBuffer, Slot};
use crossbeam_utils::CachePadded;

impl<T> RingBuffer<T> {
    /// Create a ring with at least `capacity` slots (rounded up to a power of two).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();

        // Initialize per-slot sequence numbers to k for k in 0..capacity.
        let slots = (0..capacity)
            .map(|k| Slot {
                sequence: AtomicU64::new(k as u64),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            capacity,
            mask: capacity - 1,
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of stored values. Exact when no other thread is
    /// touching the ring.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Acquire);
        let head = self.head.load(Acquire);
        tail.saturating_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue reserves a slot and publishes the value.
    /// Returns the value back if the ring appears full.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        loop {
            let tail = self.tail.load(Relaxed);
            let slot = &self.slots[(tail as usize) & self.mask];
            let seq = slot.sequence.load(Acquire);
            let dif = seq as i64 - tail as i64;

            if dif == 0 {
                if self
                    .tail
                    .compare_exchange_weak(tail, tail + 1, AcqRel, Relaxed)
                    .is_ok()
                {
                    // We own this slot now
                    unsafe {
                        (*slot.value.get()).write(value);
                    }
                    // Publish
                    slot.sequence.store(tail + 1, Release);
                    return Ok(());
                }
                continue;
            } else if dif < 0 {
                // full
                return Err(value);
            } else {
                // someone else is producing; backoff and retry
                std::hint::spin_loop();
                continue;
            }
        }
    }

    /// Dequeue acquires a ready slot and moves its value out.
    /// Returns None if the ring appears empty.
    pub fn dequeue(&self) -> Option<T> {
        loop {
            let head = self.head.load(Relaxed);
            let slot = &self.slots[(head as usize) & self.mask];
            let seq = slot.sequence.load(Acquire);
            let dif = seq as i64 - (head as i64 + 1);

            if dif == 0 {
                if self
                    .head
                    .compare_exchange_weak(head, head + 1, AcqRel, Relaxed)
                    .is_ok()
                {
                    let value = unsafe { (*slot.value.get()).assume_init_read() };

                    // free slot for future producers
                    slot.sequence
                        .store(head + self.capacity as u64, Release);
                    return Some(value);
                }
                continue;
            } else if dif < 0 {
                // empty
                return None;
            } else {
                // producer not finished; retry
                std::hint::spin_loop();
                continue;
            }
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Release whatever is still queued.
        while self.dequeue().is_some() {}
    }
}
