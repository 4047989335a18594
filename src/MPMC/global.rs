use super::inbox::Inbox;
use crate::MPMC::Buffer::RingBuffer;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of lock-free slots in the global ring.
pub const GLOBAL_RING_CAPACITY: usize = 4096;

/// The global ring of inboxes that have pending messages.
///
/// Unbounded: the lock-free ring takes the common case and a locked
/// overflow lane takes whatever does not fit. Cross-inbox order is not
/// part of the contract, so the two lanes need no coordination.
///
/// Callers guarantee an inbox is pushed at most once at a time; the
/// `in_global` flag on [`Inbox`] is what enforces it.
pub struct GlobalQueue {
    ring: RingBuffer<Arc<Inbox>>,
    overflow: Mutex<VecDeque<Arc<Inbox>>>,
    overflow_len: AtomicUsize,
}

impl Default for GlobalQueue {
    fn default() -> Self {
        Self::with_capacity(GLOBAL_RING_CAPACITY)
    }
}

impl GlobalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::with_capacity(capacity),
            overflow: Mutex::new(VecDeque::new()),
            overflow_len: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, inbox: Arc<Inbox>) {
        if let Err(inbox) = self.ring.enqueue(inbox) {
            let mut overflow = self.overflow.lock();
            overflow.push_back(inbox);
            self.overflow_len.store(overflow.len(), Ordering::Release);
        }
    }

    pub fn pop(&self) -> Option<Arc<Inbox>> {
        if let Some(inbox) = self.ring.dequeue() {
            return Some(inbox);
        }
        if self.overflow_len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut overflow = self.overflow.lock();
        let inbox = overflow.pop_front();
        self.overflow_len.store(overflow.len(), Ordering::Release);
        inbox
    }

    /// Approximate number of queued inboxes.
    pub fn len(&self) -> usize {
        self.ring.len() + self.overflow_len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
