// Per-service FIFO inbox.

use super::global::GlobalQueue;
use crate::MPMC::Structs::message::{Address, Message};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Queue length at which the first overload warning is raised. The
/// threshold doubles every time it is crossed.
pub const OVERLOAD_THRESHOLD: usize = 1024;

/// A service inbox.
///
/// The inbox is on the global ring iff it has pending messages and no
/// worker is draining it. `in_global` covers both cases ("queued or being
/// drained"), so a push only enqueues the inbox when nobody else owns it.
pub struct Inbox {
    address: Address,
    pub(crate) state: Mutex<InboxState>,
}

pub(crate) struct InboxState {
    pub(crate) queue: VecDeque<Message>,
    pub(crate) in_global: bool,
    pub(crate) release: bool,
    overload: usize,
    overload_threshold: usize,
}

impl Inbox {
    /// An empty inbox, not yet on the global ring.
    pub fn new(address: Address) -> Arc<Self> {
        Self::build(address, false)
    }

    /// An empty inbox that is held by its creator: pushes queue messages
    /// but do not publish it until the creator hands it to the ring.
    pub fn held(address: Address) -> Arc<Self> {
        Self::build(address, true)
    }

    fn build(address: Address, in_global: bool) -> Arc<Self> {
        Arc::new(Self {
            address,
            state: Mutex::new(InboxState {
                queue: VecDeque::new(),
                in_global,
                release: false,
                overload: 0,
                overload_threshold: OVERLOAD_THRESHOLD,
            }),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Enqueue a message. If the inbox was idle it is published on the
    /// global ring. Returns false (and drops the message) when the inbox
    /// has been released.
    pub fn push(self: &Arc<Self>, msg: Message, global: &GlobalQueue) -> bool {
        let mut state = self.state.lock();
        if state.release {
            drop(state);
            drop(msg);
            return false;
        }
        state.queue.push_back(msg);
        if state.queue.len() > state.overload_threshold {
            state.overload = state.queue.len();
            state.overload_threshold *= 2;
        }
        if !state.in_global {
            state.in_global = true;
            global.push(Arc::clone(self));
        }
        true
    }

    /// Take the head message. Leaves `in_global` alone.
    pub fn pop(&self) -> Option<Message> {
        let mut state = self.state.lock();
        let msg = state.queue.pop_front();
        if state.queue.is_empty() {
            state.overload_threshold = OVERLOAD_THRESHOLD;
        }
        msg
    }

    /// End a drain visit. Returns true when messages remain and the
    /// caller must put the inbox back on the ring; otherwise `in_global`
    /// is cleared under the lock so the next push republishes it.
    ///
    /// A released inbox is emptied here and never requeued.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock();
        if state.release {
            let residue = std::mem::take(&mut state.queue);
            drop(state);
            drop(residue);
            return false;
        }
        if state.queue.is_empty() {
            state.in_global = false;
            false
        } else {
            true
        }
    }

    /// Mark the inbox released. If it is idle it is pushed to the ring so
    /// a worker comes by and discards the residue.
    pub fn mark_release(self: &Arc<Self>, global: &GlobalQueue) {
        let mut state = self.state.lock();
        if state.release {
            return;
        }
        state.release = true;
        if !state.in_global {
            state.in_global = true;
            global.push(Arc::clone(self));
        }
    }

    /// Release the inbox and free every pending message. Returns how many
    /// were dropped.
    pub fn release_and_drain(&self) -> usize {
        let residue = {
            let mut state = self.state.lock();
            state.release = true;
            std::mem::take(&mut state.queue)
        };
        residue.len()
    }

    /// Queue length that triggered an overload warning since the last call.
    pub fn overload(&self) -> Option<usize> {
        let mut state = self.state.lock();
        match state.overload {
            0 => None,
            n => {
                state.overload = 0;
                Some(n)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().release
    }

    pub fn in_global(&self) -> bool {
        self.state.lock().in_global
    }
}
