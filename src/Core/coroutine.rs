//! Worker-local stackful coroutines.
//!
//! Each worker owns one [`CoEnv`]. A message handler runs inside a
//! coroutine spawned from the worker's main context; it may park with
//! [`CoEnv::yield_now`] and is resumed later by the same worker. The
//! environment holds `!Send` coroutine handles, so neither it nor its
//! coroutines can leave the worker thread.
//!
//! State machine per coroutine:
//! `Suspended -> Running` on resume, `Running -> Suspended` on yield,
//! `Running -> Ended` on return. An ended coroutine is freed before
//! `resume` returns.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use parking_lot::Mutex;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::Actor::context::Flow;

/// Stack size of a coroutine.
pub const STACK_SIZE: usize = 64 << 10;

/// Slot table capacity on first spawn; doubles when full, never shrinks.
pub const INITIAL_SLOTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoState {
    Suspended,
    Running,
    Ended,
}

/// What `resume` observed when control came back to the main context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    /// The coroutine yielded and keeps its slot.
    Suspended,
    /// The body returned; the slot has been freed.
    Ended(Flow),
    /// The body panicked; the slot has been freed.
    Faulted(String),
}

/// Raw environment pointer handed to a coroutine body on each resume.
#[derive(Clone, Copy)]
struct EnvPtr(*const CoEnv);

type Handle = Coroutine<EnvPtr, (), Flow, DefaultStack>;

struct Slot {
    state: CoState,
    generation: u64,
    // Taken out by `resume` while the coroutine runs.
    handle: Option<Handle>,
    yielder: *const Yielder<EnvPtr, ()>,
}

/// Wake requests coming from other threads.
pub(crate) struct WakeQueue {
    ids: Mutex<Vec<(i32, u64)>>,
    notify: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Handle that asks the owning worker to resume a parked coroutine.
///
/// Waking never runs the coroutine on the calling thread: the id is
/// queued and the owning worker resumes it from its main context.
#[derive(Clone)]
pub struct CoWaker {
    queue: Arc<WakeQueue>,
    id: i32,
    generation: u64,
}

impl CoWaker {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn wake(self) {
        self.wake_by_ref();
    }

    pub fn wake_by_ref(&self) {
        self.queue.ids.lock().push((self.id, self.generation));
        if let Some(notify) = &self.queue.notify {
            notify();
        }
    }
}

/// Per-worker coroutine environment.
pub struct CoEnv {
    slots: RefCell<Vec<Option<Slot>>>,
    live: Cell<usize>,
    running: Cell<i32>,
    next_generation: Cell<u64>,
    stack_size: usize,
    wakeups: Arc<WakeQueue>,
}

impl CoEnv {
    /// Create an environment for the calling thread, which becomes the
    /// main context.
    ///
    /// Boxed: coroutine bodies reach the environment through a pointer, so
    /// it must not move while coroutines are alive.
    pub fn init() -> Box<CoEnv> {
        Self::new(STACK_SIZE, None)
    }

    /// Create an environment with a custom stack size and an optional
    /// callback invoked whenever a [`CoWaker`] fires.
    pub fn new(stack_size: usize, notify: Option<Box<dyn Fn() + Send + Sync>>) -> Box<CoEnv> {
        Box::new(CoEnv {
            slots: RefCell::new(Vec::new()),
            live: Cell::new(0),
            running: Cell::new(-1),
            next_generation: Cell::new(1),
            stack_size,
            wakeups: Arc::new(WakeQueue {
                ids: Mutex::new(Vec::new()),
                notify,
            }),
        })
    }

    /// Destroy the environment and every coroutine still in it.
    pub fn shutdown(self: Box<Self>) {
        drop(self);
    }

    /// Allocate a coroutine around `body` in the `Suspended` state and
    /// return its slot id. Fails only when the stack cannot be allocated.
    pub fn spawn<F>(&self, body: F) -> Result<i32>
    where
        F: FnOnce(&CoEnv) -> Flow + 'static,
    {
        let stack = DefaultStack::new(self.stack_size).map_err(|e| Error::CoroutineSpawn {
            reason: format!("stack of {} bytes: {}", self.stack_size, e),
        })?;
        let index = self.free_index();
        let id = i32::try_from(index).map_err(|_| Error::CoroutineSpawn {
            reason: format!("slot index {} out of range", index),
        })?;

        let handle = Coroutine::with_stack(
            stack,
            move |yielder: &Yielder<EnvPtr, ()>, input: EnvPtr| {
                // Safety: the environment is boxed and outlives its coroutines.
                let env = unsafe { &*input.0 };
                env.bind_yielder(index, yielder);
                body(env)
            },
        );

        let generation = self.next_generation.get();
        self.next_generation.set(generation + 1);
        self.slots.borrow_mut()[index] = Some(Slot {
            state: CoState::Suspended,
            generation,
            handle: Some(handle),
            yielder: std::ptr::null(),
        });
        self.live.set(self.live.get() + 1);
        Ok(id)
    }

    /// Find a free slot, growing the table by doubling when it is full.
    fn free_index(&self) -> usize {
        let mut slots = self.slots.borrow_mut();
        let live = self.live.get();
        if live >= slots.len() {
            let new_cap = if slots.is_empty() {
                INITIAL_SLOTS
            } else {
                slots.len() * 2
            };
            slots.resize_with(new_cap, || None);
        }
        let cap = slots.len();
        (0..cap)
            .map(|i| (i + live) % cap)
            .find(|&i| slots[i].is_none())
            .unwrap_or(cap - 1)
    }

    fn bind_yielder(&self, index: usize, yielder: &Yielder<EnvPtr, ()>) {
        if let Some(Some(slot)) = self.slots.borrow_mut().get_mut(index) {
            slot.yielder = yielder as *const _;
        }
    }

    /// Switch into coroutine `id`. Only valid from the main context and
    /// only for a suspended coroutine; anything else returns `None` and
    /// changes nothing.
    pub fn resume(&self, id: i32) -> Option<Resume> {
        if self.running.get() != -1 {
            return None;
        }
        let index = usize::try_from(id).ok()?;
        let mut handle = {
            let mut slots = self.slots.borrow_mut();
            let slot = slots.get_mut(index)?.as_mut()?;
            if slot.state != CoState::Suspended {
                return None;
            }
            let handle = slot.handle.take()?;
            slot.state = CoState::Running;
            handle
        };

        self.running.set(id);
        let input = EnvPtr(self as *const CoEnv);
        let result = panic::catch_unwind(AssertUnwindSafe(|| handle.resume(input)));
        self.running.set(-1);

        match result {
            Ok(CoroutineResult::Yield(())) => {
                if let Some(Some(slot)) = self.slots.borrow_mut().get_mut(index) {
                    slot.state = CoState::Suspended;
                    slot.handle = Some(handle);
                }
                Some(Resume::Suspended)
            }
            Ok(CoroutineResult::Return(flow)) => {
                self.free(index);
                drop(handle);
                Some(Resume::Ended(flow))
            }
            Err(payload) => {
                self.free(index);
                drop(handle);
                Some(Resume::Faulted(panic_message(payload.as_ref())))
            }
        }
    }

    fn free(&self, index: usize) {
        let mut slots = self.slots.borrow_mut();
        if let Some(entry) = slots.get_mut(index) {
            if entry.take().is_some() {
                self.live.set(self.live.get() - 1);
            }
        }
    }

    /// Destroy a suspended coroutine without resuming it. Its stack is
    /// unwound, so values it holds are dropped. Only valid from the main
    /// context; returns false for anything but a suspended id.
    pub fn cancel(&self, id: i32) -> bool {
        if self.running.get() != -1 {
            return false;
        }
        let Ok(index) = usize::try_from(id) else {
            return false;
        };
        let taken = {
            let mut slots = self.slots.borrow_mut();
            let suspended = matches!(
                slots.get(index),
                Some(Some(slot)) if slot.state == CoState::Suspended
            );
            if suspended {
                slots[index].take()
            } else {
                None
            }
        };
        match taken {
            Some(slot) => {
                self.live.set(self.live.get() - 1);
                // Unwinding runs outside the table borrow.
                drop(slot);
                true
            }
            None => false,
        }
    }

    /// Park the running coroutine and switch back to the main context.
    /// Returns true once resumed; returns false immediately when called
    /// from the main context.
    pub fn yield_now(&self) -> bool {
        let id = self.running.get();
        if id < 0 {
            return false;
        }
        let yielder = {
            let mut slots = self.slots.borrow_mut();
            let Some(Some(slot)) = slots.get_mut(id as usize) else {
                return false;
            };
            if slot.state != CoState::Running || slot.yielder.is_null() {
                return false;
            }
            slot.state = CoState::Suspended;
            slot.yielder
        };
        self.running.set(-1);
        // Safety: the yielder lives on the running coroutine's stack for
        // as long as its body executes, and we are executing that body.
        let yielder = unsafe { &*yielder };
        let _ = yielder.suspend(());
        true
    }

    /// Id of the running coroutine, or -1 when the main context runs.
    pub fn current(&self) -> i32 {
        self.running.get()
    }

    /// State of the coroutine in slot `id`; `None` once it has been freed.
    pub fn state(&self, id: i32) -> Option<CoState> {
        let index = usize::try_from(id).ok()?;
        self.slots
            .borrow()
            .get(index)
            .and_then(|slot| slot.as_ref().map(|s| s.state))
    }

    /// A waker for the running coroutine.
    pub fn waker(&self) -> Option<CoWaker> {
        let id = self.running.get();
        let index = usize::try_from(id).ok()?;
        let generation = self.slots.borrow().get(index)?.as_ref()?.generation;
        Some(CoWaker {
            queue: Arc::clone(&self.wakeups),
            id,
            generation,
        })
    }

    /// Drain pending wake requests, keeping only those that still refer
    /// to the coroutine that handed out the waker.
    pub fn take_woken(&self) -> Vec<i32> {
        let requests = std::mem::take(&mut *self.wakeups.ids.lock());
        let slots = self.slots.borrow();
        requests
            .into_iter()
            .filter(|&(id, generation)| {
                slots
                    .get(id as usize)
                    .and_then(Option::as_ref)
                    .is_some_and(|slot| slot.generation == generation)
            })
            .map(|(id, _)| id)
            .collect()
    }

    pub fn has_woken(&self) -> bool {
        !self.wakeups.ids.lock().is_empty()
    }

    /// Number of live coroutines.
    pub fn live(&self) -> usize {
        self.live.get()
    }

    /// Current slot table capacity.
    pub fn capacity(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

impl std::fmt::Debug for CoEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_co_env(self, f)
    }
}

impl Drop for CoEnv {
    fn drop(&mut self) {
        // Take the table out first: dropping a suspended coroutine unwinds
        // its stack, and that code may look at the environment.
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        drop(slots);
        self.live.set(0);
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
