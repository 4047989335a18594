//! Collaborators driven by the runtime's background threads.
//!
//! The runtime owns no timer wheel and no socket layer. It ticks a
//! [`Timer`] from the timer thread and polls a [`Poller`] from the socket
//! thread; the defaults here keep time and block until quit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::Runtime;

pub trait Timer: Send + Sync {
    /// Advance time. Called once per tick from the timer thread.
    fn update_time(&self);

    /// Current time in centiseconds since start.
    fn now(&self) -> u64;
}

pub struct SystemTimer {
    start: Instant,
    current: AtomicU64,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            current: AtomicU64::new(0),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn update_time(&self) {
        let cs = (self.start.elapsed().as_millis() / 10) as u64;
        self.current.fetch_max(cs, Ordering::AcqRel);
    }

    fn now(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Stop the socket thread.
    Exit,
    /// Nothing happened.
    Idle,
    /// Messages were produced; wake a worker.
    Ready,
}

pub trait Poller: Send + Sync {
    fn poll(&self, runtime: &Runtime) -> PollResult;
}

/// Poller with no sources: waits for quit in `interval` steps.
pub struct IdlePoller {
    interval: Duration,
}

impl IdlePoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for IdlePoller {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl Poller for IdlePoller {
    fn poll(&self, runtime: &Runtime) -> PollResult {
        if runtime.wait_quit(self.interval) {
            PollResult::Exit
        } else {
            PollResult::Idle
        }
    }
}
