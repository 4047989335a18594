// In src/Runtime/supervisor.rs
//! Background threads: one monitor, one timer, one socket poller and
//! `config.thread` workers, all joined before `start` returns.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::collab::PollResult;
use super::dispatcher::Worker;
use super::Runtime;
use crate::error::{Error, Result};
use crate::Core::monitor::Monitor;
use crate::Core::signal;

/// Batch weight per worker index: the first four take one message per
/// visit, the rest take `len >> weight` rounded up.
pub const WEIGHT: [i32; 32] = [
    -1, -1, -1, -1, 0, 0, 0, 0, //
    1, 1, 1, 1, 1, 1, 1, 1, //
    2, 2, 2, 2, 2, 2, 2, 2, //
    3, 3, 3, 3, 3, 3, 3, 3,
];

pub fn worker_weight(index: usize) -> i32 {
    WEIGHT.get(index).copied().unwrap_or(0)
}

/// Worker sleep/wake coordination.
pub struct Cond {
    count: usize,
    sleeping: Mutex<usize>,
    quit: AtomicBool,
    cv: Condvar,
    // Background threads that only wait for quit.
    quit_cv: Condvar,
}

impl Cond {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            sleeping: Mutex::new(0),
            quit: AtomicBool::new(false),
            cv: Condvar::new(),
            quit_cv: Condvar::new(),
        }
    }

    /// Wake one sleeping worker when at least `count - busy` are asleep.
    pub fn wakeup(&self, busy: usize) {
        let sleeping = self.sleeping.lock();
        if *sleeping >= self.count.saturating_sub(busy) && *sleeping > 0 {
            self.cv.notify_one();
        }
    }

    /// Wake every sleeping worker.
    pub fn wake_all(&self) {
        let _sleeping = self.sleeping.lock();
        self.cv.notify_all();
    }

    /// Sleep until woken unless quit is set or `pending()` holds.
    pub fn sleep(&self, pending: impl FnOnce() -> bool) {
        let mut sleeping = self.sleeping.lock();
        if self.is_quit() || pending() {
            return;
        }
        *sleeping += 1;
        self.cv.wait(&mut sleeping);
        *sleeping -= 1;
    }

    pub fn quit(&self) {
        let _sleeping = self.sleeping.lock();
        self.quit.store(true, Ordering::Release);
        self.cv.notify_all();
        self.quit_cv.notify_all();
    }

    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Block up to `timeout`; true once quit is set.
    pub fn wait_quit(&self, timeout: Duration) -> bool {
        let mut sleeping = self.sleeping.lock();
        if !self.is_quit() {
            let _ = self.quit_cv.wait_for(&mut sleeping, timeout);
        }
        self.is_quit()
    }

    pub fn sleeping(&self) -> usize {
        *self.sleeping.lock()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

fn spawn<F>(role: String, handles: &mut Vec<JoinHandle<()>>, body: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(role.clone())
        .spawn(body)
        .map_err(|source| Error::ThreadSpawn { role, source })?;
    handles.push(handle);
    Ok(())
}

/// Run every background thread and block until all of them exit.
pub(crate) fn start(runtime: &Runtime) -> Result<()> {
    let shared = runtime.shared();
    let count = shared.config.thread;
    let monitors: Vec<Arc<Monitor>> = (0..count).map(|_| Arc::new(Monitor::new())).collect();
    let mut handles = Vec::with_capacity(count + 3);

    let spawned = (|| -> Result<()> {
        let rt = runtime.clone();
        let watched = monitors.clone();
        spawn("dmxp-monitor".into(), &mut handles, move || thread_monitor(rt, watched))?;

        let rt = runtime.clone();
        spawn("dmxp-timer".into(), &mut handles, move || thread_timer(rt))?;

        let rt = runtime.clone();
        spawn("dmxp-socket".into(), &mut handles, move || thread_socket(rt))?;

        for (id, monitor) in monitors.iter().enumerate() {
            let rt = runtime.clone();
            let monitor = Arc::clone(monitor);
            let weight = worker_weight(id);
            spawn(format!("dmxp-worker-{id}"), &mut handles, move || {
                Worker::with_monitor(&rt, id, weight, monitor).run()
            })?;
        }
        Ok(())
    })();

    if let Err(err) = &spawned {
        tracing::error!(error = %err, "Thread start failed, aborting");
        runtime.abort();
        shared.cond.quit();
    }

    for handle in handles {
        let role = handle.thread().name().unwrap_or("?").to_owned();
        if handle.join().is_err() {
            tracing::error!(thread = %role, "Thread panicked");
        }
    }
    spawned
}

fn thread_monitor(rt: Runtime, monitors: Vec<Arc<Monitor>>) {
    let shared = rt.shared();
    let step = shared.config.monitor_interval / 5;
    'scan: loop {
        if shared.total() == 0 || shared.cond.is_quit() {
            break;
        }
        for (worker, monitor) in monitors.iter().enumerate() {
            if let Some(report) = monitor.check() {
                tracing::warn!(
                    worker,
                    source = %report.source,
                    destination = %report.destination,
                    version = report.version,
                    "A message from {} to {} maybe stuck in an endless loop",
                    report.source,
                    report.destination
                );
                if let Some(ctx) = shared.registry.grab(report.destination) {
                    ctx.mark_endless();
                }
            }
        }
        for _ in 0..5 {
            if shared.total() == 0 || shared.cond.wait_quit(step) {
                break 'scan;
            }
        }
    }
    tracing::debug!("Monitor thread exit");
}

fn thread_timer(rt: Runtime) {
    let shared = rt.shared();
    loop {
        shared.timer.update_time();
        if shared.total() == 0 || shared.cond.is_quit() {
            break;
        }
        shared.cond.wakeup(shared.cond.count().saturating_sub(1));
        thread::sleep(shared.config.timer_tick);
        if signal::take_hup() {
            rt.signal_hup();
        }
    }
    // Wake everyone blocked on the condvar.
    shared.cond.quit();
    tracing::debug!("Timer thread exit");
}

fn thread_socket(rt: Runtime) {
    let shared = rt.shared();
    loop {
        if shared.cond.is_quit() {
            break;
        }
        match shared.poller.poll(&rt) {
            PollResult::Exit => break,
            PollResult::Idle => {
                if shared.total() == 0 {
                    break;
                }
            }
            PollResult::Ready => shared.cond.wakeup(0),
        }
    }
    tracing::debug!("Socket thread exit");
}
