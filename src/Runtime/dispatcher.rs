// In src/Runtime/dispatcher.rs
//! Worker loop: pull an inbox from the global ring, run a weighted batch
//! of its messages, hand the inbox back.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::Runtime;
use crate::Actor::context::{Context, DispatchMode, Flow};
use crate::Core::coroutine::{panic_message, CoEnv, Resume};
use crate::Core::monitor::Monitor;
use crate::MPMC::inbox::Inbox;
use crate::MPMC::Structs::message::{Address, Message};

/// Messages to take from an inbox holding `len` messages.
///
/// Weight -1 takes one; weight `w >= 0` takes `len / 2^w` rounded up.
pub fn batch_size(len: usize, weight: i32) -> usize {
    if weight < 0 {
        1
    } else {
        let step = 1usize << weight.min(31);
        (len + step - 1) >> weight.min(31)
    }
}

pub struct Worker {
    id: usize,
    weight: i32,
    runtime: Runtime,
    monitor: Arc<Monitor>,
    env: Box<CoEnv>,
    // Coroutines suspended mid-handler, with the service they belong to.
    parked: HashMap<i32, Arc<Context>>,
}

impl Worker {
    /// A worker on the calling thread, outside the supervisor.
    pub fn new(runtime: &Runtime, weight: i32) -> Self {
        Self::with_monitor(runtime, 0, weight, Arc::new(Monitor::new()))
    }

    pub(crate) fn with_monitor(runtime: &Runtime, id: usize, weight: i32, monitor: Arc<Monitor>) -> Self {
        let cond = Arc::clone(&runtime.shared().cond);
        let env = CoEnv::new(
            runtime.config().coroutine_stack_size,
            Some(Box::new(move || cond.wake_all())),
        );
        Self {
            id,
            weight,
            runtime: runtime.clone(),
            monitor,
            env,
            parked: HashMap::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn env(&self) -> &CoEnv {
        &self.env
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Number of coroutines parked on this worker.
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    /// Process one batch from `last`, or from the next inbox on the ring.
    ///
    /// Returns the inbox to work on next. It is never on the ring at the
    /// same time. `None` means the ring was empty or the inbox belonged to
    /// a retired service.
    pub fn dispatch(&mut self, last: Option<Arc<Inbox>>) -> Option<Arc<Inbox>> {
        let inbox = match last {
            Some(inbox) => inbox,
            None => self.runtime.shared().global.pop()?,
        };
        let address = inbox.address();

        let Some(ctx) = self.runtime.shared().registry.grab(address) else {
            let dropped = inbox.release_and_drain();
            tracing::debug!(address = %address, dropped, "Drop inbox of retired service");
            return None;
        };

        let n = batch_size(inbox.len(), self.weight);
        for _ in 0..n {
            if inbox.is_released() {
                break;
            }
            let Some(msg) = inbox.pop() else {
                break;
            };
            if let Some(len) = inbox.overload() {
                tracing::warn!(address = %address, len, "May overload, message queue length = {}", len);
            }
            ctx.count_message();
            self.monitor.trigger(msg.source, address);
            self.deliver(&ctx, msg);
            self.monitor.trigger(Address::NONE, Address::NONE);
        }
        drop(ctx);

        let global = &self.runtime.shared().global;
        if inbox.finish() {
            match global.pop() {
                Some(next) => {
                    global.push(inbox);
                    Some(next)
                }
                None => Some(inbox),
            }
        } else {
            global.pop()
        }
    }

    fn deliver(&mut self, ctx: &Arc<Context>, msg: Message) {
        let Some(callback) = ctx.callback() else {
            tracing::trace!(address = %ctx.address(), "No handler, message dropped");
            return;
        };

        let started = ctx.begin_dispatch();
        match callback.mode {
            DispatchMode::Direct => {
                let handler = callback.handler;
                let env: &CoEnv = &self.env;
                let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(ctx, env, msg)));
                ctx.end_dispatch(started);
                match result {
                    Ok(flow) => self.settle(ctx, flow),
                    Err(payload) => fault(ctx, &panic_message(payload.as_ref())),
                }
            }
            DispatchMode::Coroutine => {
                let handler = callback.handler;
                let owner = Arc::clone(ctx);
                match self.env.spawn(move |env| handler.handle(&owner, env, msg)) {
                    Ok(id) => {
                        let result = self.env.resume(id);
                        ctx.end_dispatch(started);
                        self.after_resume(id, ctx, result);
                    }
                    Err(err) => {
                        ctx.end_dispatch(started);
                        tracing::error!(address = %ctx.address(), error = %err, "Message dropped");
                    }
                }
            }
        }
    }

    fn after_resume(&mut self, id: i32, ctx: &Arc<Context>, result: Option<Resume>) {
        match result {
            Some(Resume::Suspended) => {
                self.parked.insert(id, Arc::clone(ctx));
            }
            Some(Resume::Ended(flow)) => {
                self.parked.remove(&id);
                self.settle(ctx, flow);
            }
            Some(Resume::Faulted(reason)) => {
                self.parked.remove(&id);
                fault(ctx, &reason);
            }
            None => {}
        }
    }

    fn settle(&self, ctx: &Context, flow: Flow) {
        if flow == Flow::Exit {
            let _ = self.runtime.kill(ctx.address());
        }
    }

    /// Destroy parked coroutines whose service has been retired. Returns
    /// how many were dropped.
    pub fn reap(&mut self) -> usize {
        if self.parked.is_empty() {
            return 0;
        }
        let orphans: Vec<i32> = self
            .parked
            .iter()
            .filter(|(_, ctx)| ctx.is_retired())
            .map(|(id, _)| *id)
            .collect();
        for id in &orphans {
            if let Some(ctx) = self.parked.remove(id) {
                tracing::debug!(address = %ctx.address(), coroutine = id, "Dropping parked coroutine of retired service");
            }
            self.env.cancel(*id);
        }
        orphans.len()
    }

    /// Resume every parked coroutine whose waker fired. Returns how many
    /// were resumed.
    pub fn resume_woken(&mut self) -> usize {
        let mut resumed = 0;
        for id in self.env.take_woken() {
            let Some(ctx) = self.parked.get(&id).cloned() else {
                continue;
            };
            if ctx.is_retired() {
                self.parked.remove(&id);
                self.env.cancel(id);
                continue;
            }
            let started = ctx.begin_dispatch();
            self.monitor.trigger(ctx.address(), ctx.address());
            let result = self.env.resume(id);
            self.monitor.trigger(Address::NONE, Address::NONE);
            ctx.end_dispatch(started);
            self.after_resume(id, &ctx, result);
            resumed += 1;
        }
        resumed
    }

    /// Run until the runtime quits.
    pub fn run(mut self) {
        tracing::debug!(worker = self.id, weight = self.weight, "Worker started");
        let cond = Arc::clone(&self.runtime.shared().cond);
        let mut inbox = None;
        while !cond.is_quit() {
            self.reap();
            self.resume_woken();
            inbox = self.dispatch(inbox);
            if inbox.is_none() && self.runtime.shared().global.is_empty() {
                let env: &CoEnv = &self.env;
                cond.sleep(|| env.has_woken());
            }
        }
        if !self.parked.is_empty() {
            tracing::debug!(worker = self.id, parked = self.parked.len(), "Dropping parked coroutines");
        }
        self.parked.clear();
        tracing::debug!(worker = self.id, "Worker exit");
    }
}

fn fault(ctx: &Context, reason: &str) {
    tracing::error!(
        address = %ctx.address(),
        module = ctx.module_name(),
        reason,
        "Handler panicked, message dropped"
    );
}
