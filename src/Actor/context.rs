// src/Actor/context.rs
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use super::module::{Module, Service};
use crate::error::{Error, Result};
use crate::Core::coroutine::CoEnv;
use crate::MPMC::inbox::Inbox;
use crate::MPMC::Structs::message::{Address, Message, PTYPE_RESPONSE};
use crate::Runtime::{Runtime, Shared};

/// What a handler asks the dispatcher to do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    /// Destroy the service.
    Exit,
}

/// Message handler of a service.
///
/// Runs on a worker thread, normally inside a fresh coroutine of that
/// worker's `env`, so it may park with `env.yield_now()`.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: &Arc<Context>, env: &CoEnv, msg: Message) -> Flow;
}

impl<F> Handler for F
where
    F: Fn(&Arc<Context>, &CoEnv, Message) -> Flow + Send + Sync + 'static,
{
    fn handle(&self, ctx: &Arc<Context>, env: &CoEnv, msg: Message) -> Flow {
        self(ctx, env, msg)
    }
}

/// How the dispatcher invokes a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// One coroutine per message; the handler may yield.
    #[default]
    Coroutine,
    /// Called directly on the worker's main context; yielding is refused.
    Direct,
}

#[derive(Clone)]
pub(crate) struct Callback {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) mode: DispatchMode,
}

/// A running service: an address, a module instance, a handler and an
/// inbox.
pub struct Context {
    address: Address,
    module: Arc<Module>,
    instance: Box<dyn Service>,
    callback: RwLock<Option<Callback>>,
    inbox: Arc<Inbox>,
    runtime: Weak<Shared>,
    // None for system services that do not keep the runtime alive.
    live: Option<Arc<AtomicUsize>>,
    retired: AtomicBool,
    in_dispatch: AtomicBool,
    endless: AtomicBool,
    message_count: AtomicU64,
    cpu_cost: AtomicU64,
    profile: bool,
    session_id: AtomicI32,
}

impl Context {
    pub(crate) fn new(
        address: Address,
        module: Arc<Module>,
        instance: Box<dyn Service>,
        runtime: Weak<Shared>,
        live: Option<Arc<AtomicUsize>>,
        profile: bool,
    ) -> Arc<Self> {
        if let Some(live) = &live {
            live.fetch_add(1, Ordering::AcqRel);
        }
        Arc::new(Self {
            address,
            module,
            instance,
            callback: RwLock::new(None),
            inbox: Inbox::held(address),
            runtime,
            live,
            retired: AtomicBool::new(false),
            in_dispatch: AtomicBool::new(false),
            endless: AtomicBool::new(false),
            message_count: AtomicU64::new(0),
            cpu_cost: AtomicU64::new(0),
            profile,
            session_id: AtomicI32::new(0),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    pub(crate) fn instance(&self) -> &dyn Service {
        self.instance.as_ref()
    }

    /// Install the message handler. Usually called from `Service::init`.
    pub fn set_handler<H: Handler>(&self, handler: H, mode: DispatchMode) {
        *self.callback.write() = Some(Callback {
            handler: Arc::new(handler),
            mode,
        });
    }

    pub(crate) fn callback(&self) -> Option<Callback> {
        self.callback.read().clone()
    }

    /// The runtime this service lives in, while it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade().map(Runtime::from_shared)
    }

    fn with_runtime<T>(&self, f: impl FnOnce(&Runtime) -> Result<T>) -> Result<T> {
        match self.runtime() {
            Some(rt) => f(&rt),
            None => Err(Error::ServiceNotFound {
                address: self.address,
            }),
        }
    }

    /// Send a message from this service.
    pub fn send(&self, dest: Address, session: i32, ptype: u8, data: Option<Vec<u8>>) -> Result<()> {
        self.with_runtime(|rt| rt.send(self.address, dest, session, ptype, data))
    }

    /// Send a message to a named service.
    pub fn send_name(&self, name: &str, session: i32, ptype: u8, data: Option<Vec<u8>>) -> Result<()> {
        self.with_runtime(|rt| rt.send_name(self.address, name, session, ptype, data))
    }

    /// Answer `request` with a `PTYPE_RESPONSE` carrying `data`.
    pub fn reply(&self, request: &Message, data: Option<Vec<u8>>) -> Result<()> {
        self.send(request.source, request.session, PTYPE_RESPONSE, data)
    }

    /// Bind a name to this service.
    pub fn register_name(&self, name: &str) -> Result<()> {
        self.with_runtime(|rt| rt.name(self.address, name))
    }

    /// Log a line through the runtime's logger service.
    pub fn log(&self, text: impl Into<String>) {
        match self.runtime() {
            Some(rt) => rt.log(self.address, text),
            None => tracing::info!(source = %self.address, "{}", text.into()),
        }
    }

    /// Allocate a session id: positive, wrapping back to 1.
    pub fn new_session(&self) -> i32 {
        loop {
            let current = self.session_id.load(Ordering::Relaxed);
            let next = if current >= i32::MAX || current < 0 {
                1
            } else {
                current + 1
            };
            if self
                .session_id
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
        }
    }

    /// Forward a signal to the module instance.
    pub fn signal(&self, signal: i32) {
        self.instance.signal(signal);
    }

    pub fn in_dispatch(&self) -> bool {
        self.in_dispatch.load(Ordering::Acquire)
    }

    /// Set by the monitor when a handler of this service looked stuck.
    pub fn is_endless(&self) -> bool {
        self.endless.load(Ordering::Acquire)
    }

    pub(crate) fn mark_endless(&self) {
        self.endless.store(true, Ordering::Release);
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Handler time accumulated while profiling is enabled.
    pub fn cpu_cost(&self) -> Duration {
        Duration::from_micros(self.cpu_cost.load(Ordering::Relaxed))
    }

    pub fn is_counted(&self) -> bool {
        self.live.is_some()
    }

    /// Stop counting this service as live. Called when it leaves the
    /// registry, however long parked coroutines keep the context around.
    pub(crate) fn mark_retired(&self) {
        if self.retired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn count_message(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn begin_dispatch(&self) -> Option<Instant> {
        self.in_dispatch.store(true, Ordering::Release);
        self.profile.then(Instant::now)
    }

    pub(crate) fn end_dispatch(&self, started: Option<Instant>) {
        if let Some(started) = started {
            let spent = started.elapsed().as_micros() as u64;
            self.cpu_cost.fetch_add(spent, Ordering::Relaxed);
        }
        self.in_dispatch.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_context(self, f)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.instance.release();
        self.mark_retired();
        tracing::debug!(address = %self.address, module = self.module.name(), "Service released");
    }
}
