// src/Runtime/mod.rs
//! The runtime: module table, service registry, global ring and the
//! threads that drive them.

pub mod collab;
pub mod config;
pub mod dispatcher;
pub mod supervisor;

pub use collab::{IdlePoller, PollResult, Poller, SystemTimer, Timer};
pub use config::Config;
pub use dispatcher::{batch_size, Worker};
pub use supervisor::{worker_weight, Cond, WEIGHT};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::Actor::context::Context;
use crate::Actor::logger::{Logger, LOGGER_NAME};
use crate::Actor::module::{Module, ModuleLoader, Modules};
use crate::Actor::registry::Registry;
use crate::Core::{daemon, signal};
use crate::MPMC::global::GlobalQueue;
use crate::MPMC::Structs::message::{Address, Message, PTYPE_SYSTEM, PTYPE_TEXT};

/// Pluggable parts of a runtime.
pub struct Collaborators {
    pub timer: Arc<dyn Timer>,
    pub poller: Arc<dyn Poller>,
    pub loader: Option<Box<dyn ModuleLoader>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            timer: Arc::new(SystemTimer::new()),
            poller: Arc::new(IdlePoller::default()),
            loader: None,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) registry: Registry,
    pub(crate) modules: Modules,
    pub(crate) global: GlobalQueue,
    pub(crate) live: Arc<AtomicUsize>,
    pub(crate) cond: Arc<Cond>,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) poller: Arc<dyn Poller>,
    /// Address of the configured log service once booted.
    logger: AtomicU32,
    started: AtomicBool,
}

impl Shared {
    pub(crate) fn total(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Handle to a runtime. Cheap to clone and shareable across threads.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: Config, parts: Collaborators) -> Result<Self> {
        config.validate()?;
        let mut modules = Modules::new(&config.module_path)?;
        if let Some(loader) = parts.loader {
            modules.set_loader(loader);
        }
        modules.insert(Logger::module())?;

        Ok(Self {
            shared: Arc::new(Shared {
                registry: Registry::new(config.harbor as u8),
                modules,
                global: GlobalQueue::new(),
                live: Arc::new(AtomicUsize::new(0)),
                cond: Arc::new(Cond::new(config.thread)),
                timer: parts.timer,
                poller: parts.poller,
                logger: AtomicU32::new(Address::NONE.0),
                started: AtomicBool::new(false),
                config,
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn timer(&self) -> &dyn Timer {
        self.shared.timer.as_ref()
    }

    /// Add a compiled-in module.
    pub fn register_module(&self, module: Module) -> Result<()> {
        self.shared.modules.insert(module).map(|_| ())
    }

    /// Create a service of `module` and run its `init` with `params`.
    ///
    /// The service receives messages only once `init` succeeded; anything
    /// sent to it meanwhile is queued.
    pub fn launch(&self, module: &str, params: &str) -> Result<Address> {
        self.spawn_service(module, params, true)
    }

    fn spawn_service(&self, name: &str, params: &str, counted: bool) -> Result<Address> {
        let shared = &self.shared;
        let module = shared.modules.query(name)?;
        let instance = module.create();
        let live = counted.then(|| Arc::clone(&shared.live));
        let weak = Arc::downgrade(&self.shared);
        let profile = shared.config.profile;
        let ctx = shared.registry.register_with(|address| {
            Context::new(address, Arc::clone(&module), instance, weak, live, profile)
        })?;
        let address = ctx.address();

        match ctx.instance().init(&ctx, params) {
            Ok(()) => {
                shared.global.push(Arc::clone(ctx.inbox()));
                tracing::info!(address = %address, module = name, params, "Service launched");
                Ok(address)
            }
            Err(err) => {
                tracing::error!(module = name, params, error = %err, "Service init failed");
                shared.registry.retire(address);
                ctx.inbox().release_and_drain();
                Err(Error::ServiceInitFailed {
                    module: name.to_owned(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Retire a service. Its inbox is drained and the instance released
    /// once no worker holds it.
    pub fn kill(&self, address: Address) -> Result<()> {
        match self.shared.registry.retire(address) {
            Some(ctx) => {
                ctx.inbox().mark_release(&self.shared.global);
                tracing::debug!(address = %address, module = ctx.module_name(), "Service killed");
                Ok(())
            }
            None => Err(Error::ServiceNotFound { address }),
        }
    }

    /// Retire every service; a started runtime then shuts down.
    pub fn abort(&self) -> usize {
        let retired = self.shared.registry.retire_all();
        for ctx in &retired {
            ctx.inbox().release_and_drain();
        }
        let count = retired.len();
        drop(retired);
        tracing::info!(count, "Runtime aborted");
        count
    }

    pub fn send(
        &self,
        source: Address,
        dest: Address,
        session: i32,
        ptype: u8,
        data: Option<Vec<u8>>,
    ) -> Result<()> {
        let shared = &self.shared;
        if !dest.is_none() && !shared.registry.is_local(dest) {
            tracing::debug!(source = %source, dest = %dest, "Remote address, no harbor attached");
            return Err(Error::ServiceNotFound { address: dest });
        }
        let Some(ctx) = shared.registry.grab(dest) else {
            tracing::debug!(source = %source, dest = %dest, "Drop message to unknown service");
            return Err(Error::ServiceNotFound { address: dest });
        };
        let msg = Message::new(source, session, ptype, data);
        if ctx.inbox().push(msg, &shared.global) {
            Ok(())
        } else {
            Err(Error::ServiceNotFound { address: dest })
        }
    }

    /// Send to a bound name, or to a `:hex` address.
    pub fn send_name(
        &self,
        source: Address,
        name: &str,
        session: i32,
        ptype: u8,
        data: Option<Vec<u8>>,
    ) -> Result<()> {
        let dest = self.resolve(name)?;
        self.send(source, dest, session, ptype, data)
    }

    fn resolve(&self, name: &str) -> Result<Address> {
        if let Some(hex) = name.strip_prefix(':') {
            return u32::from_str_radix(hex, 16)
                .map(Address)
                .map_err(|_| Error::InvalidName {
                    name: name.to_owned(),
                    reason: "bad hex address".into(),
                });
        }
        self.find_by_name(name).ok_or_else(|| Error::NameNotFound {
            name: name.to_owned(),
        })
    }

    pub fn find_by_name(&self, name: &str) -> Option<Address> {
        self.shared.registry.find_name(name)
    }

    pub fn name(&self, address: Address, name: &str) -> Result<()> {
        self.shared.registry.bind_name(address, name)
    }

    /// Forward `sig` to the module instance behind `address`.
    pub fn signal(&self, address: Address, sig: i32) -> Result<()> {
        match self.shared.registry.grab(address) {
            Some(ctx) => {
                ctx.signal(sig);
                Ok(())
            }
            None => Err(Error::ServiceNotFound { address }),
        }
    }

    /// The log service booted from `Config::logservice`, falling back to
    /// whatever holds the `logger` name.
    pub fn logger_address(&self) -> Option<Address> {
        let booted = Address(self.shared.logger.load(Ordering::Acquire));
        if !booted.is_none() && self.shared.registry.grab(booted).is_some() {
            return Some(booted);
        }
        self.find_by_name(LOGGER_NAME)
    }

    /// Ask the log service to reopen its file.
    pub fn signal_hup(&self) {
        if let Some(logger) = self.logger_address() {
            tracing::info!("SIGHUP: reopening log");
            let _ = self.send(Address::NONE, logger, 0, PTYPE_SYSTEM, None);
        }
    }

    /// Log `text` through the logger service, or `tracing` without one.
    pub fn log(&self, source: Address, text: impl Into<String>) {
        let text = text.into();
        match self.logger_address() {
            Some(logger) => {
                let _ = self.send(source, logger, 0, PTYPE_TEXT, Some(text.into_bytes()));
            }
            None => tracing::info!(source = %source, "{}", text),
        }
    }

    /// Number of live counted services.
    pub fn total(&self) -> usize {
        self.shared.total()
    }

    /// Workers currently asleep on the condition.
    pub fn idle_workers(&self) -> usize {
        self.shared.cond.sleeping()
    }

    pub fn is_quit(&self) -> bool {
        self.shared.cond.is_quit()
    }

    /// Block up to `timeout`; true once the runtime is shutting down.
    pub fn wait_quit(&self, timeout: Duration) -> bool {
        self.shared.cond.wait_quit(timeout)
    }

    /// Boot the logger and bootstrap services, run every thread and
    /// return once no counted service is left.
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }
        if let Some(pidfile) = &shared.config.daemon {
            daemon::daemon_init(pidfile)?;
        }
        if shared.config.hup {
            signal::install_hup_handler()?;
        }
        tracing::info!(
            threads = shared.config.thread,
            harbor = shared.config.harbor,
            "Runtime starting"
        );

        let result = self.boot().and_then(|()| supervisor::start(self));
        self.cleanup();

        if let Some(pidfile) = &shared.config.daemon {
            if let Err(err) = daemon::daemon_exit(pidfile) {
                tracing::warn!(error = %err, "Pidfile cleanup failed");
            }
        }
        tracing::info!("Runtime stopped");
        result
    }

    fn boot(&self) -> Result<()> {
        let config = &self.shared.config;
        if let Some(logservice) = &config.logservice {
            let parm = config.logger.clone().unwrap_or_default();
            let logger = self.spawn_service(logservice, &parm, false).inspect_err(|err| {
                tracing::error!(module = %logservice, error = %err, "Can't launch logger service");
            })?;
            self.shared.logger.store(logger.0, Ordering::Release);
        }
        if let Some(bootstrap) = &config.bootstrap {
            self.launch(bootstrap, &config.bootstrap_parm).inspect_err(|err| {
                tracing::error!(module = %bootstrap, error = %err, "Bootstrap error");
            })?;
        }
        Ok(())
    }

    fn cleanup(&self) {
        self.shared.cond.quit();
        let residue = self.shared.registry.retire_all();
        for ctx in &residue {
            ctx.inbox().release_and_drain();
        }
        drop(residue);
        while let Some(inbox) = self.shared.global.pop() {
            inbox.release_and_drain();
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("total", &self.total())
            .field("services", &self.shared.registry.len())
            .field("modules", &self.shared.modules.len())
            .field("global", &self.shared.global.len())
            .finish()
    }
}
