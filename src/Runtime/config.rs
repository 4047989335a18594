// src/Runtime/config.rs
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::Actor::module::ModulePath;
use crate::Core::coroutine::STACK_SIZE;

pub const DEFAULT_MODULE_PATH: &str = "./cservice/?.so";
pub const DEFAULT_LOGSERVICE: &str = "logger";
/// Timer thread period.
pub const TIMER_TICK: Duration = Duration::from_micros(2500);
/// Stuck-handler scan period.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(5);
pub const MIN_STACK_SIZE: usize = 16 << 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub thread: usize,
    pub harbor: u32,
    pub daemon: Option<PathBuf>,
    pub module_path: String,
    pub bootstrap: Option<String>,
    pub bootstrap_parm: String,
    pub logservice: Option<String>,
    pub logger: Option<String>,
    pub profile: bool,
    pub timer_tick: Duration,
    pub monitor_interval: Duration,
    pub coroutine_stack_size: usize,
    pub hup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thread: 8,
            harbor: 1,
            daemon: None,
            module_path: DEFAULT_MODULE_PATH.into(),
            bootstrap: None,
            bootstrap_parm: String::new(),
            logservice: Some(DEFAULT_LOGSERVICE.into()),
            logger: None,
            profile: false,
            timer_tick: TIMER_TICK,
            monitor_interval: MONITOR_INTERVAL,
            coroutine_stack_size: STACK_SIZE,
            hup: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, thread: usize) -> Self {
        self.thread = thread;
        self
    }

    pub fn with_harbor(mut self, harbor: u32) -> Self {
        self.harbor = harbor;
        self
    }

    pub fn with_daemon(mut self, pidfile: impl Into<PathBuf>) -> Self {
        self.daemon = Some(pidfile.into());
        self
    }

    pub fn with_module_path(mut self, path: impl Into<String>) -> Self {
        self.module_path = path.into();
        self
    }

    pub fn with_bootstrap(mut self, module: impl Into<String>, parm: impl Into<String>) -> Self {
        self.bootstrap = Some(module.into());
        self.bootstrap_parm = parm.into();
        self
    }

    /// Logger module to launch first; `None` disables it.
    pub fn with_logservice(mut self, module: Option<String>) -> Self {
        self.logservice = module;
        self
    }

    /// Log file handed to the logger service.
    pub fn with_logger(mut self, file: impl Into<String>) -> Self {
        self.logger = Some(file.into());
        self
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_timer_tick(mut self, tick: Duration) -> Self {
        self.timer_tick = tick;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.coroutine_stack_size = size;
        self
    }

    pub fn with_hup(mut self, hup: bool) -> Self {
        self.hup = hup;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::InvalidConfig { reason });
        if self.thread == 0 {
            return invalid("thread must be at least 1".into());
        }
        if self.harbor > 255 {
            return invalid(format!("harbor {} does not fit in 8 bits", self.harbor));
        }
        ModulePath::parse(&self.module_path)?;
        if matches!(&self.bootstrap, Some(name) if name.is_empty()) {
            return invalid("bootstrap module name is empty".into());
        }
        if self.coroutine_stack_size < MIN_STACK_SIZE {
            return invalid(format!(
                "coroutine stack {} below {} bytes",
                self.coroutine_stack_size, MIN_STACK_SIZE
            ));
        }
        if self.timer_tick.is_zero() || self.monitor_interval.is_zero() {
            return invalid("timer tick and monitor interval must be non-zero".into());
        }
        Ok(())
    }
}
