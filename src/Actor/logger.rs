//! Built-in `logger` service.
//!
//! Text messages are written to `tracing`, or appended to the file named
//! by the launch parameter. A `PTYPE_SYSTEM` message reopens that file.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use super::context::{Context, DispatchMode, Flow};
use super::module::{Module, Service};
use crate::error::Result;
use crate::Core::coroutine::CoEnv;
use crate::MPMC::Structs::message::{Message, PTYPE_SYSTEM};

pub const LOGGER_NAME: &str = "logger";

#[derive(Default)]
struct Sink {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl Sink {
    fn open(&mut self) -> std::io::Result<()> {
        if let Some(path) = &self.path {
            self.file = Some(OpenOptions::new().create(true).append(true).open(path)?);
        }
        Ok(())
    }

    fn write(&mut self, msg: &Message) {
        let text = String::from_utf8_lossy(msg.payload());
        match &mut self.file {
            Some(file) => {
                if let Err(err) = writeln!(file, "[{}] {}", msg.source, text).and_then(|_| file.flush()) {
                    tracing::warn!(error = %err, "Logger write failed");
                }
            }
            None => tracing::info!(source = %msg.source, "{}", text),
        }
    }
}

#[derive(Default)]
pub struct Logger {
    sink: Arc<Mutex<Sink>>,
}

impl Logger {
    pub fn module() -> Module {
        Module::of::<Logger>(LOGGER_NAME)
    }
}

impl Service for Logger {
    fn init(&self, ctx: &Arc<Context>, params: &str) -> Result<()> {
        {
            let mut sink = self.sink.lock();
            if !params.is_empty() {
                sink.path = Some(PathBuf::from(params));
                sink.open()?;
            }
        }

        let sink = Arc::clone(&self.sink);
        ctx.set_handler(
            move |_ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                let mut sink = sink.lock();
                if msg.ptype == PTYPE_SYSTEM {
                    if let Err(err) = sink.open() {
                        tracing::warn!(error = %err, "Logger reopen failed");
                    }
                } else {
                    sink.write(&msg);
                }
                Flow::Continue
            },
            DispatchMode::Direct,
        );
        ctx.register_name(LOGGER_NAME)
    }

    fn release(&self) {
        let mut sink = self.sink.lock();
        if let Some(file) = &mut sink.file {
            let _ = file.flush();
        }
        sink.file = None;
    }
}
