// Per-worker watchdog record.

use crate::MPMC::Structs::message::Address;
use std::sync::atomic::{AtomicU32, Ordering};

/// Dispatch record of one worker.
///
/// Single writer (the worker) and single reader (the monitor thread).
/// `version` only moves forward; a scan that sees the same version twice
/// while a destination is set has caught a handler that did not return.
#[derive(Debug, Default)]
pub struct Monitor {
    source: AtomicU32,
    destination: AtomicU32,
    version: AtomicU32,
    check_version: AtomicU32,
}

/// One "maybe stuck" observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckReport {
    pub source: Address,
    pub destination: Address,
    pub version: u32,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the message being dispatched; `(NONE, NONE)` clears it.
    pub fn trigger(&self, source: Address, destination: Address) {
        self.source.store(source.0, Ordering::Relaxed);
        self.destination.store(destination.0, Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Called by the monitor thread once per scan.
    pub fn check(&self) -> Option<StuckReport> {
        let version = self.version.load(Ordering::Acquire);
        if version == self.check_version.load(Ordering::Relaxed) {
            let destination = Address(self.destination.load(Ordering::Relaxed));
            if !destination.is_none() {
                return Some(StuckReport {
                    source: Address(self.source.load(Ordering::Relaxed)),
                    destination,
                    version,
                });
            }
        } else {
            self.check_version.store(version, Ordering::Relaxed);
        }
        None
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }
}
