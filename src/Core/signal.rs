//! Process signal hooks.
//!
//! `SIGHUP` only raises a flag; the timer thread turns it into a
//! `PTYPE_SYSTEM` message for the logger. Ctrl-C aborts the runtime.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

static HUP: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_hup(signal: libc::c_int) {
    if signal == libc::SIGHUP {
        HUP.store(true, Ordering::SeqCst);
    }
}

/// Install the `SIGHUP` handler (log reopen).
#[cfg(unix)]
pub fn install_hup_handler() -> Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handle_hup as extern "C" fn(libc::c_int) as libc::sighandler_t;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigfillset(&mut sa.sa_mask);
        if libc::sigaction(libc::SIGHUP, &sa, std::ptr::null_mut()) != 0 {
            return Err(Error::Signal {
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_hup_handler() -> Result<()> {
    Err(Error::Signal {
        reason: "SIGHUP is only available on unix".to_string(),
    })
}

/// Raise the hangup flag as if `SIGHUP` had been delivered.
pub fn request_hup() {
    HUP.store(true, Ordering::SeqCst);
}

/// Consume the hangup flag.
pub fn take_hup() -> bool {
    HUP.swap(false, Ordering::SeqCst)
}

/// Abort `runtime` (retire every service) when Ctrl-C arrives.
pub fn install_interrupt_handler(runtime: crate::Runtime::Runtime) -> Result<()> {
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, aborting runtime");
        runtime.abort();
    })
    .map_err(|e| Error::Signal {
        reason: e.to_string(),
    })
}
