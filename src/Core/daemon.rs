// Pidfile handling for daemon mode.
//
// Detaching from the terminal belongs to the process launcher; the
// runtime only guards against a second instance and records its pid.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::Path;

/// Pid recorded in `pidfile`, if the file exists and parses.
pub fn read_pid(pidfile: &Path) -> Option<i32> {
    let text = fs::read_to_string(pidfile).ok()?;
    text.trim().parse().ok()
}

#[cfg(unix)]
fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks that the process exists; EPERM still means it does.
    let found = unsafe { libc::kill(pid, 0) == 0 };
    found || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_alive(_pid: i32) -> bool {
    false
}

/// Refuse to start if `pidfile` names a live process, otherwise write
/// our own pid into it.
pub fn daemon_init(pidfile: &Path) -> Result<()> {
    if let Some(pid) = read_pid(pidfile) {
        if pid as u32 != std::process::id() && is_alive(pid) {
            return Err(Error::Daemon {
                reason: format!(
                    "already running, pid = {} (pidfile {})",
                    pid,
                    pidfile.display()
                ),
            });
        }
    }
    fs::write(pidfile, format!("{}\n", std::process::id())).map_err(|e| Error::Daemon {
        reason: format!("can't write pidfile {}: {}", pidfile.display(), e),
    })?;
    Ok(())
}

/// Remove the pidfile written by [`daemon_init`].
pub fn daemon_exit(pidfile: &Path) -> Result<()> {
    match fs::remove_file(pidfile) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
