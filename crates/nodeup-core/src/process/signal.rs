//! Pid files and OS-level signalling of recorded processes.
//!
//! The supervisor records its own pid and each child's pid so that a later
//! `nodeup stop` (a different OS process) can reach them.

use std::path::Path;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::ProcessError;
use crate::error::{Error, Result};
use crate::fs::{FILE_MODE, atomic_write, remove_if_exists};

/// Writes a pid file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    atomic_write(path, format!("{pid}\n").as_bytes(), FILE_MODE)
}

/// Reads a pid file, returning `None` when it is missing or unparsable.
#[must_use]
pub fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|pid| *pid > 0)
}

/// Removes a pid file if present.
///
/// # Errors
///
/// Returns an I/O error for failures other than "not found".
pub fn clear_pid_file(path: &Path) -> Result<()> {
    remove_if_exists(path).map(|_| ())
}

fn to_pid(pid: u32) -> Result<Pid, ProcessError> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| ProcessError::Signal {
            pid,
            reason: "pid out of range".to_string(),
        })
}

/// Whether a process with this pid exists (signal 0 probe).
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    to_pid(pid).is_ok_and(|target| kill(target, None).is_ok())
}

/// Sends `signal` to `pid`. A process that already exited is not an error.
///
/// # Errors
///
/// Returns `ProcessError::Signal` if delivery fails for another reason.
pub fn send(pid: u32, signal: Signal) -> Result<(), ProcessError> {
    let target = to_pid(pid)?;
    match kill(target, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(ProcessError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

/// Sends SIGTERM, polls until the process exits, and escalates to SIGKILL
/// after `grace`. Returns `true` if the process exited within the grace
/// period.
///
/// # Errors
///
/// Returns `ProcessFailed` if a signal cannot be delivered.
pub fn terminate_and_wait(name: &str, pid: u32, grace: Duration) -> Result<bool> {
    let to_err = |e: ProcessError| Error::ProcessFailed {
        process: name.to_string(),
        reason: e.to_string(),
    };

    send(pid, Signal::SIGTERM).map_err(to_err)?;
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(true);
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::warn!(process = name, pid, "grace period elapsed, sending SIGKILL");
    send(pid, Signal::SIGKILL).map_err(to_err)?;
    Ok(false)
}
