//! Foreground supervisor for binary deploy mode.
//!
//! Processes start in [`ProcessKind::ALL`] order, each gated on the previous
//! one's readiness probe. Once all are up the supervisor waits for either a
//! shutdown request or any child exiting. Either event tears down every
//! remaining child: SIGTERM in reverse startup order, a shared grace
//! deadline, then SIGKILL for survivors. The node is useless with a member
//! missing, so no child is ever restarted on its own.

use std::future::Future;
use std::process::ExitStatus;
use std::time::Duration;

use futures::future::{FutureExt, select_all};
use nix::sys::signal::Signal;
use tokio::process::Child;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::backoff::ReadinessConfig;
use crate::error::{Error, Result};
use crate::layout::InstallationLayout;
use crate::process::signal::{clear_pid_file, send, write_pid_file};
use crate::process::spawner::spawn;
use crate::process::{ProcessKind, ProcessSpec};
use crate::readiness::wait_until_ready;

/// Why supervision ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested (signal or caller).
    Shutdown,
    /// A child exited on its own, taking the others down with it.
    ChildExited {
        /// The process that exited.
        kind: ProcessKind,
        /// Its exit status.
        status: String,
    },
}

/// Summary of a supervision run.
#[derive(Debug, Clone)]
pub struct SupervisionReport {
    /// Why supervision ended.
    pub reason: StopReason,
    /// Pid of every child that was started, in startup order.
    pub pids: Vec<(ProcessKind, u32)>,
    /// Children that needed SIGKILL.
    pub killed: Vec<ProcessKind>,
}

struct Managed {
    kind: ProcessKind,
    pid: u32,
    child: Child,
}

/// Starts and supervises a set of processes.
#[derive(Debug, Clone)]
pub struct Supervisor {
    specs: Vec<ProcessSpec>,
    readiness: ReadinessConfig,
    stop_grace: Duration,
    layout: Option<InstallationLayout>,
}

impl Supervisor {
    /// Creates a supervisor for `specs`, started in the given order.
    #[must_use]
    pub const fn new(specs: Vec<ProcessSpec>, readiness: ReadinessConfig, stop_grace: Duration) -> Self {
        Self {
            specs,
            readiness,
            stop_grace,
            layout: None,
        }
    }

    /// Records pids under the installation's data directories.
    #[must_use]
    pub fn with_pid_files(mut self, layout: InstallationLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Starts every process, then blocks until `shutdown` resolves or a
    /// child exits. All children are stopped before this returns.
    ///
    /// # Errors
    ///
    /// Returns `ProcessFailed` or `NotReady` if startup fails; processes
    /// started so far are torn down first.
    pub async fn run<F>(self, shutdown: F) -> Result<SupervisionReport>
    where
        F: Future<Output = ()>,
    {
        if let Some(layout) = &self.layout {
            write_pid_file(&layout.supervisor_pid_file(), std::process::id())?;
        }

        let mut running = Vec::with_capacity(self.specs.len());
        if let Err(e) = self.start_all(&mut running).await {
            error!(error = %e, "startup failed, stopping started processes");
            self.teardown(&mut running).await;
            self.clear_supervisor_pid();
            return Err(e);
        }
        let pids = running.iter().map(|m| (m.kind, m.pid)).collect();
        info!("all processes ready");

        let reason = tokio::select! {
            () = shutdown => {
                info!("shutdown requested, stopping all processes");
                StopReason::Shutdown
            },
            (status, index) = wait_any(&mut running) => {
                let kind = running[index].kind;
                let status = status.map_or_else(|e| e.to_string(), |s| s.to_string());
                error!(process = %kind, %status, "process exited, stopping all processes");
                StopReason::ChildExited { kind, status }
            },
        };

        let killed = self.teardown(&mut running).await;
        self.clear_supervisor_pid();
        Ok(SupervisionReport {
            reason,
            pids,
            killed,
        })
    }

    async fn start_all(&self, running: &mut Vec<Managed>) -> Result<()> {
        for spec in &self.specs {
            let spawned = spawn(spec).map_err(|e| Error::ProcessFailed {
                process: spec.kind.to_string(),
                reason: e.to_string(),
            })?;
            info!(process = %spec.kind, pid = spawned.pid, "process started");
            if let Some(layout) = &self.layout {
                write_pid_file(&layout.pid_file(spec.kind), spawned.pid)?;
            }
            running.push(Managed {
                kind: spec.kind,
                pid: spawned.pid,
                child: spawned.child,
            });

            if let (Some(probe), Some(managed)) = (&spec.readiness, running.last_mut()) {
                wait_until_ready(spec.kind.as_str(), probe, &self.readiness, || {
                    managed
                        .child
                        .try_wait()
                        .ok()
                        .flatten()
                        .map(|status| status.to_string())
                })
                .await?;
            }
        }
        Ok(())
    }

    /// Stops every child still running. Returns the children that had to be
    /// killed.
    async fn teardown(&self, running: &mut [Managed]) -> Vec<ProcessKind> {
        for managed in running.iter_mut().rev() {
            if matches!(managed.child.try_wait(), Ok(None)) {
                info!(process = %managed.kind, pid = managed.pid, "sending SIGTERM");
                if let Err(e) = send(managed.pid, Signal::SIGTERM) {
                    warn!(process = %managed.kind, error = %e, "failed to signal process");
                }
            }
        }

        let deadline = Instant::now() + self.stop_grace;
        let mut killed = Vec::new();
        for managed in running.iter_mut().rev() {
            match tokio::time::timeout_at(deadline, managed.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(process = %managed.kind, %status, "process stopped");
                },
                Ok(Err(e)) => {
                    warn!(process = %managed.kind, error = %e, "failed to wait for process");
                },
                Err(_) => {
                    warn!(process = %managed.kind, pid = managed.pid, "grace period elapsed, sending SIGKILL");
                    if let Err(e) = managed.child.kill().await {
                        warn!(process = %managed.kind, error = %e, "failed to kill process");
                    }
                    killed.push(managed.kind);
                },
            }
            if let Some(layout) = &self.layout {
                if let Err(e) = clear_pid_file(&layout.pid_file(managed.kind)) {
                    warn!(process = %managed.kind, error = %e, "failed to remove pid file");
                }
            }
        }
        killed
    }

    fn clear_supervisor_pid(&self) {
        if let Some(layout) = &self.layout {
            if let Err(e) = clear_pid_file(&layout.supervisor_pid_file()) {
                warn!(error = %e, "failed to remove supervisor pid file");
            }
        }
    }
}

/// Resolves when any child exits, with its status and index.
async fn wait_any(running: &mut [Managed]) -> (std::io::Result<ExitStatus>, usize) {
    if running.is_empty() {
        return std::future::pending().await;
    }
    let waits = running.iter_mut().map(|m| m.child.wait().boxed());
    let (status, index, _) = select_all(waits).await;
    (status, index)
}

/// Resolves on SIGINT or SIGTERM. Handlers are installed before this
/// returns so no signal is missed during startup.
///
/// # Errors
///
/// Returns `ProcessFailed` if a handler cannot be installed.
pub fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let install = |kind: SignalKind| {
        signal(kind).map_err(|e| Error::ProcessFailed {
            process: "supervisor".to_string(),
            reason: format!("failed to install signal handler: {e}"),
        })
    };
    let mut sigterm = install(SignalKind::terminate())?;
    let mut sigint = install(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    })
}
