//! Start, stop, status and upgrade of an installed node.
//!
//! In binary mode `start` runs a foreground [`Supervisor`] that owns the
//! three processes until shutdown. `stop` is a separate invocation and
//! reaches them through the pid files the supervisor records. In container
//! mode both are delegated to the container engine.

mod container;
mod supervisor;
mod upgrade;

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

pub use self::container::{CliContainerEngine, ContainerEngine, rewrite_image_tag};
pub use self::supervisor::{StopReason, SupervisionReport, Supervisor, shutdown_signal};
pub use self::upgrade::{UpgradeOutcome, recover_interrupted_upgrade, upgrade, upgrade_binaries};
pub(crate) use self::upgrade::reconcile_interrupted;
#[cfg(test)]
pub(crate) use self::container::testing;
use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::layout::InstallationLayout;
use crate::lock::InstallLock;
use crate::process::signal::{
    clear_pid_file, is_alive, read_pid_file, terminate_and_wait, write_pid_file,
};
use crate::process::{ProcessKind, ProcessSpec};
use crate::readiness::Probe;
use crate::role::DeployMode;
use crate::state::{InstallationRecord, LifecycleState, require_record};

/// Launch descriptions of the three processes in startup order.
#[must_use]
pub fn process_specs(layout: &InstallationLayout, config: &BootstrapConfig) -> Vec<ProcessSpec> {
    let ports = &config.ports;
    let local = |port: u16| SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    ProcessKind::ALL
        .into_iter()
        .map(|kind| {
            let probe = match kind {
                ProcessKind::Execution => Probe::Tcp(local(ports.execution_auth)),
                ProcessKind::Bridge => Probe::Tcp(local(ports.bridge)),
                ProcessKind::Consensus => {
                    Probe::Http(format!("http://127.0.0.1:{}/health", ports.consensus_rpc))
                },
            };
            ProcessSpec::builder(kind)
                .command(layout.binary(kind))
                .args(kind.launch_args(layout))
                .cwd(layout.data_dir(kind))
                .log_file(layout.log_file(kind))
                .readiness(probe)
                .build()
        })
        .collect()
}

fn require_mode(record: &InstallationRecord, mode: DeployMode) -> Result<()> {
    if record.mode == mode {
        Ok(())
    } else {
        Err(Error::InvalidConfiguration(format!(
            "installation runs in {} mode",
            record.mode
        )))
    }
}

/// Settles a record whose state no longer matches reality: a `Running`
/// binary installation without a live supervisor, or an interrupted
/// upgrade.
fn reconcile_stale(layout: &InstallationLayout, record: &mut InstallationRecord) -> Result<()> {
    reconcile_interrupted(layout, record)?;
    if record.mode == DeployMode::Binary
        && record.state == LifecycleState::Running
        && !read_pid_file(&layout.supervisor_pid_file()).is_some_and(is_alive)
    {
        warn!("installation was recorded as running but no supervisor is alive");
        record.transition(LifecycleState::Stopped)?;
        record.save(layout)?;
    }
    Ok(())
}

/// Marks the installation as owned by this process. The supervisor pid is
/// written under the lock, so of two concurrent starts only one passes the
/// liveness check.
fn claim_foreground(layout: &InstallationLayout) -> Result<()> {
    let _lock = InstallLock::acquire(layout)?;
    let mut record = require_record(layout)?;
    require_mode(&record, DeployMode::Binary)?;
    reconcile_stale(layout, &mut record)?;
    let pid_file = layout.supervisor_pid_file();
    if let Some(pid) = read_pid_file(&pid_file).filter(|p| is_alive(*p)) {
        return Err(Error::ProcessFailed {
            process: "supervisor".to_string(),
            reason: format!("node is already running (pid {pid})"),
        });
    }
    write_pid_file(&pid_file, std::process::id())?;
    record.transition(LifecycleState::Running)?;
    if let Err(e) = record.save(layout) {
        clear_pid_file(&pid_file)?;
        return Err(e);
    }
    Ok(())
}

/// Runs the node in the foreground until `shutdown` resolves or a process
/// exits.
///
/// # Errors
///
/// Returns `ProcessFailed` if the node is already running, a process fails to
/// start, or a process exits on its own; `NotReady` if a process never
/// becomes ready.
pub async fn run_foreground<F>(
    layout: &InstallationLayout,
    config: &BootstrapConfig,
    shutdown: F,
) -> Result<SupervisionReport>
where
    F: Future<Output = ()>,
{
    claim_foreground(layout)?;

    let result = Supervisor::new(
        process_specs(layout, config),
        config.readiness.clone(),
        config.timeouts.stop_grace,
    )
    .with_pid_files(layout.clone())
    .run(shutdown)
    .await;

    let mut record = require_record(layout)?;
    if record.state == LifecycleState::Running {
        record.transition(LifecycleState::Stopped)?;
        record.save(layout)?;
    }

    let report = result?;
    match &report.reason {
        StopReason::Shutdown => Ok(report),
        StopReason::ChildExited { kind, status } => Err(Error::ProcessFailed {
            process: kind.to_string(),
            reason: format!("exited unexpectedly ({status})"),
        }),
    }
}

/// Brings up the container services.
///
/// # Errors
///
/// Returns `UnsupportedEnvironment` if the engine is unusable and
/// `ProcessFailed` if the services do not come up.
pub fn start_containers(layout: &InstallationLayout, engine: &dyn ContainerEngine) -> Result<()> {
    let mut record = require_record(layout)?;
    require_mode(&record, DeployMode::Container)?;
    reconcile_interrupted(layout, &mut record)?;
    engine.check_available()?;
    engine.up(&layout.compose_manifest(), false)?;
    info!("container services started");

    if record.state != LifecycleState::Running {
        record.transition(LifecycleState::Running)?;
        record.save(layout)?;
    }
    Ok(())
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Processes that were signalled.
    pub stopped: Vec<String>,
    /// Processes that ignored SIGTERM and were killed.
    pub forced: Vec<String>,
}

/// Stops a binary-mode node through its pid files.
///
/// The supervisor is asked first and tears its children down itself. Any
/// child still recorded afterwards (the supervisor was killed, or never
/// recorded its own pid) is signalled directly in reverse startup order.
pub(crate) fn stop_binary(layout: &InstallationLayout, grace: Duration) -> Result<StopReport> {
    let mut report = StopReport::default();

    let supervisor_pid = layout.supervisor_pid_file();
    if let Some(pid) = read_pid_file(&supervisor_pid).filter(|p| is_alive(*p)) {
        info!(pid, "stopping supervisor");
        // The supervisor needs its own grace period for the children.
        if !terminate_and_wait("supervisor", pid, grace.saturating_mul(2))? {
            report.forced.push("supervisor".to_string());
        }
        report.stopped.push("supervisor".to_string());
    }
    clear_pid_file(&supervisor_pid)?;

    for kind in ProcessKind::ALL.into_iter().rev() {
        let pid_file = layout.pid_file(kind);
        if let Some(pid) = read_pid_file(&pid_file).filter(|p| is_alive(*p)) {
            info!(process = %kind, pid, "stopping orphaned process");
            if !terminate_and_wait(kind.as_str(), pid, grace)? {
                report.forced.push(kind.to_string());
            }
            report.stopped.push(kind.to_string());
        }
        clear_pid_file(&pid_file)?;
    }
    Ok(report)
}

/// Stops the node in whichever mode it was installed.
///
/// # Errors
///
/// Returns `InvalidConfiguration` if nothing is installed and
/// `ProcessFailed` if a process cannot be signalled or the container engine
/// fails.
pub fn stop(
    layout: &InstallationLayout,
    config: &BootstrapConfig,
    engine: &dyn ContainerEngine,
) -> Result<StopReport> {
    let mut record = require_record(layout)?;
    let report = match record.mode {
        DeployMode::Binary => stop_binary(layout, config.timeouts.stop_grace)?,
        DeployMode::Container => {
            engine.down(&layout.compose_manifest())?;
            StopReport {
                stopped: ProcessKind::ALL.iter().map(ToString::to_string).collect(),
                forced: Vec::new(),
            }
        },
    };

    // A foreground supervisor records its own exit; reload before settling.
    if let Some(current) = InstallationRecord::load(layout)? {
        record = current;
    }
    if record.state == LifecycleState::Running {
        record.transition(LifecycleState::Stopped)?;
        record.save(layout)?;
    }
    if report.stopped.is_empty() {
        info!("node was not running");
    }
    Ok(report)
}

/// Observed state of one managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    /// Which process.
    pub kind: ProcessKind,
    /// Recorded pid, if any.
    pub pid: Option<u32>,
    /// Whether the recorded pid is alive (binary mode) or the service is
    /// running (container mode).
    pub running: bool,
    /// Whether the binary is installed.
    pub installed: bool,
}

/// Snapshot reported by `nodeup status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Installation root.
    pub home: String,
    /// Installation record, absent when nothing is installed.
    pub record: Option<InstallationRecord>,
    /// Foreground supervisor pid when alive.
    pub supervisor_pid: Option<u32>,
    /// Per-process state in startup order.
    pub processes: Vec<ProcessStatus>,
    /// Whether an interrupted upgrade awaits rollback.
    pub upgrade_in_progress: bool,
}

/// Reads the installation's state without modifying anything.
///
/// # Errors
///
/// Returns an error if the installation record exists but is unreadable.
pub fn status(layout: &InstallationLayout, engine: &dyn ContainerEngine) -> Result<StatusReport> {
    let record = InstallationRecord::load(layout)?;

    let services = match record.as_ref().map(|r| r.mode) {
        Some(DeployMode::Container) => match engine.running_services(&layout.compose_manifest()) {
            Ok(services) => Some(services),
            Err(e) => {
                warn!(error = %e, "could not query container services");
                Some(Vec::new())
            },
        },
        _ => None,
    };

    let processes = ProcessKind::ALL
        .into_iter()
        .map(|kind| {
            let pid = read_pid_file(&layout.pid_file(kind));
            let running = services.as_ref().map_or_else(
                || pid.is_some_and(is_alive),
                |running| running.iter().any(|s| s == kind.service_name()),
            );
            ProcessStatus {
                kind,
                pid,
                running,
                installed: layout.binary(kind).is_file(),
            }
        })
        .collect();

    Ok(StatusReport {
        home: layout.root().display().to_string(),
        record,
        supervisor_pid: read_pid_file(&layout.supervisor_pid_file()).filter(|p| is_alive(*p)),
        processes,
        upgrade_in_progress: layout.upgrade_marker().exists(),
    })
}
