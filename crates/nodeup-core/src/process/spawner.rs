//! Process spawning utilities.
//!
//! Spawns managed processes with their output redirected to the
//! installation's log files.

use std::fs::OpenOptions;
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::{ProcessError, ProcessSpec};

/// A spawned process with its child handle and PID.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle.
    pub child: Child,
    /// The OS process ID.
    pub pid: u32,
}

/// Spawn a process according to its specification.
///
/// Stdout and stderr are appended to `spec.log_file` when set. The child is
/// not killed on drop; the supervisor owns teardown.
///
/// # Errors
///
/// Returns `ProcessError::SpawnFailed` if the process cannot be spawned or
/// its PID cannot be obtained, and `ProcessError::LogFile` if the log file
/// cannot be opened.
pub fn spawn(spec: &ProcessSpec) -> Result<SpawnedProcess, ProcessError> {
    let mut cmd = Command::new(&spec.command);

    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .kill_on_drop(false);

    if let Some(path) = &spec.log_file {
        let open = || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ProcessError::LogFile {
                    path: path.clone(),
                    source,
                })
        };
        cmd.stdout(Stdio::from(open()?)).stderr(Stdio::from(open()?));
    } else {
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    }

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    let child = cmd
        .spawn()
        .map_err(|e| ProcessError::SpawnFailed(format!("{}: {e}", spec.command.display())))?;

    let pid = child
        .id()
        .ok_or_else(|| ProcessError::SpawnFailed("failed to get process ID".to_string()))?;

    Ok(SpawnedProcess { child, pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessKind;

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[tokio::test]
    async fn test_spawn_writes_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("execution.log");
        let spec = ProcessSpec::builder(ProcessKind::Execution)
            .command("sh")
            .args(["-c", "echo $NODEUP_TEST_VAR"])
            .env("NODEUP_TEST_VAR", "hello-log")
            .log_file(&log)
            .build();

        let mut spawned = spawn(&spec).unwrap();
        assert!(spawned.pid > 0);
        let status = spawned.child.wait().await.unwrap();
        assert!(status.success());

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("hello-log"), "{contents}");
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[tokio::test]
    async fn test_spawn_invalid_command() {
        let spec = ProcessSpec::builder(ProcessKind::Bridge)
            .command("nonexistent_command_12345")
            .build();

        assert!(matches!(spawn(&spec), Err(ProcessError::SpawnFailed(_))));
    }
}
