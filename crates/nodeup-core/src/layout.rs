//! Installation directory layout.
//!
//! The layout is a durable contract that other tooling may rely on:
//!
//! ```text
//! <root>/
//!   bin/                      consensusd, executiond, bridged
//!   data/{execution,consensus,bridge}/
//!   config/                   rendered configuration, identity, genesis
//!   logs/
//!   start, stop               entry points
//!   nodeup.env                environment export file
//!   nodeup.json               installation record
//!   nodeup.lock               advisory lock
//! ```
//!
//! Renaming any of these paths is a breaking change.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::process::ProcessKind;

/// Suffix given to binaries moved aside during an upgrade.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Resolved paths of one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationLayout {
    root: PathBuf,
}

impl InstallationLayout {
    /// Creates a layout rooted at `root`. Nothing is touched on disk.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Installation root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `bin/`
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// `data/`
    #[must_use]
    pub fn data_root(&self) -> PathBuf {
        self.root.join("data")
    }

    /// `config/`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// `logs/`
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Path of a managed binary.
    #[must_use]
    pub fn binary(&self, kind: ProcessKind) -> PathBuf {
        self.bin_dir().join(kind.binary_name())
    }

    /// Rollback anchor for a binary during upgrade.
    #[must_use]
    pub fn binary_backup(&self, kind: ProcessKind) -> PathBuf {
        self.bin_dir()
            .join(format!("{}{BACKUP_SUFFIX}", kind.binary_name()))
    }

    /// Per-process data directory.
    #[must_use]
    pub fn data_dir(&self, kind: ProcessKind) -> PathBuf {
        self.data_root().join(kind.as_str())
    }

    /// Per-process log file.
    #[must_use]
    pub fn log_file(&self, kind: ProcessKind) -> PathBuf {
        self.logs_dir().join(format!("{}.log", kind.as_str()))
    }

    /// Per-process pid file written by the supervisor.
    #[must_use]
    pub fn pid_file(&self, kind: ProcessKind) -> PathBuf {
        self.data_dir(kind).join("process.pid")
    }

    /// Pid file of the foreground supervisor.
    #[must_use]
    pub fn supervisor_pid_file(&self) -> PathBuf {
        self.data_root().join("supervisor.pid")
    }

    /// Home directory handed to the consensus engine.
    #[must_use]
    pub fn consensus_home(&self) -> PathBuf {
        self.config_dir().join("consensus")
    }

    /// Directory the consensus engine reads its config files from.
    #[must_use]
    pub fn consensus_config_dir(&self) -> PathBuf {
        self.consensus_home().join("config")
    }

    /// Consensus engine configuration.
    #[must_use]
    pub fn consensus_config(&self) -> PathBuf {
        self.consensus_config_dir().join("config.toml")
    }

    /// Consensus-layer genesis document.
    #[must_use]
    pub fn consensus_genesis(&self) -> PathBuf {
        self.consensus_config_dir().join("genesis.json")
    }

    /// Validator signing key.
    #[must_use]
    pub fn validator_key(&self) -> PathBuf {
        self.consensus_config_dir().join("priv_validator_key.json")
    }

    /// P2P node key.
    #[must_use]
    pub fn node_key(&self) -> PathBuf {
        self.consensus_config_dir().join("node_key.json")
    }

    /// Last-signed height/round/step record owned by the consensus engine.
    #[must_use]
    pub fn validator_state(&self) -> PathBuf {
        self.data_dir(ProcessKind::Consensus)
            .join("priv_validator_state.json")
    }

    /// Execution-layer genesis document.
    #[must_use]
    pub fn execution_genesis(&self) -> PathBuf {
        self.config_dir().join("execution").join("genesis.json")
    }

    /// Execution engine launch configuration.
    #[must_use]
    pub fn execution_config(&self) -> PathBuf {
        self.config_dir().join("execution.toml")
    }

    /// Bridge configuration.
    #[must_use]
    pub fn bridge_config(&self) -> PathBuf {
        self.config_dir().join("bridge.toml")
    }

    /// Authentication secret shared by the bridge and execution engine.
    #[must_use]
    pub fn auth_secret(&self) -> PathBuf {
        self.config_dir().join("jwt.hex")
    }

    /// Container orchestration manifest.
    #[must_use]
    pub fn compose_manifest(&self) -> PathBuf {
        self.root.join("docker-compose.yml")
    }

    /// `start` entry point.
    #[must_use]
    pub fn start_script(&self) -> PathBuf {
        self.root.join("start")
    }

    /// `stop` entry point.
    #[must_use]
    pub fn stop_script(&self) -> PathBuf {
        self.root.join("stop")
    }

    /// Environment export file.
    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.root.join("nodeup.env")
    }

    /// Installation record.
    #[must_use]
    pub fn record_file(&self) -> PathBuf {
        self.root.join("nodeup.json")
    }

    /// Advisory lock file.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("nodeup.lock")
    }

    /// Marker present while a binary upgrade is in flight.
    #[must_use]
    pub fn upgrade_marker(&self) -> PathBuf {
        self.root.join("upgrade.json")
    }

    /// Release pinned by a first install that has not finished yet.
    #[must_use]
    pub fn install_marker(&self) -> PathBuf {
        self.root.join("install.json")
    }

    /// Scratch directory used for external key generation.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(".scratch")
    }

    /// Whether an installation record exists.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.record_file().is_file()
    }

    /// Creates every fixed directory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be created.
    pub fn materialize(&self) -> Result<()> {
        let mut dirs = vec![
            self.bin_dir(),
            self.config_dir(),
            self.logs_dir(),
            self.consensus_config_dir(),
            self.execution_genesis()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.config_dir()),
        ];
        dirs.extend(ProcessKind::ALL.iter().map(|k| self.data_dir(*k)));

        for dir in dirs {
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::io("failed to create directory", &dir, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_roots() {
        let layout = InstallationLayout::new("/opt/node");
        assert_eq!(layout.bin_dir(), PathBuf::from("/opt/node/bin"));
        assert_eq!(
            layout.data_dir(ProcessKind::Execution),
            PathBuf::from("/opt/node/data/execution")
        );
        assert_eq!(
            layout.data_dir(ProcessKind::Consensus),
            PathBuf::from("/opt/node/data/consensus")
        );
        assert_eq!(
            layout.data_dir(ProcessKind::Bridge),
            PathBuf::from("/opt/node/data/bridge")
        );
        assert_eq!(layout.config_dir(), PathBuf::from("/opt/node/config"));
        assert_eq!(layout.start_script(), PathBuf::from("/opt/node/start"));
        assert_eq!(layout.stop_script(), PathBuf::from("/opt/node/stop"));
    }

    #[test]
    fn test_backup_path() {
        let layout = InstallationLayout::new("/opt/node");
        assert_eq!(
            layout.binary_backup(ProcessKind::Bridge),
            PathBuf::from("/opt/node/bin/bridged.bak")
        );
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        layout.materialize().unwrap();
        layout.materialize().unwrap();

        assert!(layout.bin_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
        assert!(layout.consensus_config_dir().is_dir());
        for kind in ProcessKind::ALL {
            assert!(layout.data_dir(kind).is_dir());
        }
    }
}
