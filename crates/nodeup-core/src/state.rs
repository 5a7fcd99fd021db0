//! Persisted installation record and lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fs::{FILE_MODE, atomic_write};
use crate::layout::InstallationLayout;
use crate::role::{DeployMode, NodeRole};

/// Lifecycle of an installation.
///
/// `Upgrading` is transient and only entered from `Running` or `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No installation record.
    Uninstalled,
    /// Installed but never started.
    Provisioned,
    /// Processes running.
    Running,
    /// Processes stopped after having run.
    Stopped,
    /// Upgrade in progress.
    Upgrading,
}

impl LifecycleState {
    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::{Provisioned, Running, Stopped, Uninstalled, Upgrading};
        matches!(
            (self, next),
            (Uninstalled, Provisioned)
                | (Provisioned | Stopped, Running)
                | (Running, Stopped)
                | (Running | Stopped, Upgrading)
                | (Upgrading, Running | Stopped)
                // re-running install on a live installation keeps its state
                | (Provisioned, Provisioned)
                | (Stopped, Stopped)
        )
    }

    /// Whether an upgrade may begin from this state.
    #[must_use]
    pub const fn can_upgrade(self) -> bool {
        self.can_transition_to(Self::Upgrading)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninstalled => "uninstalled",
            Self::Provisioned => "provisioned",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Upgrading => "upgrading",
        };
        f.write_str(s)
    }
}

/// Contents of `nodeup.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRecord {
    /// Role fixed at first install.
    pub role: NodeRole,
    /// Deploy mode fixed at first install.
    pub mode: DeployMode,
    /// Human-readable node name.
    pub moniker: String,
    /// Chain id agreed through genesis resolution.
    pub chain_id: String,
    /// Currently installed release version.
    pub version: String,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// First install time.
    pub installed_at: DateTime<Utc>,
    /// Last time any field changed.
    pub updated_at: DateTime<Utc>,
}

impl InstallationRecord {
    /// Loads the record, returning `None` when the installation does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    pub fn load(layout: &InstallationLayout) -> Result<Option<Self>> {
        let path = layout.record_file();
        let content = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io("failed to read installation record", &path, e)),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| Error::serialization(path.display().to_string(), e))
    }

    /// Persists the record atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, layout: &InstallationLayout) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::serialization("installation record", e))?;
        bytes.push(b'\n');
        atomic_write(&layout.record_file(), &bytes, FILE_MODE)
    }

    /// Rejects an invocation whose role or mode differs from the recorded
    /// one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` on mismatch.
    pub fn check_axes(&self, role: NodeRole, mode: DeployMode) -> Result<()> {
        if self.role != role {
            return Err(Error::InvalidConfiguration(format!(
                "installation was provisioned as role '{}', refusing to change it to '{role}'",
                self.role
            )));
        }
        if self.mode != mode {
            return Err(Error::InvalidConfiguration(format!(
                "installation was provisioned in {} mode, refusing to switch to {mode} mode",
                self.mode
            )));
        }
        Ok(())
    }

    /// Moves to `next`, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for an illegal transition.
    pub fn transition(&mut self, next: LifecycleState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidConfiguration(format!(
                "illegal lifecycle transition {} -> {next}",
                self.state
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Loads the record or fails when the installation does not exist.
///
/// # Errors
///
/// Returns `InvalidConfiguration` when no installation exists at the layout
/// root.
pub fn require_record(layout: &InstallationLayout) -> Result<InstallationRecord> {
    InstallationRecord::load(layout)?.ok_or_else(|| {
        Error::InvalidConfiguration(format!(
            "no installation found at {} (run `nodeup install` first)",
            layout.root().display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn record() -> InstallationRecord {
        let now = Utc::now();
        InstallationRecord {
            role: NodeRole::Rpc,
            mode: DeployMode::Binary,
            moniker: "node-0".to_string(),
            chain_id: "testnet-1".to_string(),
            version: "v1.0.0".to_string(),
            state: LifecycleState::Provisioned,
            installed_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_upgrade_only_from_running_or_stopped() {
        assert!(LifecycleState::Running.can_upgrade());
        assert!(LifecycleState::Stopped.can_upgrade());
        assert!(!LifecycleState::Provisioned.can_upgrade());
        assert!(!LifecycleState::Uninstalled.can_upgrade());
        assert!(!LifecycleState::Upgrading.can_upgrade());
    }

    #[test]
    fn test_transitions() {
        let mut rec = record();
        rec.transition(LifecycleState::Running).unwrap();
        rec.transition(LifecycleState::Stopped).unwrap();
        rec.transition(LifecycleState::Upgrading).unwrap();
        rec.transition(LifecycleState::Stopped).unwrap();

        let err = rec.transition(LifecycleState::Uninstalled).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn test_role_is_immutable() {
        let rec = record();
        assert!(rec.check_axes(NodeRole::Rpc, DeployMode::Binary).is_ok());
        let err = rec
            .check_axes(NodeRole::Validator, DeployMode::Binary)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert!(
            rec.check_axes(NodeRole::Rpc, DeployMode::Container)
                .is_err()
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        assert!(InstallationRecord::load(&layout).unwrap().is_none());

        let rec = record();
        rec.save(&layout).unwrap();
        assert_eq!(InstallationRecord::load(&layout).unwrap(), Some(rec));
    }
}
