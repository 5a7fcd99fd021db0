//! Release upgrades.
//!
//! Binary mode replaces the three binaries as a set. Each current binary is
//! moved to `<name>.bak` before its replacement is downloaded; if any
//! download fails every backup is restored and partial downloads removed.
//! `upgrade.json` records the set being replaced so that an upgrade cut
//! short by a crash is rolled back by the next invocation.
//!
//! Container mode pulls every new image first and only then rewrites the
//! manifest's tags and recreates the services.

use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::container::{ContainerEngine, rewrite_image_tag};
use super::stop_binary;
use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::fs::{FILE_MODE, atomic_write, remove_if_exists};
use crate::http::HttpFetch;
use crate::layout::InstallationLayout;
use crate::lock::InstallLock;
use crate::platform::Platform;
use crate::process::ProcessKind;
use crate::process::signal::{is_alive, read_pid_file};
use crate::release::{ArtifactSource, ReleaseDescriptor, image_name, resolve_release};
use crate::role::DeployMode;
use crate::state::{InstallationRecord, LifecycleState, require_record};

/// Contents of `upgrade.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct UpgradeMarker {
    to_version: String,
    /// Binaries that existed before the upgrade began.
    originals: Vec<ProcessKind>,
    started_at: DateTime<Utc>,
}

impl UpgradeMarker {
    fn load(layout: &InstallationLayout) -> Result<Option<Self>> {
        let path = layout.upgrade_marker();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::serialization(path.display().to_string(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("failed to read upgrade marker", &path, e)),
        }
    }

    fn save(&self, layout: &InstallationLayout) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|e| Error::serialization("upgrade.json", e))?;
        atomic_write(&layout.upgrade_marker(), &bytes, FILE_MODE)
    }
}

/// Result of an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOutcome {
    /// Version installed before the upgrade.
    pub from_version: String,
    /// Version installed afterwards.
    pub to_version: String,
    /// False when the target was already installed.
    pub changed: bool,
    /// Whether the services were restarted (container mode only).
    pub restarted: bool,
}

/// Replaces all three binaries with `release`'s, all or nothing.
///
/// # Errors
///
/// Returns `UpgradeDownloadFailed` naming the first artifact that failed,
/// after the previous binaries have been restored.
pub fn upgrade_binaries(
    layout: &InstallationLayout,
    release: &ReleaseDescriptor,
    source: &dyn ArtifactSource,
) -> Result<()> {
    let marker = UpgradeMarker {
        to_version: release.version.clone(),
        originals: ProcessKind::ALL
            .into_iter()
            .filter(|kind| layout.binary(*kind).exists())
            .collect(),
        started_at: Utc::now(),
    };
    marker.save(layout)?;

    for kind in &marker.originals {
        let (current, backup) = (layout.binary(*kind), layout.binary_backup(*kind));
        if let Err(e) = fs::rename(&current, &backup) {
            rollback(layout, &marker)?;
            return Err(Error::io("failed to back up binary", current, e));
        }
    }

    for kind in ProcessKind::ALL {
        if let Err(e) = source.fetch_binary(release, kind, &layout.binary(kind)) {
            warn!(binary = kind.binary_name(), error = %e, "download failed, rolling back upgrade");
            rollback(layout, &marker)?;
            return Err(Error::UpgradeDownloadFailed {
                artifact: kind.binary_name().to_string(),
                reason: e.to_string(),
            });
        }
    }

    for kind in ProcessKind::ALL {
        remove_if_exists(&layout.binary_backup(kind))?;
    }
    remove_if_exists(&layout.upgrade_marker())?;
    info!(version = %release.version, "binaries upgraded");
    Ok(())
}

/// Restores the pre-upgrade binary set described by `marker` and removes
/// the marker.
fn rollback(layout: &InstallationLayout, marker: &UpgradeMarker) -> Result<()> {
    for kind in ProcessKind::ALL {
        let (current, backup) = (layout.binary(kind), layout.binary_backup(kind));
        if backup.exists() {
            fs::rename(&backup, &current)
                .map_err(|e| Error::io("failed to restore binary", &backup, e))?;
        } else if !marker.originals.contains(&kind) {
            remove_if_exists(&current)?;
        }
        // An original without a backup was never moved.
    }
    remove_if_exists(&layout.upgrade_marker())?;
    Ok(())
}

/// Rolls back a binary upgrade that was interrupted. Returns whether one was
/// found.
///
/// # Errors
///
/// Returns an error if the marker is unreadable or a binary cannot be
/// restored.
pub fn recover_interrupted_upgrade(layout: &InstallationLayout) -> Result<bool> {
    let Some(marker) = UpgradeMarker::load(layout)? else {
        return Ok(false);
    };
    warn!(
        to_version = %marker.to_version,
        started_at = %marker.started_at,
        "found interrupted upgrade, restoring previous binaries"
    );
    rollback(layout, &marker)?;
    Ok(true)
}

/// Upgrades an installation to the configured release.
///
/// Binary mode stops the node first and leaves it stopped; container mode
/// recreates the services on the new images.
///
/// # Errors
///
/// Returns `UnsupportedEnvironment` or `InvalidConfiguration` from pre-flight
/// checks before anything is modified, `NoReleaseFound` if the target cannot
/// be resolved, `InvalidConfiguration` if the installation is not in an
/// upgradable state, and `UpgradeDownloadFailed` if new artifacts cannot be
/// retrieved.
pub fn upgrade(
    layout: &InstallationLayout,
    config: &BootstrapConfig,
    fetcher: &dyn HttpFetch,
    artifacts: &dyn ArtifactSource,
    engine: &dyn ContainerEngine,
) -> Result<UpgradeOutcome> {
    config.validate()?;
    Platform::detect()?;

    let _lock = InstallLock::acquire(layout)?;
    let mut record = require_record(layout)?;
    if record.mode == DeployMode::Container {
        engine.check_available()?;
    }
    reconcile_interrupted(layout, &mut record)?;

    if !record.state.can_upgrade() {
        return Err(Error::InvalidConfiguration(format!(
            "cannot upgrade an installation that is {} (start it at least once first)",
            record.state
        )));
    }

    let release = resolve_release(&config.release, fetcher, config.timeouts.metadata)?;
    let from_version = record.version.clone();
    if release.version == from_version {
        info!(version = %from_version, "already at target version");
        return Ok(UpgradeOutcome {
            to_version: from_version.clone(),
            from_version,
            changed: false,
            restarted: false,
        });
    }
    info!(from = %from_version, to = %release.version, mode = %record.mode, "upgrading");

    let restarted = match record.mode {
        DeployMode::Binary => {
            upgrade_binary_mode(layout, config, &release, artifacts)?;
            false
        },
        DeployMode::Container => {
            upgrade_container_mode(layout, config, &release, engine)?;
            true
        },
    };

    Ok(UpgradeOutcome {
        from_version,
        to_version: release.version,
        changed: true,
        restarted,
    })
}

/// Rolls back an interrupted binary upgrade and settles a record left in
/// `Upgrading`.
pub(crate) fn reconcile_interrupted(
    layout: &InstallationLayout,
    record: &mut InstallationRecord,
) -> Result<()> {
    recover_interrupted_upgrade(layout)?;
    if record.state == LifecycleState::Upgrading {
        record.transition(LifecycleState::Stopped)?;
        record.save(layout)?;
        info!("installation left upgrading by an interrupted run, marked stopped");
    }
    Ok(())
}

fn upgrade_binary_mode(
    layout: &InstallationLayout,
    config: &BootstrapConfig,
    release: &ReleaseDescriptor,
    artifacts: &dyn ArtifactSource,
) -> Result<()> {
    let alive = |path: std::path::PathBuf| read_pid_file(&path).is_some_and(is_alive);
    let running = alive(layout.supervisor_pid_file())
        || ProcessKind::ALL.iter().any(|kind| alive(layout.pid_file(*kind)));
    if running {
        match stop_binary(layout, config.timeouts.stop_grace) {
            Ok(report) => {
                info!(stopped = ?report.stopped, forced = ?report.forced, "stopped node for upgrade");
            },
            Err(e) => warn!(error = %e, "failed to stop node cleanly, continuing with upgrade"),
        }
    }

    // The supervisor records its own exit, so reload.
    let mut record = require_record(layout)?;
    if record.state == LifecycleState::Running {
        record.transition(LifecycleState::Stopped)?;
    }
    record.transition(LifecycleState::Upgrading)?;
    record.save(layout)?;

    let result = upgrade_binaries(layout, release, artifacts);
    if result.is_ok() {
        record.version.clone_from(&release.version);
    }
    record.transition(LifecycleState::Stopped)?;
    record.save(layout)?;
    result
}

fn upgrade_container_mode(
    layout: &InstallationLayout,
    config: &BootstrapConfig,
    release: &ReleaseDescriptor,
    engine: &dyn ContainerEngine,
) -> Result<()> {
    let registry = &config.release.image_registry;
    let manifest_path = layout.compose_manifest();
    let mut manifest = fs::read_to_string(&manifest_path)
        .map_err(|e| Error::io("failed to read container manifest", &manifest_path, e))?;
    for kind in ProcessKind::ALL {
        let name = image_name(registry, kind);
        let (rewritten, replaced) = rewrite_image_tag(&manifest, &name, &release.version);
        if replaced == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "{} does not reference {name}; release.image_registry must match the \
                 registry the installation was rendered with",
                manifest_path.display()
            )));
        }
        manifest = rewritten;
    }

    for kind in ProcessKind::ALL {
        let image = release.image_ref(registry, kind);
        engine.pull(&image).map_err(|e| Error::UpgradeDownloadFailed {
            artifact: image.clone(),
            reason: e.to_string(),
        })?;
    }

    let mut record = require_record(layout)?;
    record.transition(LifecycleState::Upgrading)?;
    record.save(layout)?;
    atomic_write(&manifest_path, manifest.as_bytes(), FILE_MODE)?;

    if let Err(e) = engine.up(&manifest_path, true) {
        record.version.clone_from(&release.version);
        record.transition(LifecycleState::Stopped)?;
        record.save(layout)?;
        return Err(e);
    }
    record.version.clone_from(&release.version);
    record.transition(LifecycleState::Running)?;
    record.save(layout)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::ReleaseConfig;
    use crate::error::ErrorKind;
    use crate::http::testing::MockFetcher;
    use crate::lifecycle::container::testing::FakeEngine;
    use crate::platform::Platform;
    use crate::release::HttpArtifactSource;
    use crate::role::NodeRole;

    const NEW_BINARY: &[u8] = b"\x7fELF\x02\x01\x01new";

    fn platform() -> Platform {
        Platform::from_parts("linux", "amd64").unwrap()
    }

    fn installed(mode: DeployMode, state: LifecycleState) -> (tempfile::TempDir, InstallationLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        layout.materialize().unwrap();
        for kind in ProcessKind::ALL {
            fs::write(layout.binary(kind), format!("old-{kind}")).unwrap();
        }
        let now = Utc::now();
        InstallationRecord {
            role: NodeRole::Rpc,
            mode,
            moniker: "node-0".to_string(),
            chain_id: "chain-1".to_string(),
            version: "v1.0.0".to_string(),
            state,
            installed_at: now,
            updated_at: now,
        }
        .save(&layout)
        .unwrap();
        (dir, layout)
    }

    fn release(version: &str) -> ReleaseDescriptor {
        ReleaseDescriptor::new(&ReleaseConfig::default(), version)
    }

    fn serving(release: &ReleaseDescriptor, kinds: &[ProcessKind]) -> Arc<MockFetcher> {
        let mut fetcher = MockFetcher::new();
        for kind in kinds {
            fetcher = fetcher.respond(&release.binary_url(*kind, platform()), NEW_BINARY);
        }
        Arc::new(fetcher)
    }

    fn source(fetcher: &Arc<MockFetcher>) -> HttpArtifactSource {
        HttpArtifactSource::new(fetcher.clone(), platform(), Duration::from_secs(1))
    }

    fn assert_no_backups(layout: &InstallationLayout) {
        for kind in ProcessKind::ALL {
            assert!(!layout.binary_backup(kind).exists(), "{kind} backup left behind");
        }
        assert!(!layout.upgrade_marker().exists());
    }

    fn contents(path: &Path) -> Vec<u8> {
        fs::read(path).unwrap()
    }

    #[test]
    fn test_second_download_failure_restores_all_originals() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Stopped);
        let target = release("v2.0.0");
        let fetcher = serving(&target, &[ProcessKind::Execution, ProcessKind::Consensus]);

        let err = upgrade_binaries(&layout, &target, &source(&fetcher)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpgradeDownloadFailed);
        assert!(err.to_string().contains("bridged"), "{err}");

        for kind in ProcessKind::ALL {
            assert_eq!(contents(&layout.binary(kind)), format!("old-{kind}").as_bytes());
        }
        assert_no_backups(&layout);
        // Downloads stop at the first failure.
        let consensus_url = target.binary_url(ProcessKind::Consensus, platform());
        assert!(!fetcher.calls().contains(&consensus_url));
    }

    #[test]
    fn test_successful_upgrade_replaces_all_binaries() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Stopped);
        let target = release("v2.0.0");
        let fetcher = serving(&target, &ProcessKind::ALL);

        upgrade_binaries(&layout, &target, &source(&fetcher)).unwrap();
        for kind in ProcessKind::ALL {
            assert_eq!(contents(&layout.binary(kind)), NEW_BINARY);
        }
        assert_no_backups(&layout);
    }

    #[test]
    fn test_failure_removes_binaries_that_did_not_exist_before() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Stopped);
        fs::remove_file(layout.binary(ProcessKind::Execution)).unwrap();
        let target = release("v2.0.0");
        let fetcher = serving(&target, &[ProcessKind::Execution]);

        upgrade_binaries(&layout, &target, &source(&fetcher)).unwrap_err();
        assert!(!layout.binary(ProcessKind::Execution).exists());
        assert_eq!(contents(&layout.binary(ProcessKind::Bridge)), b"old-bridge");
        assert_no_backups(&layout);
    }

    #[test]
    fn test_interrupted_upgrade_is_rolled_back() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Stopped);
        UpgradeMarker {
            to_version: "v2.0.0".to_string(),
            originals: ProcessKind::ALL.to_vec(),
            started_at: Utc::now(),
        }
        .save(&layout)
        .unwrap();
        // Crash after the execution binary was replaced and the bridge moved.
        let exec = layout.binary(ProcessKind::Execution);
        let bridge = layout.binary(ProcessKind::Bridge);
        fs::rename(&exec, layout.binary_backup(ProcessKind::Execution)).unwrap();
        fs::write(&exec, NEW_BINARY).unwrap();
        fs::rename(&bridge, layout.binary_backup(ProcessKind::Bridge)).unwrap();

        assert!(recover_interrupted_upgrade(&layout).unwrap());
        for kind in ProcessKind::ALL {
            assert_eq!(contents(&layout.binary(kind)), format!("old-{kind}").as_bytes());
        }
        assert_no_backups(&layout);
        assert!(!recover_interrupted_upgrade(&layout).unwrap());
    }

    fn config(version: &str) -> BootstrapConfig {
        let mut config = BootstrapConfig {
            role: NodeRole::Rpc,
            ..BootstrapConfig::default()
        };
        config.release.version = version.to_string();
        config.release.image_registry = "ghcr.io/acme".to_string();
        config.timeouts.stop_grace = Duration::from_secs(1);
        config
    }

    #[test]
    fn test_upgrade_records_new_version_and_stays_stopped() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Stopped);
        let fetcher = serving(&release("v2.0.0"), &ProcessKind::ALL);

        let outcome = upgrade(
            &layout,
            &config("v2.0.0"),
            fetcher.as_ref(),
            &source(&fetcher),
            &FakeEngine::default(),
        )
        .unwrap();
        assert!(outcome.changed);
        assert!(!outcome.restarted);
        assert_eq!(outcome.from_version, "v1.0.0");

        let record = require_record(&layout).unwrap();
        assert_eq!(record.version, "v2.0.0");
        assert_eq!(record.state, LifecycleState::Stopped);
    }

    #[test]
    fn test_failed_upgrade_keeps_version() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Running);
        let fetcher = serving(&release("v2.0.0"), &[ProcessKind::Execution]);

        let err = upgrade(
            &layout,
            &config("v2.0.0"),
            fetcher.as_ref(),
            &source(&fetcher),
            &FakeEngine::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpgradeDownloadFailed);

        let record = require_record(&layout).unwrap();
        assert_eq!(record.version, "v1.0.0");
        assert_eq!(record.state, LifecycleState::Stopped);
    }

    #[test]
    fn test_same_version_is_noop() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Stopped);
        let fetcher = Arc::new(MockFetcher::new());

        let outcome = upgrade(
            &layout,
            &config("v1.0.0"),
            fetcher.as_ref(),
            &source(&fetcher),
            &FakeEngine::default(),
        )
        .unwrap();
        assert!(!outcome.changed);
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn test_never_started_installation_is_rejected() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Provisioned);
        let fetcher = Arc::new(MockFetcher::new());

        let err = upgrade(
            &layout,
            &config("v2.0.0"),
            fetcher.as_ref(),
            &source(&fetcher),
            &FakeEngine::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    const MANIFEST: &str = "\
services:
  bridge:
    image: ghcr.io/acme/bridged:v1.0.0
  consensus:
    image: ghcr.io/acme/consensusd:v1.0.0
  execution:
    image: ghcr.io/acme/executiond:v1.0.0
  metrics:
    image: ghcr.io/acme/executiond-exporter:v1.0.0
";

    #[test]
    fn test_container_pull_failure_leaves_manifest_untouched() {
        let (_dir, layout) = installed(DeployMode::Container, LifecycleState::Running);
        fs::write(layout.compose_manifest(), MANIFEST).unwrap();
        let engine = FakeEngine {
            fail_pull: Some("ghcr.io/acme/bridged:v2.0.0".to_string()),
            ..FakeEngine::default()
        };
        let fetcher = Arc::new(MockFetcher::new());

        let err = upgrade(
            &layout,
            &config("v2.0.0"),
            fetcher.as_ref(),
            &source(&fetcher),
            &engine,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpgradeDownloadFailed);
        assert_eq!(fs::read_to_string(layout.compose_manifest()).unwrap(), MANIFEST);
        assert!(!engine.calls().iter().any(|c| c.starts_with("up")));

        let record = require_record(&layout).unwrap();
        assert_eq!(record.state, LifecycleState::Running);
        assert_eq!(record.version, "v1.0.0");
    }

    #[test]
    fn test_container_upgrade_rewrites_tags_and_recreates() {
        let (_dir, layout) = installed(DeployMode::Container, LifecycleState::Running);
        fs::write(layout.compose_manifest(), MANIFEST).unwrap();
        let engine = FakeEngine::default();
        let fetcher = Arc::new(MockFetcher::new());

        let outcome = upgrade(
            &layout,
            &config("v2.0.0"),
            fetcher.as_ref(),
            &source(&fetcher),
            &engine,
        )
        .unwrap();
        assert!(outcome.restarted);

        let manifest = fs::read_to_string(layout.compose_manifest()).unwrap();
        assert!(manifest.contains("ghcr.io/acme/executiond:v2.0.0"));
        assert!(manifest.contains("ghcr.io/acme/bridged:v2.0.0"));
        assert!(manifest.contains("ghcr.io/acme/consensusd:v2.0.0"));
        assert!(manifest.contains("ghcr.io/acme/executiond-exporter:v1.0.0"));

        assert_eq!(
            engine.calls(),
            [
                "check",
                "pull ghcr.io/acme/executiond:v2.0.0",
                "pull ghcr.io/acme/bridged:v2.0.0",
                "pull ghcr.io/acme/consensusd:v2.0.0",
                "up --force-recreate",
            ]
        );
        let record = require_record(&layout).unwrap();
        assert_eq!(record.state, LifecycleState::Running);
        assert_eq!(record.version, "v2.0.0");
    }

    #[test]
    fn test_container_upgrade_with_foreign_registry_is_rejected() {
        let (_dir, layout) = installed(DeployMode::Container, LifecycleState::Running);
        fs::write(layout.compose_manifest(), MANIFEST).unwrap();
        let mut config = config("v2.0.0");
        config.release.image_registry = "ghcr.io/other".to_string();
        let engine = FakeEngine::default();
        let fetcher = Arc::new(MockFetcher::new());

        let err = upgrade(&layout, &config, fetcher.as_ref(), &source(&fetcher), &engine)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert!(err.to_string().contains("ghcr.io/other/executiond"), "{err}");
        assert_eq!(fs::read_to_string(layout.compose_manifest()).unwrap(), MANIFEST);
        assert_eq!(engine.calls(), ["check"]);

        let record = require_record(&layout).unwrap();
        assert_eq!(record.state, LifecycleState::Running);
        assert_eq!(record.version, "v1.0.0");
    }

    #[test]
    fn test_missing_container_engine_fails_before_any_change() {
        let (_dir, layout) = installed(DeployMode::Container, LifecycleState::Running);
        fs::write(layout.compose_manifest(), MANIFEST).unwrap();
        let record_before = contents(&layout.record_file());
        let engine = FakeEngine {
            unavailable: true,
            ..FakeEngine::default()
        };
        let fetcher = Arc::new(MockFetcher::new());

        let err = upgrade(
            &layout,
            &config("v2.0.0"),
            fetcher.as_ref(),
            &source(&fetcher),
            &engine,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedEnvironment);
        assert!(fetcher.calls().is_empty());
        assert_eq!(engine.calls(), ["check"]);
        assert_eq!(contents(&layout.record_file()), record_before);
        assert_eq!(fs::read_to_string(layout.compose_manifest()).unwrap(), MANIFEST);
    }

    #[test]
    fn test_invalid_configuration_is_rejected_before_locking() {
        let (_dir, layout) = installed(DeployMode::Binary, LifecycleState::Stopped);
        let mut config = config("v2.0.0");
        config.readiness.max_attempts = 0;
        let fetcher = Arc::new(MockFetcher::new());

        let err = upgrade(
            &layout,
            &config,
            fetcher.as_ref(),
            &source(&fetcher),
            &FakeEngine::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert!(fetcher.calls().is_empty());
        assert!(!layout.lock_file().exists());
    }
}
