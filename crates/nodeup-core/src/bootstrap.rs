//! The install operation.
//!
//! Install is idempotent: each step checks what is already on disk and only
//! does the work that is missing. Re-running it on a complete installation
//! performs no network calls, regenerates nothing, and leaves every rendered
//! file byte-identical.
//!
//! Order:
//!
//! 1. pre-flight checks (configuration, platform, container engine)
//! 2. lock, record axes check, interrupted-upgrade recovery
//! 3. release pin (`install.json` until the record exists)
//! 4. binaries or images
//! 5. identity
//! 6. genesis
//! 7. rendered configuration
//! 8. installation record
//!
//! A first install that fails part-way leaves `install.json` behind. The
//! retry reuses the release recorded there, so binaries already on disk and
//! the version in the final record always agree.

use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::fs::{FILE_MODE, WriteOutcome, atomic_write, remove_if_exists};
use crate::genesis::{GenesisResolution, resolve_genesis};
use crate::http::HttpFetch;
use crate::identity::{
    ContainerKeyGenerator, IdentityReport, KeyGenerator, ProcessKeyGenerator, ensure_identity,
};
use crate::layout::InstallationLayout;
use crate::lifecycle::{ContainerEngine, reconcile_interrupted, recover_interrupted_upgrade};
use crate::lock::InstallLock;
use crate::platform::Platform;
use crate::process::ProcessKind;
use crate::release::{ArtifactSource, LazyRelease, ReleaseDescriptor};
use crate::render::{RenderContext, RenderedFile, render_all};
use crate::role::DeployMode;
use crate::state::{InstallationRecord, LifecycleState};

/// What an install run did.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Whether this run created the installation.
    pub first_install: bool,
    /// Installed release version.
    pub version: String,
    /// Binaries downloaded by this run.
    pub binaries_fetched: Vec<ProcessKind>,
    /// Images pulled by this run.
    pub images_pulled: Vec<String>,
    /// Identity files created by this run.
    pub identity: IdentityReport,
    /// Genesis provenance and warnings.
    pub genesis: GenesisResolution,
    /// Every rendered file.
    pub rendered: Vec<RenderedFile>,
}

impl InstallReport {
    /// Whether the run changed nothing on disk.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.first_install
            && self.binaries_fetched.is_empty()
            && self.images_pulled.is_empty()
            && self.identity.is_noop()
            && self
                .rendered
                .iter()
                .all(|f| f.outcome == WriteOutcome::Unchanged)
    }
}

/// Contents of `install.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct InstallMarker {
    version: String,
    started_at: DateTime<Utc>,
}

impl InstallMarker {
    fn load(layout: &InstallationLayout) -> Result<Option<Self>> {
        let path = layout.install_marker();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::serialization(path.display().to_string(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("failed to read install marker", &path, e)),
        }
    }

    fn save(&self, layout: &InstallationLayout) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|e| Error::serialization("install.json", e))?;
        atomic_write(&layout.install_marker(), &bytes, FILE_MODE)
    }
}

/// Provisions or re-provisions an installation.
pub struct Installer<'a> {
    layout: &'a InstallationLayout,
    config: &'a BootstrapConfig,
    fetcher: &'a dyn HttpFetch,
    artifacts: &'a dyn ArtifactSource,
    engine: &'a dyn ContainerEngine,
    key_generator: Option<&'a dyn KeyGenerator>,
}

impl<'a> Installer<'a> {
    /// Creates an installer. Keys are generated with the installed consensus
    /// binary (binary mode) or image (container mode) unless
    /// [`with_key_generator`](Self::with_key_generator) overrides it.
    #[must_use]
    pub fn new(
        layout: &'a InstallationLayout,
        config: &'a BootstrapConfig,
        fetcher: &'a dyn HttpFetch,
        artifacts: &'a dyn ArtifactSource,
        engine: &'a dyn ContainerEngine,
    ) -> Self {
        Self {
            layout,
            config,
            fetcher,
            artifacts,
            engine,
            key_generator: None,
        }
    }

    /// Uses `generator` for key generation.
    #[must_use]
    pub fn with_key_generator(mut self, generator: &'a dyn KeyGenerator) -> Self {
        self.key_generator = Some(generator);
        self
    }

    /// Runs the install.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedEnvironment` or `InvalidConfiguration` from
    /// pre-flight checks before anything is written, `LockHeld` if another
    /// invocation is running, and any error of the individual steps.
    pub fn install(&self) -> Result<InstallReport> {
        let (layout, config) = (self.layout, self.config);

        config.validate()?;
        let platform = Platform::detect()?;
        if config.mode == DeployMode::Container {
            self.engine.check_available()?;
        }
        info!(
            home = %layout.root().display(),
            role = %config.role,
            mode = %config.mode,
            %platform,
            "installing"
        );

        let _lock = InstallLock::acquire(layout)?;
        let mut existing = InstallationRecord::load(layout)?;
        if let Some(record) = &existing {
            record.check_axes(config.role, config.mode)?;
        }
        layout.materialize()?;
        match existing.as_mut() {
            Some(record) => reconcile_interrupted(layout, record)?,
            None => {
                recover_interrupted_upgrade(layout)?;
            },
        }

        let mut release = self.pin_release(existing.as_ref())?;

        let mut binaries_fetched = Vec::new();
        let mut images_pulled = Vec::new();
        match config.mode {
            DeployMode::Binary => {
                for kind in ProcessKind::ALL {
                    let target = layout.binary(kind);
                    if target.is_file() {
                        continue;
                    }
                    self.artifacts.fetch_binary(release.get()?, kind, &target)?;
                    binaries_fetched.push(kind);
                }
            },
            DeployMode::Container if existing.is_none() => {
                for kind in ProcessKind::ALL {
                    let image = release.get()?.image_ref(&config.release.image_registry, kind);
                    self.engine.pull(&image)?;
                    images_pulled.push(image);
                }
            },
            DeployMode::Container => {},
        }

        let identity = self.provision_identity(&mut release)?;
        let genesis = resolve_genesis(layout, config, self.fetcher, &mut release)?;
        let version = release.get()?.version.clone();

        let ctx = RenderContext::new(layout, config, &genesis.chain.chain_id, &version);
        let rendered = render_all(&ctx)?;

        let first_install = existing.is_none();
        self.save_record(existing, &genesis.chain.chain_id, &version)?;
        remove_if_exists(&layout.install_marker())?;

        let report = InstallReport {
            first_install,
            version,
            binaries_fetched,
            images_pulled,
            identity,
            genesis,
            rendered,
        };
        if report.is_noop() {
            info!("installation already complete, nothing changed");
        } else {
            info!(chain_id = %report.genesis.chain.chain_id, version = %report.version, "install complete");
        }
        Ok(report)
    }

    /// Chooses the release this run installs. An existing installation
    /// stays on its recorded version; moving it is the upgrade operation's
    /// job. An unfinished first install resumes with the release it started
    /// with. Otherwise the configured release is resolved now and recorded
    /// before anything is downloaded.
    fn pin_release(&self, existing: Option<&InstallationRecord>) -> Result<LazyRelease<'a>> {
        let (config, layout) = (self.config, self.layout);
        let timeout = config.timeouts.metadata;
        let pinned = |version: &str| {
            LazyRelease::pinned(
                &config.release,
                self.fetcher,
                timeout,
                ReleaseDescriptor::new(&config.release, version),
            )
        };

        if let Some(record) = existing {
            return Ok(pinned(&record.version));
        }
        if let Some(marker) = InstallMarker::load(layout)? {
            info!(
                version = %marker.version,
                started_at = %marker.started_at,
                "resuming unfinished install"
            );
            return Ok(pinned(&marker.version));
        }

        let mut release = LazyRelease::new(&config.release, self.fetcher, timeout);
        let version = release.get()?.version.clone();
        InstallMarker {
            version,
            started_at: Utc::now(),
        }
        .save(layout)?;
        Ok(release)
    }

    fn provision_identity(&self, release: &mut LazyRelease<'_>) -> Result<IdentityReport> {
        if let Some(generator) = self.key_generator {
            return ensure_identity(self.layout, generator);
        }
        match self.config.mode {
            DeployMode::Binary => {
                let generator = ProcessKeyGenerator::new(self.layout.binary(ProcessKind::Consensus));
                ensure_identity(self.layout, &generator)
            },
            DeployMode::Container => {
                let image = release
                    .get()?
                    .image_ref(&self.config.release.image_registry, ProcessKind::Consensus);
                let generator =
                    ContainerKeyGenerator::new(&self.config.release.container_engine, image);
                ensure_identity(self.layout, &generator)
            },
        }
    }

    fn save_record(
        &self,
        existing: Option<InstallationRecord>,
        chain_id: &str,
        version: &str,
    ) -> Result<()> {
        let record = match existing {
            Some(mut record) => {
                let before = record.clone();
                record.moniker.clone_from(&self.config.moniker);
                record.chain_id = chain_id.to_string();
                if record == before {
                    return Ok(());
                }
                record.updated_at = Utc::now();
                record
            },
            None => {
                let now = Utc::now();
                let mut record = InstallationRecord {
                    role: self.config.role,
                    mode: self.config.mode,
                    moniker: self.config.moniker.clone(),
                    chain_id: chain_id.to_string(),
                    version: version.to_string(),
                    state: LifecycleState::Uninstalled,
                    installed_at: now,
                    updated_at: now,
                };
                record.transition(LifecycleState::Provisioned)?;
                record
            },
        };
        record.save(self.layout)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;
    use crate::http::testing::MockFetcher;
    use crate::identity::testing::FakeKeyGenerator;
    use crate::lifecycle::testing::FakeEngine;
    use crate::release::HttpArtifactSource;
    use crate::role::NodeRole;
    use crate::state::require_record;

    const BINARY: &[u8] = b"\x7fELF\x02\x01\x01\x00binary";
    const EXEC_GENESIS: &str = r#"{"config":{"chainId":1337},"alloc":{}}"#;

    fn config(home: &std::path::Path, role: NodeRole, mode: DeployMode) -> BootstrapConfig {
        let mut config = BootstrapConfig {
            home: home.to_path_buf(),
            role,
            mode,
            moniker: "node-0".to_string(),
            chain_id: "devnet-1".to_string(),
            ..BootstrapConfig::default()
        };
        config.release.version = "v1.0.0".to_string();
        config
    }

    fn serving_release(config: &BootstrapConfig) -> MockFetcher {
        let release = ReleaseDescriptor::new(&config.release, config.release.version.as_str());
        let platform = Platform::detect().unwrap();
        let mut fetcher =
            MockFetcher::new().respond(&release.execution_genesis_url(), EXEC_GENESIS);
        for kind in ProcessKind::ALL {
            fetcher = fetcher.respond(&release.binary_url(kind, platform), BINARY);
        }
        fetcher
    }

    fn install(
        layout: &InstallationLayout,
        config: &BootstrapConfig,
        fetcher: MockFetcher,
        engine: &FakeEngine,
    ) -> (Result<InstallReport>, Vec<String>) {
        let fetcher = std::sync::Arc::new(fetcher);
        let artifacts = HttpArtifactSource::new(
            fetcher.clone(),
            Platform::detect().unwrap(),
            Duration::from_secs(1),
        );
        let keys = FakeKeyGenerator::default();
        let result = Installer::new(layout, config, fetcher.as_ref(), &artifacts, engine)
            .with_key_generator(&keys)
            .install();
        (result, fetcher.calls())
    }

    #[test]
    fn test_first_install_provisions_everything() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        let config = config(dir.path(), NodeRole::Validator, DeployMode::Binary);

        let (result, _) = install(&layout, &config, serving_release(&config), &FakeEngine::default());
        let report = result.unwrap();
        assert!(report.first_install);
        assert_eq!(report.binaries_fetched, ProcessKind::ALL);
        assert!(report.identity.keys_generated);
        assert_eq!(report.genesis.chain.chain_id, "devnet-1");

        for kind in ProcessKind::ALL {
            assert_eq!(fs::read(layout.binary(kind)).unwrap(), BINARY);
        }
        assert!(layout.consensus_config().is_file());
        assert!(layout.start_script().is_file());
        assert!(!layout.compose_manifest().exists());

        let record = require_record(&layout).unwrap();
        assert_eq!(record.state, LifecycleState::Provisioned);
        assert_eq!(record.version, "v1.0.0");
        assert_eq!(record.chain_id, "devnet-1");
    }

    #[test]
    fn test_reinstall_is_noop_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        let config = config(dir.path(), NodeRole::Sentry, DeployMode::Binary);
        let engine = FakeEngine::default();

        install(&layout, &config, serving_release(&config), &engine).0.unwrap();
        let key = fs::read(layout.validator_key()).unwrap();
        let genesis = fs::read(layout.consensus_genesis()).unwrap();
        let record = fs::read(layout.record_file()).unwrap();

        let (result, calls) = install(&layout, &config, MockFetcher::new(), &engine);
        let report = result.unwrap();
        assert!(report.is_noop(), "{report:?}");
        assert!(calls.is_empty(), "{calls:?}");
        assert_eq!(fs::read(layout.validator_key()).unwrap(), key);
        assert_eq!(fs::read(layout.consensus_genesis()).unwrap(), genesis);
        assert_eq!(fs::read(layout.record_file()).unwrap(), record);
    }

    #[test]
    fn test_role_change_is_rejected_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        let first = config(dir.path(), NodeRole::Rpc, DeployMode::Binary);
        install(&layout, &first, serving_release(&first), &FakeEngine::default())
            .0
            .unwrap();
        let consensus_config = fs::read(layout.consensus_config()).unwrap();

        let second = config(dir.path(), NodeRole::Archive, DeployMode::Binary);
        let (result, calls) = install(&layout, &second, MockFetcher::new(), &FakeEngine::default());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidConfiguration);
        assert!(calls.is_empty());
        assert_eq!(fs::read(layout.consensus_config()).unwrap(), consensus_config);
    }

    #[test]
    fn test_missing_container_engine_fails_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path().join("node"));
        let config = config(layout.root(), NodeRole::Rpc, DeployMode::Container);
        let engine = FakeEngine {
            unavailable: true,
            ..FakeEngine::default()
        };

        let (result, _) = install(&layout, &config, serving_release(&config), &engine);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UnsupportedEnvironment);
        assert!(!layout.root().exists());
    }

    #[test]
    fn test_container_install_pulls_images_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        let mut config = config(dir.path(), NodeRole::Rpc, DeployMode::Container);
        config.release.image_registry = "ghcr.io/acme".to_string();
        let engine = FakeEngine::default();

        let report = install(&layout, &config, serving_release(&config), &engine)
            .0
            .unwrap();
        assert_eq!(
            report.images_pulled,
            [
                "ghcr.io/acme/executiond:v1.0.0",
                "ghcr.io/acme/bridged:v1.0.0",
                "ghcr.io/acme/consensusd:v1.0.0",
            ]
        );
        assert!(report.binaries_fetched.is_empty());
        assert!(layout.compose_manifest().is_file());

        let report = install(&layout, &config, MockFetcher::new(), &engine).0.unwrap();
        assert!(report.images_pulled.is_empty());
        assert!(report.is_noop());
    }

    #[test]
    fn test_concurrent_install_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        let config = config(dir.path(), NodeRole::Rpc, DeployMode::Binary);
        let _held = InstallLock::acquire(&layout).unwrap();

        let (result, calls) = install(&layout, &config, serving_release(&config), &FakeEngine::default());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::LockHeld);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_failed_binary_download_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        let config = config(dir.path(), NodeRole::Rpc, DeployMode::Binary);

        let (result, _) = install(&layout, &config, MockFetcher::new(), &FakeEngine::default());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ArtifactFetchFailed);
        assert!(!layout.record_file().exists());
    }

    #[test]
    fn test_retry_after_failed_first_install_keeps_started_release() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        let mut config = config(dir.path(), NodeRole::Validator, DeployMode::Binary);
        config.release.version = "latest".to_string();
        let latest_url = crate::http::join_url(
            &config.release.api_url,
            &format!("repos/{}/releases/latest", config.release.repository),
        );
        let platform = Platform::detect().unwrap();
        let v1 = ReleaseDescriptor::new(&config.release, "v1.0.0");
        let v2 = ReleaseDescriptor::new(&config.release, "v2.0.0");

        // Binaries arrive, the execution genesis does not.
        let mut first = MockFetcher::new().respond(&latest_url, r#"{"tag_name":"v1.0.0"}"#);
        for kind in ProcessKind::ALL {
            first = first.respond(&v1.binary_url(kind, platform), BINARY);
        }
        let (result, _) = install(&layout, &config, first, &FakeEngine::default());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::GenesisFetchFailed);
        assert!(!layout.record_file().exists());
        assert!(!layout.consensus_genesis().exists());
        assert!(layout.install_marker().is_file());

        // Meanwhile a newer release was published.
        let second = MockFetcher::new()
            .respond(&latest_url, r#"{"tag_name":"v2.0.0"}"#)
            .respond(&v1.execution_genesis_url(), EXEC_GENESIS)
            .respond(&v2.execution_genesis_url(), EXEC_GENESIS);
        let (result, calls) = install(&layout, &config, second, &FakeEngine::default());
        let report = result.unwrap();
        assert_eq!(report.version, "v1.0.0");
        assert!(report.binaries_fetched.is_empty());
        assert!(!calls.contains(&latest_url), "{calls:?}");
        assert_eq!(require_record(&layout).unwrap().version, "v1.0.0");
        assert!(!layout.install_marker().exists());
    }
}
