//! Release resolution and artifact retrieval.
//!
//! A release is identified by a tag. `latest` is resolved through the
//! release metadata API once per invocation; when that fails a configured
//! fallback tag is used instead. Artifacts for a release live under
//! `<artifact_base_url>/download/<version>/`:
//!
//! ```text
//! executiond-linux-amd64
//! bridged-linux-amd64
//! consensusd-linux-amd64
//! genesis.json            execution-layer genesis for the network
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{LATEST, ReleaseConfig};
use crate::error::{Error, Result};
use crate::fs::{EXEC_MODE, atomic_write};
use crate::http::{HttpFetch, join_url};
use crate::platform::{Os, Platform};
use crate::process::ProcessKind;

/// A resolved release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Concrete release tag, never `latest`.
    pub version: String,
    /// Base URL holding this release's artifacts.
    pub artifact_base_url: String,
}

impl ReleaseDescriptor {
    /// Builds a descriptor for `version` under the configured download base.
    #[must_use]
    pub fn new(config: &ReleaseConfig, version: impl Into<String>) -> Self {
        let version = version.into();
        let artifact_base_url = join_url(
            &config.artifact_base_url,
            &format!("download/{version}"),
        );
        Self {
            version,
            artifact_base_url,
        }
    }

    /// Download URL of a process binary for `platform`.
    #[must_use]
    pub fn binary_url(&self, kind: ProcessKind, platform: Platform) -> String {
        join_url(
            &self.artifact_base_url,
            &format!("{}-{}", kind.binary_name(), platform.artifact_suffix()),
        )
    }

    /// Default execution-layer genesis URL.
    #[must_use]
    pub fn execution_genesis_url(&self) -> String {
        join_url(&self.artifact_base_url, "genesis.json")
    }

    /// Container image reference of a process for this release.
    #[must_use]
    pub fn image_ref(&self, registry: &str, kind: ProcessKind) -> String {
        format!("{}:{}", image_name(registry, kind), self.version)
    }
}

/// Image reference without tag, `<registry>/<binary>`.
#[must_use]
pub fn image_name(registry: &str, kind: ProcessKind) -> String {
    format!("{}/{}", registry.trim_end_matches('/'), kind.binary_name())
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

/// Resolves the configured version to a concrete release.
///
/// # Errors
///
/// Returns `NoReleaseFound` when `latest` cannot be resolved and no fallback
/// tag is configured.
pub fn resolve_release(
    config: &ReleaseConfig,
    fetcher: &dyn HttpFetch,
    timeout: Duration,
) -> Result<ReleaseDescriptor> {
    let requested = config.version.trim();
    if !requested.eq_ignore_ascii_case(LATEST) {
        debug!(version = requested, "using explicit release version");
        return Ok(ReleaseDescriptor::new(config, requested));
    }

    let url = join_url(
        &config.api_url,
        &format!("repos/{}/releases/latest", config.repository),
    );
    let failure = match fetcher.get(&url, timeout) {
        Ok(body) => match serde_json::from_slice::<LatestRelease>(&body) {
            Ok(latest) if !latest.tag_name.trim().is_empty() => {
                info!(version = %latest.tag_name, "resolved latest release");
                return Ok(ReleaseDescriptor::new(config, latest.tag_name.trim()));
            },
            Ok(_) => "release metadata has an empty tag_name".to_string(),
            Err(e) => format!("malformed release metadata: {e}"),
        },
        Err(e) => e.to_string(),
    };

    match &config.fallback_version {
        Some(fallback) => {
            warn!(%url, error = %failure, %fallback, "could not resolve latest release, using fallback");
            Ok(ReleaseDescriptor::new(config, fallback.as_str()))
        },
        None => Err(Error::NoReleaseFound(format!(
            "{url}: {failure} (set release.fallback_version to pin a tag)"
        ))),
    }
}

/// Resolves the release on first use and caches it for the rest of the
/// invocation.
pub struct LazyRelease<'a> {
    config: &'a ReleaseConfig,
    fetcher: &'a dyn HttpFetch,
    timeout: Duration,
    resolved: Option<ReleaseDescriptor>,
}

impl<'a> LazyRelease<'a> {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(config: &'a ReleaseConfig, fetcher: &'a dyn HttpFetch, timeout: Duration) -> Self {
        Self {
            config,
            fetcher,
            timeout,
            resolved: None,
        }
    }

    /// Creates a handle already resolved to `release`, e.g. the version an
    /// installation records.
    #[must_use]
    pub fn pinned(
        config: &'a ReleaseConfig,
        fetcher: &'a dyn HttpFetch,
        timeout: Duration,
        release: ReleaseDescriptor,
    ) -> Self {
        Self {
            config,
            fetcher,
            timeout,
            resolved: Some(release),
        }
    }

    /// Returns the release, resolving it on first call.
    ///
    /// # Errors
    ///
    /// Propagates [`resolve_release`] failures.
    pub fn get(&mut self) -> Result<&ReleaseDescriptor> {
        let release = match self.resolved.take() {
            Some(release) => release,
            None => resolve_release(self.config, self.fetcher, self.timeout)?,
        };
        Ok(self.resolved.insert(release))
    }

    /// The release if it was resolved during this invocation.
    #[must_use]
    pub const fn resolved(&self) -> Option<&ReleaseDescriptor> {
        self.resolved.as_ref()
    }
}

/// Places release binaries on disk.
pub trait ArtifactSource: Send + Sync {
    /// Downloads the binary for `kind` and writes it to `target` with mode
    /// 0755. `target` is either fully written or untouched.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactFetchFailed` if retrieval or validation fails.
    fn fetch_binary(&self, release: &ReleaseDescriptor, kind: ProcessKind, target: &Path)
    -> Result<()>;
}

/// Downloads binaries over HTTP for a fixed platform.
#[derive(Clone)]
pub struct HttpArtifactSource {
    fetcher: Arc<dyn HttpFetch>,
    platform: Platform,
    timeout: Duration,
}

impl HttpArtifactSource {
    /// Creates a source downloading `platform` builds with a per-artifact
    /// `timeout`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn HttpFetch>, platform: Platform, timeout: Duration) -> Self {
        Self {
            fetcher,
            platform,
            timeout,
        }
    }
}

impl ArtifactSource for HttpArtifactSource {
    fn fetch_binary(
        &self,
        release: &ReleaseDescriptor,
        kind: ProcessKind,
        target: &Path,
    ) -> Result<()> {
        let url = release.binary_url(kind, self.platform);
        let failed = |reason: String| Error::ArtifactFetchFailed {
            artifact: kind.binary_name().to_string(),
            reason,
        };

        info!(binary = kind.binary_name(), %url, "downloading binary");
        let body = self
            .fetcher
            .get(&url, self.timeout)
            .map_err(|e| failed(format!("{url}: {e}")))?;
        validate_binary(&body, self.platform.os).map_err(|e| failed(format!("{url}: {e}")))?;

        atomic_write(target, &body, EXEC_MODE)?;
        debug!(path = %target.display(), bytes = body.len(), "binary installed");
        Ok(())
    }
}

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const MACHO_MAGICS: [[u8; 4]; 5] = [
    [0xfe, 0xed, 0xfa, 0xce],
    [0xfe, 0xed, 0xfa, 0xcf],
    [0xce, 0xfa, 0xed, 0xfe],
    [0xcf, 0xfa, 0xed, 0xfe],
    [0xca, 0xfe, 0xba, 0xbe],
];

/// Rejects bodies that cannot be an executable for `os`.
///
/// # Errors
///
/// Returns a description of why the body was rejected.
pub fn validate_binary(body: &[u8], os: Os) -> std::result::Result<(), String> {
    if body.is_empty() {
        return Err("downloaded file is empty".to_string());
    }

    let head = String::from_utf8_lossy(&body[..body.len().min(512)]).to_ascii_lowercase();
    if head.trim_start().starts_with("<!doctype") || head.contains("<html") {
        return Err("downloaded file is an HTML page, not a binary".to_string());
    }

    let magic_ok = body.len() >= 4 && {
        let magic = [body[0], body[1], body[2], body[3]];
        match os {
            Os::Linux => magic == ELF_MAGIC,
            Os::Darwin => MACHO_MAGICS.contains(&magic),
        }
    };
    if !magic_ok {
        return Err(format!("downloaded file is not a {} executable", os.as_str()));
    }
    Ok(())
}
