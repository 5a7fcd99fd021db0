//! Error taxonomy for nodeup operations.
//!
//! Every fatal path in install, start, stop and upgrade surfaces one of these
//! variants. Recoverable conditions (identity already present, genesis already
//! present, peer unreachable) never become errors; they are logged and the
//! operation continues.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout `nodeup-core`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of an [`Error`], stable across variants that carry
/// different payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Host platform, container runtime or mode unsupported.
    UnsupportedEnvironment,
    /// Operator-supplied configuration is invalid or conflicts with the
    /// recorded installation.
    InvalidConfiguration,
    /// A required binary or image could not be retrieved.
    ArtifactFetchFailed,
    /// No release version could be resolved.
    NoReleaseFound,
    /// An explicitly configured genesis source failed.
    GenesisFetchFailed,
    /// A genesis document did not parse.
    InvalidGenesisFormat,
    /// An upgrade download failed and the binary set was rolled back.
    UpgradeDownloadFailed,
    /// Key generation failed.
    IdentityProvisioningFailed,
    /// A managed process failed to start, exited early, or could not be
    /// signalled.
    ProcessFailed,
    /// A managed process never became ready.
    NotReady,
    /// Another invocation holds the installation lock.
    LockHeld,
    /// Filesystem failure.
    Io,
    /// Serialization or deserialization failure of an owned artifact.
    Serialization,
}

/// Errors emitted by nodeup operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Host platform, container runtime or deploy mode is unsupported.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A required artifact could not be fetched.
    #[error("failed to fetch {artifact}: {reason}")]
    ArtifactFetchFailed {
        /// Artifact name (binary, image, or document).
        artifact: String,
        /// Underlying cause.
        reason: String,
    },

    /// No release could be resolved and no fallback was configured.
    #[error("no release found: {0}")]
    NoReleaseFound(String),

    /// Explicit genesis source failed.
    #[error("failed to fetch genesis from {url}: {reason}")]
    GenesisFetchFailed {
        /// Source URL.
        url: String,
        /// Underlying cause.
        reason: String,
    },

    /// Genesis document is malformed.
    #[error("invalid genesis format in {source_desc}: {reason}")]
    InvalidGenesisFormat {
        /// Where the document came from.
        source_desc: String,
        /// Parse failure detail.
        reason: String,
    },

    /// Upgrade download failed; original binaries were restored.
    #[error("upgrade download failed for {artifact}: {reason} (original binaries restored)")]
    UpgradeDownloadFailed {
        /// First artifact that failed.
        artifact: String,
        /// Underlying cause.
        reason: String,
    },

    /// Key generation failed.
    #[error("identity provisioning failed: {0}")]
    IdentityProvisioningFailed(String),

    /// A managed process failed.
    #[error("process {process}: {reason}")]
    ProcessFailed {
        /// Process name.
        process: String,
        /// What went wrong.
        reason: String,
    },

    /// A managed process never passed its readiness probe.
    #[error("{process} not ready after {attempts} attempts: {last_error}")]
    NotReady {
        /// Process name.
        process: String,
        /// Number of probe attempts made.
        attempts: u32,
        /// Last probe failure.
        last_error: String,
    },

    /// Installation lock is held by another invocation.
    #[error("installation at {0} is locked by another nodeup invocation")]
    LockHeld(PathBuf),

    /// Filesystem error with path context.
    #[error("{context} {}: {source}", path.display())]
    Io {
        /// Operation being performed.
        context: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Serialization of an owned artifact failed.
    #[error("failed to serialize {artifact}: {reason}")]
    Serialization {
        /// Artifact being serialized.
        artifact: String,
        /// Underlying cause.
        reason: String,
    },
}

impl Error {
    /// Builds an [`Error::Io`] with path context.
    pub fn io(context: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Builds an [`Error::Serialization`].
    pub fn serialization(artifact: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedEnvironment(_) => ErrorKind::UnsupportedEnvironment,
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::ArtifactFetchFailed { .. } => ErrorKind::ArtifactFetchFailed,
            Self::NoReleaseFound(_) => ErrorKind::NoReleaseFound,
            Self::GenesisFetchFailed { .. } => ErrorKind::GenesisFetchFailed,
            Self::InvalidGenesisFormat { .. } => ErrorKind::InvalidGenesisFormat,
            Self::UpgradeDownloadFailed { .. } => ErrorKind::UpgradeDownloadFailed,
            Self::IdentityProvisioningFailed(_) => ErrorKind::IdentityProvisioningFailed,
            Self::ProcessFailed { .. } => ErrorKind::ProcessFailed,
            Self::NotReady { .. } => ErrorKind::NotReady,
            Self::LockHeld(_) => ErrorKind::LockHeld,
            Self::Io { .. } => ErrorKind::Io,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_path() {
        let err = Error::io(
            "failed to read",
            "/tmp/nodeup/genesis.json",
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
        let msg = err.to_string();
        assert!(msg.contains("/tmp/nodeup/genesis.json"), "{msg}");
        assert!(msg.contains("missing"), "{msg}");
    }

    #[test]
    fn test_kind_mapping() {
        let err = Error::UpgradeDownloadFailed {
            artifact: "bridged".to_string(),
            reason: "HTTP 404".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::UpgradeDownloadFailed);
        assert!(err.to_string().contains("original binaries restored"));
    }
}
