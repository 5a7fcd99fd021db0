//! Host platform detection.
//!
//! Resolves the running OS and CPU architecture to an entry of the release
//! build matrix. Anything outside the matrix is rejected before the
//! installation directory is touched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Operating systems with published release artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Linux (ELF binaries).
    Linux,
    /// macOS (Mach-O binaries).
    Darwin,
}

impl Os {
    /// Name used in artifact file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
        }
    }
}

/// CPU architectures with published release artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86-64.
    Amd64,
    /// 64-bit ARM.
    Arm64,
}

impl Arch {
    /// Name used in artifact file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

/// A supported (OS, architecture) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system.
    pub os: Os,
    /// CPU architecture.
    pub arch: Arch,
}

impl Platform {
    /// Probes the host this binary was compiled for.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedEnvironment` if the host is outside the build
    /// matrix.
    pub fn detect() -> Result<Self> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Maps Rust's `std::env::consts` naming onto the build matrix.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedEnvironment` for any unknown OS or architecture.
    pub fn from_parts(os: &str, arch: &str) -> Result<Self> {
        let os = match os {
            "linux" => Os::Linux,
            "macos" | "darwin" => Os::Darwin,
            other => {
                return Err(Error::UnsupportedEnvironment(format!(
                    "operating system '{other}' has no release artifacts (supported: linux, darwin)"
                )));
            },
        };
        let arch = match arch {
            "x86_64" | "amd64" => Arch::Amd64,
            "aarch64" | "arm64" => Arch::Arm64,
            other => {
                return Err(Error::UnsupportedEnvironment(format!(
                    "architecture '{other}' has no release artifacts (supported: amd64, arm64)"
                )));
            },
        };
        Ok(Self { os, arch })
    }

    /// Suffix appended to artifact names, e.g. `linux-amd64`.
    #[must_use]
    pub fn artifact_suffix(self) -> String {
        format!("{}-{}", self.os.as_str(), self.arch.as_str())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os.as_str(), self.arch.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_supported_matrix() {
        let p = Platform::from_parts("linux", "x86_64").unwrap();
        assert_eq!(p.artifact_suffix(), "linux-amd64");

        let p = Platform::from_parts("macos", "aarch64").unwrap();
        assert_eq!(p.artifact_suffix(), "darwin-arm64");
        assert_eq!(p.to_string(), "darwin/arm64");
    }

    #[test]
    fn test_unsupported_os() {
        let err = Platform::from_parts("windows", "x86_64").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedEnvironment);
        assert!(err.to_string().contains("windows"));
    }

    #[test]
    fn test_unsupported_arch() {
        let err = Platform::from_parts("linux", "riscv64").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedEnvironment);
    }
}
