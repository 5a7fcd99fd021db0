//! Managed process definitions.
//!
//! A node is three processes with a fixed startup order: the execution
//! engine, the bridge, then the consensus engine. [`ProcessSpec`] is the
//! fully-resolved launch description the supervisor consumes; it is derived
//! from rendered configuration, never from the role directly.

pub mod signal;
pub mod spawner;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::layout::InstallationLayout;
use crate::readiness::Probe;

/// The three managed processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// Applies ordered transactions to state; serves the Engine API.
    Execution,
    /// Translates consensus commits into Engine API calls.
    Bridge,
    /// BFT agreement engine.
    Consensus,
}

impl ProcessKind {
    /// All processes in startup order.
    pub const ALL: [Self; 3] = [Self::Execution, Self::Bridge, Self::Consensus];

    /// Short identifier used for directories and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Bridge => "bridge",
            Self::Consensus => "consensus",
        }
    }

    /// File name of the binary under `bin/` and of the release artifact.
    #[must_use]
    pub const fn binary_name(self) -> &'static str {
        match self {
            Self::Execution => "executiond",
            Self::Bridge => "bridged",
            Self::Consensus => "consensusd",
        }
    }

    /// Service name in the container manifest.
    #[must_use]
    pub const fn service_name(self) -> &'static str {
        self.as_str()
    }

    /// Arguments the process is launched with, identical in both deploy
    /// modes.
    #[must_use]
    pub fn launch_args(self, layout: &InstallationLayout) -> Vec<String> {
        let path = match self {
            Self::Execution => layout.execution_config(),
            Self::Bridge => layout.bridge_config(),
            Self::Consensus => {
                return vec![
                    "start".to_string(),
                    "--home".to_string(),
                    layout.consensus_home().display().to_string(),
                ];
            },
        };
        vec!["--config".to_string(), path.display().to_string()]
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from spawning or signalling a single process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The process could not be spawned.
    #[error("failed to spawn: {0}")]
    SpawnFailed(String),

    /// The log file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Signal delivery failed.
    #[error("failed to signal pid {pid}: {reason}")]
    Signal {
        /// Target pid.
        pid: u32,
        /// Reason.
        reason: String,
    },
}

/// Launch description for one managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Which process this is.
    pub kind: ProcessKind,
    /// Executable path.
    pub command: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// File receiving stdout and stderr; inherited when `None`.
    pub log_file: Option<PathBuf>,
    /// Readiness probe gating the next process in startup order.
    pub readiness: Option<Probe>,
}

impl ProcessSpec {
    /// Creates a builder for a process of the given kind.
    #[must_use]
    pub fn builder(kind: ProcessKind) -> ProcessSpecBuilder {
        ProcessSpecBuilder::new(kind)
    }
}

/// Builder for [`ProcessSpec`].
#[derive(Debug, Clone)]
pub struct ProcessSpecBuilder {
    spec: ProcessSpec,
}

impl ProcessSpecBuilder {
    /// Creates a builder whose command defaults to the process binary name.
    #[must_use]
    pub fn new(kind: ProcessKind) -> Self {
        Self {
            spec: ProcessSpec {
                kind,
                command: PathBuf::from(kind.binary_name()),
                args: Vec::new(),
                cwd: None,
                env: BTreeMap::new(),
                log_file: None,
                readiness: None,
            },
        }
    }

    /// Sets the executable.
    #[must_use]
    pub fn command(mut self, command: impl Into<PathBuf>) -> Self {
        self.spec.command = command.into();
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.spec.cwd = Some(cwd.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    /// Redirects output to a log file.
    #[must_use]
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec.log_file = Some(path.into());
        self
    }

    /// Sets the readiness probe.
    #[must_use]
    pub fn readiness(mut self, probe: Probe) -> Self {
        self.spec.readiness = Some(probe);
        self
    }

    /// Finishes the spec.
    #[must_use]
    pub fn build(self) -> ProcessSpec {
        self.spec
    }
}
