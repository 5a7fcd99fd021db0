//! Configuration rendering.
//!
//! Every artifact is built from typed structs and serialized with ordered
//! maps, so identical inputs yield identical bytes. Files are only rewritten
//! when their bytes change. Role-dependent values come exclusively from
//! [`RoleConfiguration`].
//!
//! Paths inside rendered files are absolute. In container mode the
//! installation root is bind-mounted at the same path, so the same files work
//! for both deploy modes; only the addresses processes use to reach each
//! other differ.

mod compose;
mod consensus;
mod node;
mod scripts;

use std::path::PathBuf;

use tracing::{debug, info};

pub use self::compose::render_compose;
pub use self::consensus::render_consensus_config;
pub use self::node::{render_bridge_config, render_execution_config};
pub use self::scripts::{render_env_file, render_start_script, render_stop_script};
use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::fs::{EXEC_MODE, FILE_MODE, WriteOutcome, write_if_changed};
use crate::layout::InstallationLayout;
use crate::process::ProcessKind;
use crate::role::{DeployMode, RoleConfiguration};

/// Inputs shared by every renderer.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    /// Installation paths.
    pub layout: &'a InstallationLayout,
    /// Operator configuration.
    pub config: &'a BootstrapConfig,
    /// Role-derived policy.
    pub role: RoleConfiguration,
    /// Chain id agreed through genesis resolution.
    pub chain_id: &'a str,
    /// Installed release version, used for image tags.
    pub version: &'a str,
}

impl<'a> RenderContext<'a> {
    /// Builds a context; the role policy is derived from `config.role`.
    #[must_use]
    pub fn new(
        layout: &'a InstallationLayout,
        config: &'a BootstrapConfig,
        chain_id: &'a str,
        version: &'a str,
    ) -> Self {
        Self {
            layout,
            config,
            role: RoleConfiguration::for_role(config.role),
            chain_id,
            version,
        }
    }

    /// Host a process uses to reach `kind`.
    #[must_use]
    pub fn host_of(&self, kind: ProcessKind) -> &'static str {
        match self.config.mode {
            DeployMode::Binary => "127.0.0.1",
            DeployMode::Container => kind.service_name(),
        }
    }

    /// Address internal listeners bind to.
    #[must_use]
    pub const fn bind_host(&self) -> &'static str {
        match self.config.mode {
            DeployMode::Binary => "127.0.0.1",
            DeployMode::Container => "0.0.0.0",
        }
    }
}

/// One rendered file and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// Target path.
    pub path: PathBuf,
    /// Whether the bytes changed.
    pub outcome: WriteOutcome,
}

/// Renders and writes every artifact for the configured mode.
///
/// # Errors
///
/// Returns a serialization or I/O error.
pub fn render_all(ctx: &RenderContext<'_>) -> Result<Vec<RenderedFile>> {
    let layout = ctx.layout;
    let mut files = vec![
        (layout.consensus_config(), render_consensus_config(ctx)?, FILE_MODE),
        (layout.bridge_config(), render_bridge_config(ctx)?, FILE_MODE),
        (layout.execution_config(), render_execution_config(ctx)?, FILE_MODE),
        (layout.env_file(), render_env_file(ctx), FILE_MODE),
        (layout.start_script(), render_start_script(ctx), EXEC_MODE),
        (layout.stop_script(), render_stop_script(ctx), EXEC_MODE),
    ];
    if ctx.config.mode == DeployMode::Container {
        files.push((layout.compose_manifest(), render_compose(ctx)?, FILE_MODE));
    }

    let mut rendered = Vec::with_capacity(files.len());
    for (path, content, mode) in files {
        let outcome = write_if_changed(&path, content.as_bytes(), mode)?;
        debug!(path = %path.display(), ?outcome, "rendered");
        rendered.push(RenderedFile { path, outcome });
    }

    let changed = rendered
        .iter()
        .filter(|f| f.outcome == WriteOutcome::Written)
        .count();
    info!(files = rendered.len(), changed, "configuration rendered");
    Ok(rendered)
}
