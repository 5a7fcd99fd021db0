//! Subcommand implementations.
//!
//! Configuration is assembled once in [`load_config`] and every command
//! works from that value; flags a command accepts are overlaid on top.

pub mod install;
pub mod start;
pub mod status;
pub mod stop;
pub mod upgrade;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use nodeup_core::config::BootstrapConfig;
use nodeup_core::http::ReqwestFetcher;
use nodeup_core::lifecycle::CliContainerEngine;
use tracing::debug;

/// Loads the configuration file (if any) and applies `--home`.
pub fn load_config(path: Option<&Path>, home: Option<PathBuf>) -> Result<BootstrapConfig> {
    let mut config = match path {
        Some(path) => BootstrapConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => BootstrapConfig::default(),
    };
    if let Some(home) = home {
        config.home = home;
    }
    debug!(home = %config.home.display(), role = %config.role, mode = %config.mode, "configuration loaded");
    Ok(config)
}

/// HTTP client shared by every network step of one command.
pub fn fetcher() -> Result<Arc<ReqwestFetcher>> {
    ReqwestFetcher::new()
        .map(Arc::new)
        .context("failed to initialize HTTP client")
}

/// The configured container engine CLI.
pub fn engine(config: &BootstrapConfig) -> CliContainerEngine {
    CliContainerEngine::new(config.release.container_engine.as_str())
}
