//! `nodeup stop`

use anyhow::{Context, Result};
use nodeup_core::InstallationLayout;
use nodeup_core::config::BootstrapConfig;
use nodeup_core::lifecycle::stop;

/// Stops the node and reports processes that had to be killed.
pub fn run(config: &BootstrapConfig) -> Result<()> {
    let layout = InstallationLayout::new(&config.home);
    let report = stop(&layout, config, &super::engine(config)).context("failed to stop node")?;

    if report.stopped.is_empty() {
        println!("Node is not running");
        return Ok(());
    }
    println!("Stopped: {}", report.stopped.join(", "));
    if !report.forced.is_empty() {
        eprintln!(
            "warning: killed after grace period: {}",
            report.forced.join(", ")
        );
    }
    Ok(())
}
