//! `nodeup start`

use anyhow::{Context, Result};
use nodeup_core::config::BootstrapConfig;
use nodeup_core::lifecycle::{run_foreground, shutdown_signal, start_containers};
use nodeup_core::state::require_record;
use nodeup_core::{DeployMode, InstallationLayout};

/// Starts the node. Binary mode blocks until SIGINT/SIGTERM or a process
/// exits.
pub fn run(config: &BootstrapConfig) -> Result<()> {
    let layout = InstallationLayout::new(&config.home);
    let record = require_record(&layout)?;

    match record.mode {
        DeployMode::Container => {
            start_containers(&layout, &super::engine(config))
                .context("failed to start container services")?;
            println!("Node started ({} services)", record.role);
            Ok(())
        },
        DeployMode::Binary => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build tokio runtime")?;

            rt.block_on(async {
                let shutdown = shutdown_signal().context("failed to install signal handlers")?;
                let report = run_foreground(&layout, config, shutdown)
                    .await
                    .context("node stopped with an error")?;
                println!("Node stopped ({} processes)", report.pids.len());
                Ok(())
            })
        },
    }
}
