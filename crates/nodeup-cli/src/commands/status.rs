//! `nodeup status`

use anyhow::{Context, Result};
use nodeup_core::InstallationLayout;
use nodeup_core::config::BootstrapConfig;
use nodeup_core::lifecycle::status;

/// Prints the installation's state as a table or JSON.
pub fn run(config: &BootstrapConfig, json: bool) -> Result<()> {
    let layout = InstallationLayout::new(&config.home);
    let report = status(&layout, &super::engine(config)).context("failed to read status")?;

    if json {
        let out = serde_json::to_string_pretty(&report).context("failed to encode status")?;
        println!("{out}");
        return Ok(());
    }

    println!("home:     {}", report.home);
    let Some(record) = &report.record else {
        println!("state:    uninstalled");
        return Ok(());
    };
    println!("role:     {} ({} mode)", record.role, record.mode);
    println!("moniker:  {}", record.moniker);
    println!("chain id: {}", record.chain_id);
    println!("version:  {}", record.version);
    println!("state:    {}", record.state);
    if report.upgrade_in_progress {
        println!("upgrade:  interrupted, will be rolled back on next run");
    }
    println!();
    println!("{:<12} {:<8} {:<10}", "PROCESS", "PID", "STATUS");
    for process in &report.processes {
        let pid = process
            .pid
            .map_or_else(|| "-".to_string(), |pid| pid.to_string());
        let state = if process.running { "running" } else { "stopped" };
        println!("{:<12} {:<8} {:<10}", process.kind.as_str(), pid, state);
    }
    Ok(())
}
