//! `nodeup upgrade`

use anyhow::{Context, Result};
use clap::Args;
use nodeup_core::InstallationLayout;
use nodeup_core::config::BootstrapConfig;
use nodeup_core::lifecycle::upgrade;
use nodeup_core::platform::Platform;
use nodeup_core::release::HttpArtifactSource;

/// Flags for an upgrade.
#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Target release tag, or `latest`
    #[arg(long = "release", env = "NODEUP_RELEASE")]
    pub release: Option<String>,

    /// Release tag used when `latest` cannot be resolved
    #[arg(long, env = "NODEUP_FALLBACK_RELEASE")]
    pub fallback_release: Option<String>,
}

/// Upgrades the installation.
pub fn run(mut config: BootstrapConfig, args: &UpgradeArgs) -> Result<()> {
    if let Some(release) = &args.release {
        config.release.version.clone_from(release);
    }
    if args.fallback_release.is_some() {
        config.release.fallback_version.clone_from(&args.fallback_release);
    }

    let layout = InstallationLayout::new(&config.home);
    let fetcher = super::fetcher()?;
    let platform = Platform::detect().context("unsupported host platform")?;
    let artifacts = HttpArtifactSource::new(fetcher.clone(), platform, config.timeouts.artifact);

    let outcome = upgrade(
        &layout,
        &config,
        fetcher.as_ref(),
        &artifacts,
        &super::engine(&config),
    )
    .context("upgrade failed")?;

    if !outcome.changed {
        println!("Already at {}", outcome.to_version);
    } else if outcome.restarted {
        println!(
            "Upgraded {} -> {}; services recreated",
            outcome.from_version, outcome.to_version
        );
    } else {
        println!(
            "Upgraded {} -> {}; start the node with `nodeup start`",
            outcome.from_version, outcome.to_version
        );
    }
    Ok(())
}
