//! Execution-layer genesis resolution.

use serde::Serialize;
use tracing::info;

use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::fs::{FILE_MODE, atomic_write, remove_if_exists};
use crate::http::HttpFetch;
use crate::layout::InstallationLayout;
use crate::release::LazyRelease;

/// Where the execution genesis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionGenesisSource {
    /// Already present in the installation.
    Existing,
    /// Fetched from the configured URL.
    ExplicitUrl,
    /// Fetched from the release's default `genesis.json`.
    ReleaseDefault,
}

impl ExecutionGenesisSource {
    /// Whether the document was retrieved from the network during this run.
    #[must_use]
    pub const fn is_fetched(self) -> bool {
        matches!(self, Self::ExplicitUrl | Self::ReleaseDefault)
    }
}

/// Obtains the execution genesis: existing file, explicit URL, then the
/// release default. The release is only resolved when it is needed.
///
/// # Errors
///
/// Returns `GenesisFetchFailed` if the download fails and
/// `InvalidGenesisFormat` if the body is not a JSON object; in the latter
/// case the downloaded file is removed.
pub fn resolve_execution_genesis(
    layout: &InstallationLayout,
    config: &BootstrapConfig,
    fetcher: &dyn HttpFetch,
    release: &mut LazyRelease<'_>,
) -> Result<ExecutionGenesisSource> {
    let path = layout.execution_genesis();
    if path.is_file() {
        info!(path = %path.display(), "execution genesis present, reusing");
        return Ok(ExecutionGenesisSource::Existing);
    }

    let (url, source) = match &config.network.execution_genesis_url {
        Some(url) => (url.clone(), ExecutionGenesisSource::ExplicitUrl),
        None => (
            release.get()?.execution_genesis_url(),
            ExecutionGenesisSource::ReleaseDefault,
        ),
    };

    info!(%url, ?source, "fetching execution genesis");
    let body = fetcher
        .get(&url, config.timeouts.artifact)
        .map_err(|e| Error::GenesisFetchFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    atomic_write(&path, &body, FILE_MODE)?;
    if let Err(e) = serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&body) {
        remove_if_exists(&path)?;
        return Err(Error::InvalidGenesisFormat {
            source_desc: url,
            reason: e.to_string(),
        });
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::http::testing::MockFetcher;

    const RELEASE_GENESIS: &str = "https://github.com/nodeup/node/releases/download/v1.2.0/genesis.json";

    fn setup() -> (tempfile::TempDir, InstallationLayout, BootstrapConfig) {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallationLayout::new(dir.path());
        layout.materialize().unwrap();
        let mut config = BootstrapConfig::default();
        config.release.version = "v1.2.0".to_string();
        (dir, layout, config)
    }

    #[test]
    fn test_existing_skips_release_resolution() {
        let (_dir, layout, mut config) = setup();
        config.release.version = "latest".to_string();
        std::fs::write(layout.execution_genesis(), "{\"config\":{}}").unwrap();

        let fetcher = MockFetcher::new();
        let mut release = LazyRelease::new(&config.release, &fetcher, config.timeouts.metadata);
        let source = resolve_execution_genesis(&layout, &config, &fetcher, &mut release).unwrap();

        assert_eq!(source, ExecutionGenesisSource::Existing);
        assert!(!source.is_fetched());
        assert!(release.resolved().is_none());
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn test_release_default() {
        let (_dir, layout, config) = setup();
        let body = "{\"config\":{\"chainId\":7},\"alloc\":{}}";
        let fetcher = MockFetcher::new().respond(RELEASE_GENESIS, body);
        let mut release = LazyRelease::new(&config.release, &fetcher, config.timeouts.metadata);

        let source = resolve_execution_genesis(&layout, &config, &fetcher, &mut release).unwrap();
        assert_eq!(source, ExecutionGenesisSource::ReleaseDefault);
        assert_eq!(
            std::fs::read_to_string(layout.execution_genesis()).unwrap(),
            body
        );
    }

    #[test]
    fn test_explicit_url_wins_over_release() {
        let (_dir, layout, mut config) = setup();
        let url = "https://example.com/exec-genesis.json";
        config.network.execution_genesis_url = Some(url.to_string());
        let fetcher = MockFetcher::new().respond(url, "{\"alloc\":{}}");
        let mut release = LazyRelease::new(&config.release, &fetcher, config.timeouts.metadata);

        let source = resolve_execution_genesis(&layout, &config, &fetcher, &mut release).unwrap();
        assert_eq!(source, ExecutionGenesisSource::ExplicitUrl);
        assert_eq!(fetcher.calls(), vec![url.to_string()]);
    }

    #[test]
    fn test_unparsable_download_is_removed() {
        let (_dir, layout, config) = setup();
        let fetcher = MockFetcher::new().respond(RELEASE_GENESIS, "{\"alloc\": {");
        let mut release = LazyRelease::new(&config.release, &fetcher, config.timeouts.metadata);

        let err = resolve_execution_genesis(&layout, &config, &fetcher, &mut release).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGenesisFormat);
        assert!(!layout.execution_genesis().exists());
    }

    #[test]
    fn test_download_failure_is_fatal() {
        let (_dir, layout, config) = setup();
        let fetcher = MockFetcher::new();
        let mut release = LazyRelease::new(&config.release, &fetcher, config.timeouts.metadata);

        let err = resolve_execution_genesis(&layout, &config, &fetcher, &mut release).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenesisFetchFailed);
        assert!(!layout.execution_genesis().exists());
    }
}
