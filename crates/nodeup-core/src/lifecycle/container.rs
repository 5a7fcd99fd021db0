//! Container engine access and manifest image-tag rewriting.

use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};

/// The subset of a container engine's CLI that nodeup drives.
pub trait ContainerEngine: Send + Sync {
    /// Fails with `UnsupportedEnvironment` when the engine is unusable.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedEnvironment` if the engine is missing or its
    /// daemon is unreachable.
    fn check_available(&self) -> Result<()>;

    /// Pulls an image.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactFetchFailed` if the pull fails.
    fn pull(&self, image: &str) -> Result<()>;

    /// Starts the manifest's services detached. With `recreate`, running
    /// containers are replaced even if their configuration is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ProcessFailed` if the engine reports failure.
    fn up(&self, manifest: &Path, recreate: bool) -> Result<()>;

    /// Stops and removes the manifest's services.
    ///
    /// # Errors
    ///
    /// Returns `ProcessFailed` if the engine reports failure.
    fn down(&self, manifest: &Path) -> Result<()>;

    /// Names of services currently running.
    ///
    /// # Errors
    ///
    /// Returns `ProcessFailed` if the engine reports failure.
    fn running_services(&self, manifest: &Path) -> Result<Vec<String>>;
}

/// Drives `docker` (or a CLI-compatible engine) through its command line.
#[derive(Debug, Clone)]
pub struct CliContainerEngine {
    program: String,
}

impl CliContainerEngine {
    /// Uses `program`, e.g. `docker` or `podman`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> std::result::Result<String, String> {
        debug!(program = %self.program, ?args, "running container engine");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| format!("failed to run {}: {e}", self.program))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    fn compose(&self, manifest: &Path, rest: &[&str]) -> std::result::Result<String, String> {
        let manifest = manifest.display().to_string();
        let mut args = vec!["compose", "-f", manifest.as_str()];
        args.extend_from_slice(rest);
        self.run(&args)
    }

    fn process_failed(reason: String) -> Error {
        Error::ProcessFailed {
            process: "container engine".to_string(),
            reason,
        }
    }
}

impl ContainerEngine for CliContainerEngine {
    fn check_available(&self) -> Result<()> {
        let version = self
            .run(&["version", "--format", "{{.Server.Version}}"])
            .map_err(|e| Error::UnsupportedEnvironment(format!("container engine unavailable: {e}")))?;
        info!(engine = %self.program, version = version.trim(), "container engine available");
        Ok(())
    }

    fn pull(&self, image: &str) -> Result<()> {
        info!(image, "pulling image");
        self.run(&["pull", image])
            .map(|_| ())
            .map_err(|reason| Error::ArtifactFetchFailed {
                artifact: image.to_string(),
                reason,
            })
    }

    fn up(&self, manifest: &Path, recreate: bool) -> Result<()> {
        let mut args = vec!["up", "-d", "--wait"];
        if recreate {
            args.push("--force-recreate");
        }
        self.compose(manifest, &args)
            .map(|_| ())
            .map_err(Self::process_failed)
    }

    fn down(&self, manifest: &Path) -> Result<()> {
        self.compose(manifest, &["down"])
            .map(|_| ())
            .map_err(Self::process_failed)
    }

    fn running_services(&self, manifest: &Path) -> Result<Vec<String>> {
        self.compose(manifest, &["ps", "--services", "--filter", "status=running"])
            .map(|out| {
                out.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .map_err(Self::process_failed)
    }
}

/// Replaces the tag of every reference to `image_name` in `manifest` with
/// `new_tag`.
///
/// A reference matches only when `image_name:` appears at the start of a
/// token (start of text, after whitespace, a quote or `=`), so other images
/// that merely share a prefix or suffix are left alone. Returns the rewritten
/// text and the number of references replaced.
#[must_use]
pub fn rewrite_image_tag(manifest: &str, image_name: &str, new_tag: &str) -> (String, usize) {
    let needle = format!("{image_name}:");
    let mut out = String::with_capacity(manifest.len());
    let mut cursor = 0;
    let mut replaced = 0;

    for (start, _) in manifest.match_indices(&needle) {
        if start < cursor {
            continue;
        }
        let at_token_start = manifest[..start]
            .chars()
            .next_back()
            .is_none_or(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '='));
        if !at_token_start {
            continue;
        }

        let tag_start = start + needle.len();
        let tag_end = manifest[tag_start..]
            .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ',' | ']'))
            .map_or(manifest.len(), |offset| tag_start + offset);

        out.push_str(&manifest[cursor..tag_start]);
        out.push_str(new_tag);
        cursor = tag_end;
        replaced += 1;
    }
    out.push_str(&manifest[cursor..]);
    (out, replaced)
}
