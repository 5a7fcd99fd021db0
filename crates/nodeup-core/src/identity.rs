//! Cryptographic identity provisioning.
//!
//! The validator signing key and node key are produced by the consensus
//! engine's own `init` command, run into a scratch directory, and then only
//! the two key files are copied into the stable location. Everything else the
//! engine writes there (sample config, sample genesis) is discarded.
//!
//! Identity is created once and never regenerated while the signing key is
//! present. Deleting `priv_validator_key.json` is the only way to rotate it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::fs::{SECRET_MODE, atomic_write};
use crate::layout::InstallationLayout;

/// Initial last-signed-state record. The consensus engine refuses to sign
/// without it.
pub const INITIAL_VALIDATOR_STATE: &str = "{\"height\":\"0\",\"round\":0,\"step\":0}\n";

/// Key files copied out of a generated home, relative to that home.
const KEY_FILES: [&str; 2] = ["config/priv_validator_key.json", "config/node_key.json"];

/// Runs the consensus engine's key generation into a fresh home directory.
///
/// Implementations must leave `config/priv_validator_key.json` and
/// `config/node_key.json` under `home`.
pub trait KeyGenerator: Send + Sync {
    /// Generates a fresh identity under `home`.
    ///
    /// # Errors
    ///
    /// Returns `IdentityProvisioningFailed` if generation fails.
    fn generate(&self, home: &Path) -> Result<()>;
}

/// Runs `<consensusd> init --home <dir>` on the host.
#[derive(Debug, Clone)]
pub struct ProcessKeyGenerator {
    binary: PathBuf,
}

impl ProcessKeyGenerator {
    /// Uses the consensus engine binary at `binary`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl KeyGenerator for ProcessKeyGenerator {
    fn generate(&self, home: &Path) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("init")
            .arg("--home")
            .arg(home)
            .output()
            .map_err(|e| {
                Error::IdentityProvisioningFailed(format!(
                    "failed to run {}: {e}",
                    self.binary.display()
                ))
            })?;
        check_output(&self.binary.display().to_string(), &output)
    }
}

/// Runs key generation inside the consensus image, bind-mounting the scratch
/// home into the container.
#[derive(Debug, Clone)]
pub struct ContainerKeyGenerator {
    engine: String,
    image: String,
}

/// Home directory inside the consensus container.
pub const CONTAINER_CONSENSUS_HOME: &str = "/home/consensus";

impl ContainerKeyGenerator {
    /// Uses `engine` (e.g. `docker`) to run `image`.
    #[must_use]
    pub fn new(engine: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            image: image.into(),
        }
    }
}

impl KeyGenerator for ContainerKeyGenerator {
    fn generate(&self, home: &Path) -> Result<()> {
        let mount = format!("{}:{CONTAINER_CONSENSUS_HOME}", home.display());
        let output = Command::new(&self.engine)
            .args(["run", "--rm", "-v", &mount, &self.image])
            .args(["init", "--home", CONTAINER_CONSENSUS_HOME])
            .output()
            .map_err(|e| {
                Error::IdentityProvisioningFailed(format!("failed to run {}: {e}", self.engine))
            })?;
        check_output(&format!("{} run {}", self.engine, self.image), &output)
    }
}

fn check_output(what: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(Error::IdentityProvisioningFailed(format!(
        "{what} init exited with {}: {}",
        output.status,
        stderr.trim()
    )))
}

/// Public key entry of a validator key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Key algorithm tag, e.g. `tendermint/PubKeyEd25519`.
    #[serde(rename = "type")]
    pub key_type: String,
    /// Base64 key bytes.
    pub value: String,
}

/// The public half of `priv_validator_key.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidatorKey {
    /// Validator address (hex).
    pub address: String,
    /// Validator public key.
    pub pub_key: PublicKey,
}

impl ValidatorKey {
    /// Reads the public half of a validator key file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read and
    /// `IdentityProvisioningFailed` if it lacks an address or public key.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| Error::io("failed to read validator key", path, e))?;
        Self::parse(&bytes).map_err(|e| {
            Error::IdentityProvisioningFailed(format!(
                "malformed validator key {}: {e}",
                path.display()
            ))
        })
    }

    fn parse(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// What [`ensure_identity`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityReport {
    /// Signing key and node key were generated.
    pub keys_generated: bool,
    /// The last-signed-state record was seeded.
    pub state_seeded: bool,
    /// The execution/bridge auth secret was generated.
    pub auth_secret_generated: bool,
}

impl IdentityReport {
    /// Whether nothing on disk changed.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        !self.keys_generated && !self.state_seeded && !self.auth_secret_generated
    }
}

/// Ensures every identity file exists, creating only what is missing.
///
/// # Errors
///
/// Returns `IdentityProvisioningFailed` if key generation fails or produces
/// unusable output, and I/O errors for filesystem failures.
pub fn ensure_identity(
    layout: &InstallationLayout,
    generator: &dyn KeyGenerator,
) -> Result<IdentityReport> {
    let mut report = IdentityReport::default();

    if layout.validator_key().is_file() {
        info!(
            path = %layout.validator_key().display(),
            "validator signing key present, skipping key generation"
        );
    } else {
        generate_keys(layout, generator)?;
        report.keys_generated = true;
    }

    let state = layout.validator_state();
    if !state.exists() {
        atomic_write(&state, INITIAL_VALIDATOR_STATE.as_bytes(), SECRET_MODE)?;
        info!(path = %state.display(), "seeded validator state");
        report.state_seeded = true;
    }

    let secret = layout.auth_secret();
    if secret.is_file() {
        info!(path = %secret.display(), "auth secret present");
    } else {
        write_auth_secret(&secret)?;
        report.auth_secret_generated = true;
    }

    Ok(report)
}

fn generate_keys(layout: &InstallationLayout, generator: &dyn KeyGenerator) -> Result<()> {
    let scratch = layout.scratch_dir();
    reset_dir(&scratch)?;

    let result = generator
        .generate(&scratch)
        .and_then(|()| copy_keys(&scratch, layout));

    if let Err(e) = fs::remove_dir_all(&scratch) {
        warn!(path = %scratch.display(), error = %e, "failed to clean up scratch directory");
    }
    result?;

    let key = ValidatorKey::load(&layout.validator_key())?;
    info!(address = %key.address, "generated validator identity");
    Ok(())
}

fn reset_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => return Err(Error::io("failed to clear scratch directory", dir, e)),
    }
    fs::create_dir_all(dir).map_err(|e| Error::io("failed to create scratch directory", dir, e))
}

fn copy_keys(scratch: &Path, layout: &InstallationLayout) -> Result<()> {
    let targets = [layout.validator_key(), layout.node_key()];

    // Validate both before writing either.
    let mut contents = Vec::with_capacity(KEY_FILES.len());
    for relative in KEY_FILES {
        let source = scratch.join(relative);
        let bytes = fs::read(&source).map_err(|e| {
            Error::IdentityProvisioningFailed(format!(
                "key generation did not produce {relative}: {e}"
            ))
        })?;
        serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| {
            Error::IdentityProvisioningFailed(format!("generated {relative} is not JSON: {e}"))
        })?;
        contents.push(bytes);
    }
    ValidatorKey::parse(&contents[0]).map_err(|e| {
        Error::IdentityProvisioningFailed(format!("generated validator key is malformed: {e}"))
    })?;

    // Node key first: presence of the signing key is the completion marker.
    for (target, bytes) in targets.iter().zip(contents.iter()).rev() {
        atomic_write(target, bytes, SECRET_MODE)?;
    }
    Ok(())
}

fn write_auth_secret(path: &Path) -> Result<()> {
    let bytes: [u8; 32] = rand::random();
    let mut encoded = hex::encode(bytes);
    encoded.push('\n');
    atomic_write(path, encoded.as_bytes(), SECRET_MODE)?;
    info!(path = %path.display(), "generated auth secret");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Key generator fake shared by unit tests.

    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::KeyGenerator;
    use crate::error::{Error, Result};

    pub const TEST_ADDRESS: &str = "5A1F2E0C9D8B7A6F5E4D3C2B1A0F9E8D7C6B5A49";
    pub const TEST_PUB_KEY: &str = "dGVzdC1wdWJsaWMta2V5LWJ5dGVzLTAwMDAwMDAwMDA=";

    /// Writes fixed key files, plus a sample genesis that must not be copied.
    #[derive(Default)]
    pub struct FakeKeyGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeKeyGenerator {
        pub fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl KeyGenerator for FakeKeyGenerator {
        fn generate(&self, home: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::IdentityProvisioningFailed(
                    "simulated init failure".to_string(),
                ));
            }
            let config = home.join("config");
            std::fs::create_dir_all(&config).unwrap();
            std::fs::write(
                config.join("priv_validator_key.json"),
                format!(
                    r#"{{"address":"{TEST_ADDRESS}","pub_key":{{"type":"tendermint/PubKeyEd25519","value":"{TEST_PUB_KEY}"}},"priv_key":{{"type":"tendermint/PrivKeyEd25519","value":"c2VjcmV0"}}}}"#
                ),
            )
            .unwrap();
            std::fs::write(
                config.join("node_key.json"),
                r#"{"priv_key":{"type":"tendermint/PrivKeyEd25519","value":"bm9kZQ=="}}"#,
            )
            .unwrap();
            std::fs::write(config.join("genesis.json"), r#"{"chain_id":"sample"}"#).unwrap();
            Ok(())
        }
    }
}
