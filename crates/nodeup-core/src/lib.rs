//! Core library for nodeup.
//!
//! nodeup installs, runs and upgrades a node made of three cooperating
//! processes: an execution engine, a bridge, and a consensus engine. This
//! crate holds everything except the command-line surface:
//!
//! - [`bootstrap`]: the idempotent install operation
//! - [`identity`] and [`genesis`]: key material and chain identity
//! - [`render`]: per-role configuration for all three processes
//! - [`lifecycle`]: supervision, stop, status and upgrades
//! - [`layout`], [`state`], [`lock`]: the on-disk installation contract

pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod fs;
pub mod genesis;
pub mod http;
pub mod identity;
pub mod layout;
pub mod lifecycle;
pub mod lock;
pub mod platform;
pub mod process;
pub mod readiness;
pub mod release;
pub mod render;
pub mod role;
pub mod state;

pub use bootstrap::{InstallReport, Installer};
pub use config::BootstrapConfig;
pub use error::{Error, ErrorKind, Result};
pub use layout::InstallationLayout;
pub use role::{DeployMode, NodeRole};
pub use state::{InstallationRecord, LifecycleState};
