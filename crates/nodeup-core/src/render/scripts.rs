//! Entry-point scripts and the environment export file.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::RenderContext;
use crate::process::ProcessKind;
use crate::role::DeployMode;

const HEADER: &str = "# Generated by nodeup; rewritten on every install.\n";

/// Quotes `value` for POSIX shells.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn compose_command(ctx: &RenderContext<'_>, action: &str) -> String {
    format!(
        "exec {} compose -f {} {action}",
        shell_quote(&ctx.config.release.container_engine),
        shell_quote(&ctx.layout.compose_manifest().display().to_string())
    )
}

fn nodeup_command(ctx: &RenderContext<'_>, action: &str) -> String {
    format!(
        "exec nodeup {action} --home {}",
        shell_quote(&ctx.layout.root().display().to_string())
    )
}

fn script(body: &str) -> String {
    format!("#!/bin/sh\n{HEADER}set -eu\n{body} \"$@\"\n")
}

/// Renders the `start` entry point.
#[must_use]
pub fn render_start_script(ctx: &RenderContext<'_>) -> String {
    match ctx.config.mode {
        DeployMode::Binary => script(&nodeup_command(ctx, "start")),
        DeployMode::Container => script(&compose_command(ctx, "up -d")),
    }
}

/// Renders the `stop` entry point.
#[must_use]
pub fn render_stop_script(ctx: &RenderContext<'_>) -> String {
    match ctx.config.mode {
        DeployMode::Binary => script(&nodeup_command(ctx, "stop")),
        DeployMode::Container => script(&compose_command(ctx, "down")),
    }
}

/// Renders `nodeup.env`, a sourceable file exporting the installation's
/// paths and endpoints.
#[must_use]
pub fn render_env_file(ctx: &RenderContext<'_>) -> String {
    let layout = ctx.layout;
    let config = ctx.config;
    let path = |p: std::path::PathBuf| p.display().to_string();

    let vars = BTreeMap::from([
        ("NODEUP_HOME", path(layout.root().to_path_buf())),
        ("NODEUP_ROLE", config.role.to_string()),
        ("NODEUP_MODE", config.mode.to_string()),
        ("NODEUP_MONIKER", config.moniker.clone()),
        ("NODEUP_CHAIN_ID", ctx.chain_id.to_string()),
        ("CONSENSUS_HOME", path(layout.consensus_home())),
        ("CONSENSUS_GENESIS", path(layout.consensus_genesis())),
        ("EXECUTION_GENESIS", path(layout.execution_genesis())),
        ("AUTH_SECRET_FILE", path(layout.auth_secret())),
        (
            "CONSENSUS_RPC",
            format!("http://127.0.0.1:{}", config.ports.consensus_rpc),
        ),
        (
            "EXECUTION_RPC",
            format!("http://127.0.0.1:{}", config.ports.execution_http),
        ),
        ("BIN_DIR", path(layout.bin_dir())),
        ("LOG_DIR", path(layout.logs_dir())),
        ("CONSENSUS_BIN", path(layout.binary(ProcessKind::Consensus))),
        ("EXECUTION_BIN", path(layout.binary(ProcessKind::Execution))),
        ("BRIDGE_BIN", path(layout.binary(ProcessKind::Bridge))),
    ]);

    let mut out = String::from(HEADER);
    for (key, value) in vars {
        let _ = writeln!(out, "export {key}={}", shell_quote(&value));
    }
    out
}
