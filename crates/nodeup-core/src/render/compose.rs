//! Container orchestration manifest (`docker-compose.yml`).
//!
//! Startup ordering is declarative: each service waits for its predecessor's
//! healthcheck through `depends_on: {condition: service_healthy}`.

use std::collections::BTreeMap;

use serde::Serialize;

use super::RenderContext;
use crate::error::{Error, Result};
use crate::process::ProcessKind;
use crate::release::image_name;

#[derive(Debug, Serialize)]
struct ComposeFile {
    name: String,
    services: BTreeMap<&'static str, Service>,
}

#[derive(Debug, Serialize)]
struct Service {
    image: String,
    command: Vec<String>,
    restart: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    depends_on: BTreeMap<&'static str, DependsOn>,
    healthcheck: Healthcheck,
    stop_grace_period: String,
}

#[derive(Debug, Serialize)]
struct DependsOn {
    condition: &'static str,
}

#[derive(Debug, Serialize)]
struct Healthcheck {
    test: Vec<String>,
    interval: &'static str,
    timeout: &'static str,
    retries: u32,
    start_period: &'static str,
}

impl Healthcheck {
    fn shell(command: String) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), command],
            interval: "5s",
            timeout: "3s",
            retries: 30,
            start_period: "10s",
        }
    }
}

/// Renders the three-service manifest.
///
/// # Errors
///
/// Returns `Serialization` if encoding fails.
pub fn render_compose(ctx: &RenderContext<'_>) -> Result<String> {
    let layout = ctx.layout;
    let ports = &ctx.config.ports;
    let registry = &ctx.config.release.image_registry;
    let config_dir = layout.config_dir().display().to_string();
    let stop_grace = humantime::format_duration(ctx.config.timeouts.stop_grace).to_string();

    let mut services = BTreeMap::new();
    let mut previous: Option<ProcessKind> = None;
    for kind in ProcessKind::ALL {
        let data_dir = layout.data_dir(kind).display().to_string();
        let (published, healthcheck) = match kind {
            ProcessKind::Execution => (
                vec![
                    format!("{0}:{0}", ports.execution_http),
                    format!("{0}:{0}", ports.execution_ws),
                    format!("{0}:{0}", ports.execution_p2p),
                    format!("{0}:{0}/udp", ports.execution_p2p),
                ],
                Healthcheck::shell(format!("nc -z localhost {} || exit 1", ports.execution_auth)),
            ),
            ProcessKind::Bridge => (
                Vec::new(),
                Healthcheck::shell(format!("nc -z localhost {} || exit 1", ports.bridge)),
            ),
            ProcessKind::Consensus => (
                vec![
                    format!("{0}:{0}", ports.consensus_p2p),
                    format!("{0}:{0}", ports.consensus_rpc),
                ],
                Healthcheck::shell(format!(
                    "curl -fsS http://localhost:{}/health || exit 1",
                    ports.consensus_rpc
                )),
            ),
        };

        let depends_on = previous
            .map(|p| {
                BTreeMap::from([(
                    p.service_name(),
                    DependsOn {
                        condition: "service_healthy",
                    },
                )])
            })
            .unwrap_or_default();

        services.insert(
            kind.service_name(),
            Service {
                image: format!("{}:{}", image_name(registry, kind), ctx.version),
                command: kind.launch_args(layout),
                restart: "unless-stopped",
                ports: published,
                volumes: vec![
                    format!("{config_dir}:{config_dir}"),
                    format!("{data_dir}:{data_dir}"),
                ],
                depends_on,
                healthcheck,
                stop_grace_period: stop_grace.clone(),
            },
        );
        previous = Some(kind);
    }

    let manifest = ComposeFile {
        name: project_name(&ctx.config.moniker),
        services,
    };
    serde_yaml::to_string(&manifest).map_err(|e| Error::serialization("docker-compose.yml", e))
}

/// Compose project name derived from the moniker.
fn project_name(moniker: &str) -> String {
    let suffix: String = moniker
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("nodeup-{}", suffix.trim_matches('-'))
}
