//! Readiness probes gating process startup order.
//!
//! Each managed process declares how to tell that it is accepting work. The
//! supervisor polls the probe with backoff and a bounded attempt count before
//! launching the next process; a process that never becomes ready aborts the
//! start.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::backoff::ReadinessConfig;
use crate::error::{Error, Result};

/// How to decide that a process is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// A TCP listener accepts connections.
    Tcp(SocketAddr),
    /// An HTTP GET returns 2xx.
    Http(String),
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Http(url) => f.write_str(url),
        }
    }
}

impl Probe {
    /// Performs one probe attempt.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the target is not ready.
    pub async fn check(&self, timeout: Duration) -> Result<(), String> {
        match self {
            Self::Tcp(addr) => match tokio::time::timeout(timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("connect timed out after {timeout:?}")),
            },
            Self::Http(url) => {
                let client = reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| e.to_string())?;
                let response = client.get(url).send().await.map_err(|e| e.to_string())?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("HTTP {}", response.status().as_u16()))
                }
            },
        }
    }
}

/// Polls `probe` until it succeeds, the attempt bound is reached, or
/// `exited` reports that the process died.
///
/// `exited` is consulted before every attempt and returns a description of
/// the exit when the process is gone.
///
/// # Errors
///
/// Returns [`Error::NotReady`] when attempts are exhausted and
/// [`Error::ProcessFailed`] when the process exits while being probed.
pub async fn wait_until_ready<F>(
    process: &str,
    probe: &Probe,
    config: &ReadinessConfig,
    mut exited: F,
) -> Result<()>
where
    F: FnMut() -> Option<String>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if let Some(status) = exited() {
            return Err(Error::ProcessFailed {
                process: process.to_string(),
                reason: format!("exited before becoming ready ({status})"),
            });
        }

        match probe.check(config.attempt_timeout).await {
            Ok(()) => {
                info!(process, %probe, attempt, "process ready");
                return Ok(());
            },
            Err(e) => {
                debug!(process, %probe, attempt, error = %e, "readiness probe failed");
                last_error = e;
            },
        }

        if attempt < attempts {
            tokio::time::sleep(config.backoff.delay_for_attempt(attempt)).await;
        }
    }

    Err(Error::NotReady {
        process: process.to_string(),
        attempts,
        last_error,
    })
}
