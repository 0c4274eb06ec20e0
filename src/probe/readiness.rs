//! Readiness polling

use super::protocol::ReadinessProtocol;
use crate::container::{InstanceInfo, InstanceStatus, ProcessController};
use crate::error::{Result, SigilError};
use std::time::Duration;
use tokio::time::Instant;

/// Default delay between readiness attempts
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for a single attempt
const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Stand-in deadline for timeouts too large to add to `Instant::now()`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Polls instances until they accept traffic
pub struct ReadinessProbe {
    /// Delay between attempts
    interval: Duration,
    /// HTTP client shared by all probes
    client: reqwest::Client,
}

impl ReadinessProbe {
    /// Create a new probe
    pub fn new(interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| SigilError::Runtime(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { interval, client })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until `name` passes `protocol`, then mark it Ready.
    ///
    /// With no protocol the instance is ready as soon as it runs. On timeout the
    /// instance keeps its current status. An instance that exits while waiting
    /// fails with `StartFailed`.
    pub async fn wait_until_ready(
        &self,
        controller: &ProcessController,
        name: &str,
        protocol: Option<&ReadinessProtocol>,
        timeout: Duration,
    ) -> Result<InstanceInfo> {
        let info = controller
            .get(name)
            .await?
            .ok_or_else(|| SigilError::NotStarted(name.to_string()))?;

        match info.status {
            InstanceStatus::Ready => return Ok(info),
            status if !status.is_live() => return Err(SigilError::NotStarted(name.to_string())),
            _ => {}
        }

        let Some(protocol) = protocol else {
            return controller.mark_ready(name).await;
        };

        tracing::info!("Waiting for {} ({}) up to {}ms", name, protocol, timeout.as_millis());

        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
        let mut attempts = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let info = controller
                .get(name)
                .await?
                .ok_or_else(|| SigilError::NotStarted(name.to_string()))?;
            if !info.status.is_live() {
                tracing::warn!("{} exited while waiting for readiness", name);
                return Err(exited_before_ready(&info));
            }

            attempts += 1;
            match protocol
                .check(&self.client, remaining.min(MAX_ATTEMPT_TIMEOUT))
                .await
            {
                Ok(()) => {
                    tracing::debug!("{} passed readiness after {} attempt(s)", name, attempts);
                    return controller.mark_ready(name).await;
                }
                Err(e) => tracing::debug!("{} not ready (attempt {}): {}", name, attempts, e),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.interval.min(remaining)).await;
        }

        tracing::warn!(
            "{} did not become ready within {}ms ({} attempts)",
            name,
            timeout.as_millis(),
            attempts
        );
        Err(SigilError::ReadinessTimeout {
            service: name.to_string(),
            timeout,
        })
    }
}

fn exited_before_ready(info: &InstanceInfo) -> SigilError {
    let cause = match info.exit_code {
        Some(code) => format!("exited with code {} before becoming ready", code),
        None => format!("{} before becoming ready", info.status),
    };
    SigilError::StartFailed {
        service: info.service.clone(),
        cause,
    }
}
