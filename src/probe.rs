use crate::paths::ListenAddress;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::trace;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Checks whether a daemon answers on its listen address.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, address: &ListenAddress) -> bool;
}

/// Runs `docker -H <address> info` and treats a zero exit as ready.
pub struct DockerInfoProbe {
    client: String,
    timeout: Duration,
}

impl DockerInfoProbe {
    pub fn new() -> Self {
        Self {
            client: "docker".to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = client.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for DockerInfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadinessProbe for DockerInfoProbe {
    async fn probe(&self, address: &ListenAddress) -> bool {
        let host = address.to_string();
        let mut cmd = Command::new(&self.client);
        cmd.args(["-H", host.as_str(), "info"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.status()).await {
            Ok(Ok(status)) => {
                trace!(address = %address, success = status.success(), "Readiness probe finished");
                status.success()
            }
            Ok(Err(e)) => {
                trace!(address = %address, "Readiness probe could not run: {}", e);
                false
            }
            Err(_) => {
                trace!(address = %address, "Readiness probe timed out");
                false
            }
        }
    }
}
