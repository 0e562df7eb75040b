use async_trait::async_trait;
use portico_errors::{ControlError, Result};
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;

/// Liveness check against a managed proxy's agent.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, target: SocketAddr) -> Result<()>;
}

/// `GET http://{ip}:{port}{path}`; any 2xx counts as healthy.
pub struct HttpHealthProbe {
    client: Client,
    path: String,
}

impl HttpHealthProbe {
    pub fn new(path: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        Ok(Self { client, path })
    }

    pub fn url(&self, target: SocketAddr) -> String {
        format!("http://{}{}", target, self.path)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, target: SocketAddr) -> Result<()> {
        let resp = self
            .client
            .get(self.url(target))
            .send()
            .await
            .map_err(|e| ControlError::upstream(format!("health probe failed: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ControlError::upstream(format!("health probe returned {}", resp.status())))
        }
    }
}
