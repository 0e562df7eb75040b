use async_trait::async_trait;
use portico_core::Credential;
use portico_errors::{ControlError, Result};
use reqwest::Client;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// External service that installs and removes the proxy agent on a host.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, target: SocketAddr, username: &str, credential: &Credential) -> Result<()>;
    async fn deprovision(&self, target: SocketAddr) -> Result<()>;
}

/// Provisioning service reached over HTTP.
///
/// `POST {base}/provision` with the host and credential, and
/// `DELETE {base}/provision/{ip}/{port}` to tear the agent down.
pub struct HttpProvisioner {
    base_url: String,
    client: Client,
}

impl HttpProvisioner {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), client })
    }

    fn base(&self) -> Result<&str> {
        if self.base_url.is_empty() {
            Err(ControlError::upstream("no provisioning service configured"))
        } else {
            Ok(&self.base_url)
        }
    }
}

async fn check(resp: reqwest::Response, action: &str) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = body.trim();
    Err(ControlError::upstream(if detail.is_empty() {
        format!("{action} returned {status}")
    } else {
        format!("{action} returned {status}: {}", detail.chars().take(512).collect::<String>())
    }))
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn provision(&self, target: SocketAddr, username: &str, credential: &Credential) -> Result<()> {
        let url = format!("{}/provision", self.base()?);
        let mut body = json!({
            "ip": target.ip().to_string(),
            "port": target.port(),
            "username": username,
        });
        match credential {
            Credential::Password(p) => body["password"] = json!(p),
            Credential::PrivateKey(k) => body["privateKey"] = json!(k),
        }
        debug!(target = %target, credential = credential.kind(), "requesting provisioning");
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ControlError::upstream(format!("provisioning request failed: {e}")))?;
        check(resp, "provisioning").await
    }

    async fn deprovision(&self, target: SocketAddr) -> Result<()> {
        let url = format!("{}/provision/{}/{}", self.base()?, target.ip(), target.port());
        debug!(target = %target, "requesting deprovisioning");
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| ControlError::upstream(format!("deprovisioning request failed: {e}")))?;
        check(resp, "deprovisioning").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubServer;
    use hyper::StatusCode;

    #[tokio::test]
    async fn unconfigured_service_is_an_upstream_error() {
        let p = HttpProvisioner::new("", Duration::from_secs(1)).unwrap();
        let target: SocketAddr = "10.0.0.1:3000".parse().unwrap();
        let err = p.provision(target, "root", &Credential::Password("p".into())).await.unwrap_err();
        assert!(matches!(err, ControlError::Upstream(_)));
        assert!(p.deprovision(target).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_service_is_an_upstream_error() {
        let p = HttpProvisioner::new("http://127.0.0.1:1/", Duration::from_millis(500)).unwrap();
        let target: SocketAddr = "10.0.0.1:3000".parse().unwrap();
        let err = p.provision(target, "root", &Credential::PrivateKey("KEY".into())).await.unwrap_err();
        assert!(matches!(err, ControlError::Upstream(_)));
    }

    #[tokio::test]
    async fn provision_posts_host_and_password() {
        let stub = StubServer::start(StatusCode::CREATED, "").await;
        let p = HttpProvisioner::new(&format!("{}/", stub.url()), Duration::from_secs(2)).unwrap();
        let target: SocketAddr = "10.0.0.1:3000".parse().unwrap();
        p.provision(target, "root", &Credential::Password("pw".into())).await.unwrap();

        let seen = stub.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path, "/provision");
        assert_eq!(
            seen[0].body,
            json!({ "ip": "10.0.0.1", "port": 3000, "username": "root", "password": "pw" })
        );
    }

    #[tokio::test]
    async fn provision_sends_private_key_in_camel_case() {
        let stub = StubServer::start(StatusCode::OK, "").await;
        let p = HttpProvisioner::new(&stub.url(), Duration::from_secs(2)).unwrap();
        let target: SocketAddr = "[2001:db8::7]:8080".parse().unwrap();
        p.provision(target, "ops", &Credential::PrivateKey("-----KEY-----".into())).await.unwrap();

        let body = &stub.requests()[0].body;
        assert_eq!(body["ip"], "2001:db8::7");
        assert_eq!(body["port"], 8080);
        assert_eq!(body["privateKey"], "-----KEY-----");
        assert!(body.get("password").is_none());
    }

    #[tokio::test]
    async fn non_success_status_carries_the_reply() {
        let stub = StubServer::start(StatusCode::INTERNAL_SERVER_ERROR, "ssh: auth failed").await;
        let p = HttpProvisioner::new(&stub.url(), Duration::from_secs(2)).unwrap();
        let target: SocketAddr = "10.0.0.1:3000".parse().unwrap();

        let err = p.provision(target, "root", &Credential::Password("pw".into())).await.unwrap_err();
        assert!(matches!(&err, ControlError::Upstream(m) if m.contains("500") && m.contains("ssh: auth failed")));
        assert!(matches!(p.deprovision(target).await, Err(ControlError::Upstream(_))));
    }

    #[tokio::test]
    async fn deprovision_deletes_by_address() {
        let stub = StubServer::start(StatusCode::NO_CONTENT, "").await;
        let p = HttpProvisioner::new(&stub.url(), Duration::from_secs(2)).unwrap();
        p.deprovision("10.0.0.1:3000".parse().unwrap()).await.unwrap();
        p.deprovision("[2001:db8::7]:8080".parse().unwrap()).await.unwrap();

        let seen: Vec<(String, String)> =
            stub.requests().into_iter().map(|r| (r.method, r.path)).collect();
        assert_eq!(
            seen,
            vec![
                ("DELETE".to_string(), "/provision/10.0.0.1/3000".to_string()),
                ("DELETE".to_string(), "/provision/2001:db8::7/8080".to_string()),
            ]
        );
    }
}
