use chrono::{DateTime, Utc};
use portico_errors::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use url::Url;

// ---------- routes ----------

/// A path mapped to an ordered rotation of upstream targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub path: String,
    pub targets: Vec<String>,
    /// Index of the target handed out by the next selection.
    pub current: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Body of a route registration. Client-supplied `id`/`current` are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRoute {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Fields replaced by an edit; absent fields are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub targets: Option<Vec<String>>,
}

pub fn validate_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(ControlError::validation(format!("route path `{path}` must start with `/`")));
    }
    if path.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ControlError::validation("route path must not contain whitespace"));
    }
    Ok(path.to_string())
}

/// Trims targets and checks each is an absolute http(s) URL with a host.
pub fn validate_targets(targets: Vec<String>) -> Result<Vec<String>> {
    if targets.is_empty() {
        return Err(ControlError::validation("a route needs at least one target"));
    }
    targets
        .into_iter()
        .map(|raw| {
            let target = raw.trim().to_string();
            let url = Url::parse(&target)
                .map_err(|e| ControlError::validation(format!("target `{target}` is not a URL: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(ControlError::validation(format!(
                    "target `{target}` must be an http or https URL"
                )));
            }
            Ok(target)
        })
        .collect()
}

/// Empty display strings are treated as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ---------- metrics ----------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEntry {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

// ---------- managed proxies ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Inactive,
    Deploying,
    Active,
    Error,
}

impl ProxyStatus {
    /// Edges of the deployment state machine. Removal is not a state.
    pub fn can_transition_to(self, next: ProxyStatus) -> bool {
        use ProxyStatus::*;
        matches!(
            (self, next),
            (Deploying, Active) | (Deploying, Error) | (Active, Error) | (Error, Deploying)
        )
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyStatus::Inactive => "inactive",
            ProxyStatus::Deploying => "deploying",
            ProxyStatus::Active => "active",
            ProxyStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedProxy {
    pub id: String,
    pub ip: IpAddr,
    pub port: u16,
    pub status: ProxyStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ManagedProxy {
    pub fn key(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Fleet table row: the public proxy plus reconciliation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub proxy: ManagedProxy,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Consecutive failed health probes while active.
    #[serde(default)]
    pub misses: u32,
    /// Number of the provisioning attempt whose outcome may still be applied.
    #[serde(default)]
    pub attempt: u64,
}

impl ProxyRecord {
    pub fn key(&self) -> SocketAddr {
        self.proxy.key()
    }

    /// Moves to `next` if the state machine allows it.
    pub fn transition(&mut self, next: ProxyStatus) -> Result<()> {
        if !self.proxy.status.can_transition_to(next) {
            return Err(ControlError::conflict(format!(
                "proxy {} cannot move from {} to {}",
                self.key(),
                self.proxy.status,
                next
            )));
        }
        self.proxy.status = next;
        Ok(())
    }
}

/// Detail view of a proxy, including the last recorded failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDetail {
    #[serde(flatten)]
    pub proxy: ManagedProxy,
    pub last_error: Option<String>,
    pub consecutive_misses: u32,
}

impl From<ProxyRecord> for ProxyDetail {
    fn from(r: ProxyRecord) -> Self {
        Self { proxy: r.proxy, last_error: r.last_error, consecutive_misses: r.misses }
    }
}

/// Secret used to reach a host being provisioned. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey(String),
}

impl Credential {
    /// Builds the variant from the wire's two optional fields; exactly one must be set.
    pub fn from_parts(password: Option<String>, private_key: Option<String>) -> Result<Self> {
        let password = password.filter(|p| !p.is_empty());
        let private_key = private_key.filter(|k| !k.trim().is_empty());
        match (password, private_key) {
            (Some(p), None) => Ok(Credential::Password(p)),
            (None, Some(k)) => Ok(Credential::PrivateKey(k)),
            (Some(_), Some(_)) => Err(ControlError::validation(
                "supply either password or privateKey, not both",
            )),
            (None, None) => Err(ControlError::validation("password or privateKey is required")),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey(_) => "private_key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{}(<redacted>)", self.kind())
    }
}

/// Body of an add/retry request, as sent by the dashboard.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    #[serde(default)]
    pub ip: String,
    #[serde(default = "def_agent_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
}
fn def_agent_port() -> u16 { 3000 }

impl fmt::Debug for ProxyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRequest")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ProxyRequest {
    pub fn credential(&self) -> Result<Credential> {
        Credential::from_parts(self.password.clone(), self.private_key.clone())
    }
}

pub fn parse_ip(ip: &str) -> Result<IpAddr> {
    ip.trim()
        .parse()
        .map_err(|_| ControlError::validation(format!("`{ip}` is not an IP address")))
}

pub fn proxy_key(ip: &str, port: u16) -> Result<SocketAddr> {
    if port == 0 {
        return Err(ControlError::validation("port must be between 1 and 65535"));
    }
    Ok(SocketAddr::new(parse_ip(ip)?, port))
}
