use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCfg {
    #[serde(default = "def_host")]
    pub host: String,
    #[serde(default = "def_port")]
    pub port: u16,
    #[serde(default = "def_name")]
    pub name: String,
    /// Origin allowed to call the API from a browser dashboard.
    #[serde(default = "def_cors")]
    pub cors_origin: String,
    #[serde(default = "def_logging_level")]
    pub logging_level: String,
    /// plain | pretty | json
    #[serde(default = "def_logging_format")]
    pub logging_format: String,
}
fn def_host() -> String { "0.0.0.0".into() }
fn def_port() -> u16 { 3000 }
fn def_name() -> String { "portico".into() }
fn def_cors() -> String { "*".into() }
fn def_logging_level() -> String { "info".into() }
fn def_logging_format() -> String { "plain".into() }

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            host: def_host(),
            port: def_port(),
            name: def_name(),
            cors_origin: def_cors(),
            logging_level: def_logging_level(),
            logging_format: def_logging_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCfg {
    #[serde(default = "def_username")]
    pub username: String,
    /// Plaintext password, hashed once at startup. Prefer `password_hash`.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub salt: String,
    #[serde(default = "def_token_ttl")]
    pub token_ttl_sec: u64,
    #[serde(default = "def_max_tokens")]
    pub max_tokens: u64,
}
fn def_username() -> String { "admin".into() }
fn def_token_ttl() -> u64 { 12 * 60 * 60 }
fn def_max_tokens() -> u64 { 10_000 }

impl Default for AuthCfg {
    fn default() -> Self {
        Self {
            username: def_username(),
            password: String::new(),
            password_hash: String::new(),
            salt: String::new(),
            token_ttl_sec: def_token_ttl(),
            max_tokens: def_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCfg {
    #[serde(default = "def_engine")]
    pub engine: String, // lmdb | memory
    #[serde(default = "def_path")]
    pub path: String,
    #[serde(default = "def_flush")]
    pub flush_interval_sec: u64,
}
fn def_engine() -> String { "lmdb".into() }
fn def_path() -> String { "./data".into() }
fn def_flush() -> u64 { 5 }

impl Default for MemoryCfg {
    fn default() -> Self {
        Self { engine: def_engine(), path: def_path(), flush_interval_sec: def_flush() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetCfg {
    /// Base URL of the external provisioning service.
    #[serde(default)]
    pub provisioner_url: String,
    #[serde(default = "def_provision_timeout")]
    pub provision_timeout_sec: u64,
    #[serde(default = "def_health_interval")]
    pub health_interval_sec: u64,
    #[serde(default = "def_health_timeout")]
    pub health_timeout_ms: u64,
    #[serde(default = "def_health_path")]
    pub health_path: String,
    /// Consecutive failed probes before an active proxy is demoted.
    #[serde(default = "def_max_misses")]
    pub max_misses: u32,
}
fn def_provision_timeout() -> u64 { 600 }
fn def_health_interval() -> u64 { 15 }
fn def_health_timeout() -> u64 { 2000 }
fn def_health_path() -> String { "/healthz".into() }
fn def_max_misses() -> u32 { 3 }

impl Default for FleetCfg {
    fn default() -> Self {
        Self {
            provisioner_url: String::new(),
            provision_timeout_sec: def_provision_timeout(),
            health_interval_sec: def_health_interval(),
            health_timeout_ms: def_health_timeout(),
            health_path: def_health_path(),
            max_misses: def_max_misses(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPlaneCfg {
    #[serde(default = "def_reload_command")]
    pub reload_command: Vec<String>,
    #[serde(default = "def_reload_timeout")]
    pub reload_timeout_sec: u64,
}
fn def_reload_command() -> Vec<String> { vec!["nginx".into(), "-s".into(), "reload".into()] }
fn def_reload_timeout() -> u64 { 30 }

impl Default for DataPlaneCfg {
    fn default() -> Self {
        Self { reload_command: def_reload_command(), reload_timeout_sec: def_reload_timeout() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TracingCfg {
    #[serde(default)]
    pub otlp_endpoint: String,
    #[serde(default)]
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerCfg,
    #[serde(default)]
    pub auth: AuthCfg,
    #[serde(default)]
    pub memory: MemoryCfg,
    #[serde(default)]
    pub fleet: FleetCfg,
    #[serde(default)]
    pub dataplane: DataPlaneCfg,
    #[serde(default)]
    pub tracing: TracingCfg,
}

impl FileConfig {
    /// Rejects configurations the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.username.is_empty() {
            return Err(anyhow!("auth.username must not be empty"));
        }
        if self.auth.password.is_empty() && self.auth.password_hash.is_empty() {
            return Err(anyhow!("auth.password or auth.password_hash is required"));
        }
        if !self.auth.password_hash.is_empty() && self.auth.salt.is_empty() {
            return Err(anyhow!("auth.salt is required with auth.password_hash"));
        }
        if self.auth.token_ttl_sec == 0 {
            return Err(anyhow!("auth.token_ttl_sec must be positive"));
        }
        if self.fleet.health_interval_sec == 0 || self.memory.flush_interval_sec == 0 {
            return Err(anyhow!("intervals must be positive"));
        }
        if self.fleet.max_misses == 0 {
            return Err(anyhow!("fleet.max_misses must be at least 1"));
        }
        if self.dataplane.reload_command.is_empty() {
            return Err(anyhow!("dataplane.reload_command must not be empty"));
        }
        Ok(())
    }

    pub fn service_name(&self) -> &str {
        if self.tracing.service_name.is_empty() {
            &self.server.name
        } else {
            &self.tracing.service_name
        }
    }
}

pub fn parse_config(path: &str, content: &str) -> Result<FileConfig> {
    if path.ends_with(".yaml") || path.ends_with(".yml") {
        Ok(serde_yml::from_str(content)?)
    } else if path.ends_with(".json") {
        Ok(serde_json::from_str(content)?)
    } else if path.ends_with(".toml") {
        Ok(toml::from_str(content)?)
    } else {
        Err(anyhow!("Unknown config extension: {}", path))
    }
}

pub fn load_config(path: &str) -> Result<FileConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    let cfg = parse_config(path, &content).with_context(|| format!("parse config {}", path))?;
    cfg.validate().with_context(|| format!("invalid config {}", path))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn yaml_with_defaults() {
        let cfg = parse_config(
            "c.yaml",
            "auth:\n  password: hunter2\nfleet:\n  provisioner_url: http://prov:9000\n",
        )
        .unwrap();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.auth.username, "admin");
        assert_eq!(cfg.memory.engine, "lmdb");
        assert_eq!(cfg.fleet.max_misses, 3);
        assert_eq!(cfg.dataplane.reload_command, vec!["nginx", "-s", "reload"]);
        assert_eq!(cfg.service_name(), "portico");
        cfg.validate().unwrap();
    }

    #[test]
    fn toml_and_json_are_accepted() {
        let t = parse_config("c.toml", "[server]\nport = 8080\n[auth]\npassword = \"x\"\n").unwrap();
        assert_eq!(t.server.port, 8080);
        let j = parse_config("c.json", r#"{"memory":{"engine":"memory"},"auth":{"password":"x"}}"#).unwrap();
        assert_eq!(j.memory.engine, "memory");
    }

    #[test]
    fn unknown_extension_fails() {
        assert!(parse_config("c.ini", "").is_err());
    }

    #[test]
    fn missing_password_is_invalid() {
        let cfg = FileConfig::default();
        assert!(cfg.validate().is_err());

        let mut hashed = FileConfig::default();
        hashed.auth.password_hash = "abc".into();
        assert!(hashed.validate().is_err());
        hashed.auth.salt = "s".into();
        hashed.validate().unwrap();
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "server:\n  port: 4000\nauth:\n  password: pw").unwrap();
        let cfg = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.server.port, 4000);
        assert!(load_config("/nonexistent/portico.yaml").is_err());
    }
}
