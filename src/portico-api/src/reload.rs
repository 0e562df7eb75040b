use async_trait::async_trait;
use portico_errors::{ControlError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

/// Hook that makes the proxying data plane pick up new configuration.
#[async_trait]
pub trait Reloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Runs a fixed command, `nginx -s reload` by default.
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandReloader {
    pub fn new(command: &[String], timeout: Duration) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("reload command is empty"))?;
        Ok(Self { program: program.clone(), args: args.to_vec(), timeout })
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Reloader for CommandReloader {
    async fn reload(&self) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControlError::DataPlane(format!("could not run `{}`: {e}", self.display())))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|e| ControlError::DataPlane(format!("`{}` failed: {e}", self.display())))?,
            Err(_) => {
                warn!(command = %self.display(), "data-plane reload timed out");
                return Err(ControlError::DataPlane(format!(
                    "`{}` timed out after {:?}",
                    self.display(),
                    self.timeout
                )));
            }
        };

        if output.status.success() {
            info!(command = %self.display(), "data plane reloaded");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        warn!(command = %self.display(), status = %output.status, "data-plane reload failed: {stderr}");
        Err(ControlError::DataPlane(if stderr.is_empty() {
            format!("`{}` exited with {}", self.display(), output.status)
        } else {
            format!("`{}` exited with {}: {stderr}", self.display(), output.status)
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandReloader::new(&[], Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn successful_command() {
        let r = CommandReloader::new(&cmd(&["true"]), Duration::from_secs(5)).unwrap();
        r.reload().await.unwrap();
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let r = CommandReloader::new(
            &cmd(&["sh", "-c", "echo 'nginx: [emerg] unknown directive' >&2; exit 1"]),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = r.reload().await.unwrap_err();
        assert!(matches!(err, ControlError::DataPlane(_)));
        assert!(err.to_string().contains("unknown directive"));
    }

    #[tokio::test]
    async fn missing_binary_and_timeout() {
        let r = CommandReloader::new(&cmd(&["/nonexistent/nginx"]), Duration::from_secs(5)).unwrap();
        assert!(matches!(r.reload().await, Err(ControlError::DataPlane(_))));

        let r = CommandReloader::new(&cmd(&["sleep", "5"]), Duration::from_millis(100)).unwrap();
        let err = r.reload().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
