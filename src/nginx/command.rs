//! The two operations the control plane performs on the running proxy server.

use crate::error::Error;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Result of a proxy server operation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    /// The proxy server isn't present in this topology (e.g. a development machine without
    /// nginx installed), so the operation was skipped.
    Skipped(String),
}

#[async_trait::async_trait]
pub trait ProxyServerControl {
    /// Check the on-disk configuration without reloading.
    async fn test_config(&self) -> Result<CommandOutcome, Error>;
    async fn reload(&self) -> Result<CommandOutcome, Error>;
}

pub type DynControl = Arc<dyn ProxyServerControl + Send + Sync>;

/// Shell exit status for "command not found".
const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Output showing the binary or a running master process is missing. `nginx -s reload` against
/// a stopped server reports the pid file or a dead pid.
const ABSENT_MARKERS: [&str; 5] = [
    "command not found",
    "No such container",
    "executable file not found",
    "nginx.pid\" failed",
    "No such process",
];

/// Runs the configured nginx commands through `sh -c`.
#[derive(Debug, Clone)]
pub struct NginxCommand {
    test_command: String,
    reload_command: String,
}

impl NginxCommand {
    #[must_use]
    pub fn new(test_command: impl Into<String>, reload_command: impl Into<String>) -> Self {
        NginxCommand {
            test_command: test_command.into(),
            reload_command: reload_command.into(),
        }
    }

    async fn run(command_line: &str) -> Result<CommandOutcome, Error> {
        debug!("running `{command_line}`");
        let output = match Command::new("sh").arg("-c").arg(command_line).output().await {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CommandOutcome::Skipped(format!("no shell available: {err}")));
            }
            Err(err) => return Err(err.into()),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let text = text.trim().to_string();

        if output.status.success() {
            return Ok(CommandOutcome::Applied);
        }
        if output.status.code() == Some(EXIT_COMMAND_NOT_FOUND)
            || ABSENT_MARKERS.iter().any(|marker| text.contains(marker))
        {
            info!("proxy server not present, skipped `{command_line}`");
            return Ok(CommandOutcome::Skipped(text));
        }
        Err(Error::external("nginx", format!("`{command_line}` failed: {text}")))
    }
}

#[async_trait::async_trait]
impl ProxyServerControl for NginxCommand {
    async fn test_config(&self) -> Result<CommandOutcome, Error> {
        Self::run(&self.test_command).await
    }

    async fn reload(&self) -> Result<CommandOutcome, Error> {
        Self::run(&self.reload_command).await
    }
}
