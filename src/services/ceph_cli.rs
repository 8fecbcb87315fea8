//! Ceph administrative CLI access
//!
//! Commands are plain `ceph ...` strings. [`ToolboxCli`] runs them through a
//! configurable prefix, by default `kubectl exec` into the rook toolbox deployment.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::config::CephCliConfig;

/// Runs ceph commands and returns stdout
#[async_trait]
pub trait CephCli: Send + Sync {
    async fn run(&self, command: &str) -> Result<String>;
}

/// Run a command and parse its stdout as JSON
pub async fn run_json<T: DeserializeOwned>(cli: &dyn CephCli, command: &str) -> Result<T> {
    let output = cli.run(command).await?;
    serde_json::from_str(&output)
        .with_context(|| format!("failed to parse output for command '{}'", command))
}

/// CLI executor backed by a local process
pub struct ToolboxCli {
    prefix: Vec<String>,
    timeout: Duration,
}

impl ToolboxCli {
    pub fn new(config: &CephCliConfig) -> Self {
        Self {
            prefix: config.command_prefix.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn build_command(&self, command: &str) -> Result<Command> {
        let mut argv = self
            .prefix
            .iter()
            .map(String::as_str)
            .chain(command.split_whitespace());
        let program = argv
            .next()
            .with_context(|| format!("empty command line for '{}'", command))?;
        let mut cmd = Command::new(program);
        cmd.args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl CephCli for ToolboxCli {
    async fn run(&self, command: &str) -> Result<String> {
        debug!("running ceph command '{}'", command);
        let mut child = self
            .build_command(command)?
            .spawn()
            .with_context(|| format!("failed to spawn command '{}'", command))?;

        let mut stdout = child.stdout.take().context("stdout is not captured")?;
        let mut stderr = child.stderr.take().context("stderr is not captured")?;

        let result = timeout(self.timeout, async {
            let mut out = String::new();
            let mut err = String::new();
            let (out_res, err_res, status) = tokio::join!(
                stdout.read_to_string(&mut out),
                stderr.read_to_string(&mut err),
                child.wait()
            );
            out_res?;
            err_res?;
            Ok::<_, std::io::Error>((out, err, status?))
        })
        .await;

        match result {
            Ok(Ok((out, err, status))) => {
                if status.success() {
                    Ok(out)
                } else {
                    error!("ceph command '{}' failed: {}", command, err.trim());
                    anyhow::bail!(
                        "command '{}' failed with {}: {}",
                        command,
                        status,
                        err.trim()
                    )
                }
            }
            Ok(Err(e)) => Err(e).with_context(|| format!("failed to run command '{}'", command)),
            Err(_) => anyhow::bail!(
                "command '{}' timed out after {}s",
                command,
                self.timeout.as_secs()
            ),
        }
    }
}
