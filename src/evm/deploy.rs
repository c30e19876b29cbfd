//! External deploy tool for `contractFile` launches
//!
//! Compilation, deployment and forking are left to a separate program. It is
//! run once per launch and must print a JSON [`Deployment`] on stdout.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::common::{Error, Result};

use super::backend::{DeployRequest, Deployer, Deployment};

/// Runs a configured program to deploy a contract
#[derive(Debug, Clone)]
pub struct CommandDeployer {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandDeployer {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Command line for a request, after the configured arguments
    pub fn arguments(&self, request: &DeployRequest) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--contract-file".into());
        args.push(request.contract_file.display().to_string());
        args.push("--rpc".into());
        args.push(request.rpc_url.clone());
        for arg in &request.constructor_args {
            args.push("--constructor-arg".into());
            args.push(match arg {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        if let Some(url) = &request.fork_url {
            args.push("--fork-url".into());
            args.push(url.clone());
        }
        if let Some(block) = request.fork_block {
            args.push("--fork-block".into());
            args.push(block.to_string());
        }
        args.push("--fork-port".into());
        args.push(request.fork_port.to_string());
        if request.reuse_fork {
            args.push("--reuse-fork".into());
        }
        if request.keep_fork {
            args.push("--keep-fork".into());
        }
        if !request.auto_snapshot {
            args.push("--no-snapshot".into());
        }
        args
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<Deployment> {
        let args = self.arguments(request);
        tracing::debug!(program = %self.program.display(), ?args, "Running deploy tool");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                Error::Deploy(format!("Failed to start {}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Deploy(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Deploy(format!("Unexpected deploy tool output: {}", e)))
    }
}
