//! The controller machine itself, probed like any other node.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::ProbeError;
use crate::models::{CommandOutput, CommandSpec, NodeId, OsFamily};
use crate::node::Node;

pub struct LocalNode {
    id: NodeId,
    os: OsFamily,
}

impl LocalNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: NodeId::new(name), os: OsFamily::current() }
    }

    pub fn with_os(name: impl Into<String>, os: OsFamily) -> Self {
        Self { id: NodeId::new(name), os }
    }
}

#[async_trait]
impl Node for LocalNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn os_family(&self) -> OsFamily {
        self.os.clone()
    }

    fn is_online(&self) -> bool {
        true
    }

    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput, ProbeError> {
        run_command(command).await.map_err(|e| ProbeError::Transport {
            node: self.id.clone(),
            reason: format!("failed to launch `{command}`: {e}"),
        })
    }
}

/// Runs `command` with stdout/stderr captured. The child is killed if the
/// returned future is dropped (deadline reached).
pub async fn run_command(command: &CommandSpec) -> std::io::Result<CommandOutput> {
    let output = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
