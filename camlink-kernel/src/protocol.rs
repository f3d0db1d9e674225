//! MQTT topics and JSON payloads shared by the kernel and the agents.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{CommandOutput, CommandSpec};

pub const REGISTRATION_TOPIC: &str = "camlink/agents/registration@v1";
pub const HEARTBEAT_TOPIC: &str = "camlink/agents/heartbeat@v1";
pub const OFFLINE_TOPIC: &str = "camlink/agents/offline@v1";
pub const RESPONSE_TOPIC: &str = "camlink/agents/response@v1";
pub const COMMAND_TOPIC_PREFIX: &str = "camlink/agents/command@v1";

/// Per-agent command topic: `camlink/agents/command@v1/{agent_id}`.
pub fn command_topic(agent_id: &str) -> String {
    format!("{COMMAND_TOPIC_PREFIX}/{agent_id}")
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

// agent → kernel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub hostname: String,
    pub os: String, // std::env::consts::OS : windows, macos, linux...
    pub architecture: String,
    pub version: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHeartbeat {
    pub agent_id: String,
    pub status: String,
    pub timestamp: String,
}

/// Publié par l'agent à l'arrêt, ou par le broker (last will) s'il disparaît.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOffline {
    pub agent_id: String,
    pub reason: Option<String>,
}

// kernel → agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command_id: String,
    pub agent_id: String,
    pub program: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    pub timestamp: String,
}

impl CommandRequest {
    pub fn new(agent_id: &str, command: &CommandSpec, timeout: Duration) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            program: command.program.clone(),
            args: command.args.clone(),
            timeout_seconds: timeout.as_secs().max(1),
            timestamp: now_rfc3339(),
        }
    }

    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(self.program.as_str(), self.args.iter().cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub agent_id: String,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Set when the command could not run at all (refused, spawn failure, timeout).
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
    pub timestamp: String,
}

impl CommandResponse {
    pub fn into_output(self) -> Result<CommandOutput, String> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(CommandOutput {
            exit_code: self.exit_code.unwrap_or(-1),
            stdout: self.stdout.into_bytes(),
            stderr: self.stderr.into_bytes(),
        })
    }
}
