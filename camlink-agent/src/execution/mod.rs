//! Command execution for CamLink agents
//!
//! Only allow-listed diagnostic commands run: the requested program must be
//! one of the configured names (or their full path) and the arguments must be
//! exactly the configured ones. The configured path is what gets executed,
//! bounded by `min(request timeout, max_command_secs)`. Anything that prevents
//! the command from producing an exit code ends up in the response's `error`.

use camlink_kernel::local::run_command;
use camlink_kernel::protocol::{CommandRequest, CommandResponse};
use camlink_kernel::{CommandOutput, CommandSpec};
use chrono::Utc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AllowedCommand;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("program not allowed: {0}")]
    NotAllowed(String),

    #[error("arguments not allowed for {program}: {args:?}")]
    ArgumentsNotAllowed { program: String, args: Vec<String> },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

pub struct CommandExecutor {
    agent_id: String,
    allowed: Vec<AllowedCommand>,
    max_command: Duration,
}

impl CommandExecutor {
    pub fn new(agent_id: impl Into<String>, allowed: Vec<AllowedCommand>, max_command: Duration) -> Self {
        Self { agent_id: agent_id.into(), allowed, max_command }
    }

    /// Maps a request onto the configured command it names, or refuses it.
    pub fn resolve(&self, program: &str, args: &[String]) -> Result<CommandSpec, ExecutionError> {
        let mut named = self
            .allowed
            .iter()
            .filter(|c| c.name == program || c.path == program)
            .peekable();
        if named.peek().is_none() {
            return Err(ExecutionError::NotAllowed(program.to_string()));
        }
        named
            .find(|c| c.args == args)
            .map(|c| CommandSpec::new(c.path.as_str(), c.args.iter().cloned()))
            .ok_or_else(|| ExecutionError::ArgumentsNotAllowed {
                program: program.to_string(),
                args: args.to_vec(),
            })
    }

    pub fn effective_timeout(&self, request: &CommandRequest) -> Duration {
        Duration::from_secs(request.timeout_seconds.max(1)).min(self.max_command)
    }

    pub async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, ExecutionError> {
        let command = self.resolve(&request.program, &request.args)?;
        let timeout = self.effective_timeout(request);
        debug!("Executing `{command}` (timeout: {timeout:?})");

        match tokio::time::timeout(timeout, run_command(&command)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(ExecutionError::Spawn { program: request.program.clone(), source }),
            Err(_) => Err(ExecutionError::Timeout(timeout)),
        }
    }

    /// Runs the request and always produces a response for the kernel.
    pub async fn execute(&self, request: &CommandRequest) -> CommandResponse {
        let started = Instant::now();
        let outcome = self.run(request).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let mut response = CommandResponse {
            command_id: request.command_id.clone(),
            agent_id: self.agent_id.clone(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            execution_time_ms,
            timestamp: Utc::now().to_rfc3339(),
        };

        match outcome {
            Ok(output) => {
                info!("Command {} finished with exit code {}", request.command_id, output.exit_code);
                response.exit_code = Some(output.exit_code);
                response.stdout = output.stdout_text().into_owned();
                response.stderr = output.stderr_text().into_owned();
            }
            Err(e) => {
                warn!("Command {} failed: {e}", request.command_id);
                response.error = Some(e.to_string());
            }
        }
        response
    }
}
