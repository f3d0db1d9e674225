//! Agent configuration
//!
//! TOML file at `<config_dir>/camlink-agent/config.toml` (or the path in
//! `CAMLINK_AGENT_CONFIG`). Every section is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "CAMLINK_AGENT_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mqtt: MqttConfig,
    pub agent: AgentInfo,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInfo {
    /// Overrides the MAC-derived id.
    pub agent_id: Option<String>,
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// The only commands the kernel may run here.
    pub allowed_commands: Vec<AllowedCommand>,
    pub max_command_secs: u64,
}

/// One diagnostic command: the program the kernel asks for, the binary that
/// actually runs on this host and the exact argument vector accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedCommand {
    /// `program` as sent by the kernel, matched exactly (`devcon.exe`).
    pub name: String,
    /// Full path executed on this host.
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl AllowedCommand {
    pub fn new<I, S>(name: &str, path: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { name: name.to_string(), path: path.to_string(), args: args.into_iter().map(Into::into).collect() }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { broker_host: "127.0.0.1".to_string(), broker_port: 1883, keep_alive_secs: 30 }
    }
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self { agent_id: None, heartbeat_interval_secs: 30 }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            allowed_commands: vec![
                AllowedCommand::new(
                    "devcon.exe",
                    r"C:\Program Files (x86)\Windows Kits\10\Tools\x64\devcon.exe",
                    ["Status", "=Image"],
                ),
                AllowedCommand::new("system_profiler", "/usr/sbin/system_profiler", ["SPCameraDataType"]),
            ],
            max_command_secs: 120,
        }
    }
}

impl AgentInfo {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

impl ExecutionConfig {
    pub fn max_command(&self) -> Duration {
        Duration::from_secs(self.max_command_secs.max(1))
    }
}

impl AgentConfig {
    /// Load config from `CAMLINK_AGENT_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self> {
        let path = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::config_file_path()?,
        };
        Self::load_from(&path).await
    }

    /// Absent file = defaults; an unreadable or invalid file is an error.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("camlink-agent");
        path.push("config.toml");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("config.toml")).await.unwrap();
        assert_eq!(config.mqtt.broker_port, 1883);
        let names: Vec<&str> = config.execution.allowed_commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["devcon.exe", "system_profiler"]);
        assert_eq!(config.execution.allowed_commands[1].path, "/usr/sbin/system_profiler");
        assert_eq!(config.execution.allowed_commands[1].args, vec!["SPCameraDataType"]);
        assert!(config.agent.agent_id.is_none());
    }

    #[tokio::test]
    async fn test_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[mqtt]\nbroker_host = \"broker.lan\"\n\n[execution]\nmax_command_secs = 20"
        )
        .unwrap();

        let config = AgentConfig::load_from(file.path()).await.unwrap();
        assert_eq!(config.mqtt.broker_host, "broker.lan");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.execution.max_command(), Duration::from_secs(20));
        assert_eq!(config.execution.allowed_commands.len(), 2);
    }

    #[tokio::test]
    async fn test_allowed_commands_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[execution.allowed_commands]]\nname = \"devcon.exe\"\npath = 'D:\\wdk\\devcon.exe'\nargs = [\"Status\", \"=Image\"]"
        )
        .unwrap();

        let config = AgentConfig::load_from(file.path()).await.unwrap();
        assert_eq!(
            config.execution.allowed_commands,
            vec![AllowedCommand::new("devcon.exe", "D:\\wdk\\devcon.exe", ["Status", "=Image"])]
        );
    }

    #[tokio::test]
    async fn test_invalid_toml_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt\nbroker_port = \"nope\"").unwrap();
        assert!(AgentConfig::load_from(file.path()).await.is_err());
    }

    #[test]
    fn test_config_file_path() {
        if let Ok(path) = AgentConfig::config_file_path() {
            assert!(path.ends_with("camlink-agent/config.toml"));
        }
    }
}
