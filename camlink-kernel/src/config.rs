use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

use crate::probe::{MACOS_CAMERA_PATTERN, WINDOWS_CAMERA_PATTERN};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub mqtt: MqttConf,
    pub refresh: RefreshConf,
    pub probe: ProbeConfig,
    pub agents: AgentsConf,
    pub local_node: LocalNodeConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RefreshConf {
    pub period_secs: u64,
    pub probe_timeout_secs: u64,
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConfig {
    pub devcon_path: String, // installé à côté de l'agent Windows
    pub windows_pattern: String,
    pub macos_pattern: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AgentsConf {
    pub offline_after_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LocalNodeConf {
    pub enabled: bool,
    pub name: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "camlink-kernel".into(),
            keep_alive_secs: 15,
        }
    }
}

impl Default for RefreshConf {
    fn default() -> Self {
        Self { period_secs: 60, probe_timeout_secs: 30, max_concurrency: None }
    }
}

impl RefreshConf {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            devcon_path: "devcon.exe".into(),
            windows_pattern: WINDOWS_CAMERA_PATTERN.into(),
            macos_pattern: MACOS_CAMERA_PATTERN.into(),
        }
    }
}

impl Default for AgentsConf {
    fn default() -> Self {
        Self { offline_after_secs: 120, sweep_interval_secs: 60 }
    }
}

impl AgentsConf {
    pub fn offline_after(&self) -> Duration {
        Duration::from_secs(self.offline_after_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for LocalNodeConf {
    fn default() -> Self {
        Self { enabled: true, name: "controller".into() }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("CAMLINK_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        warn!("[kernel] no {}, using default config", path.display());
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!("[kernel] invalid config {}: {e}", path.display());
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.yaml")).await;
        assert_eq!(cfg.refresh.period_secs, 60);
        assert_eq!(cfg.probe.devcon_path, "devcon.exe");
        assert!(cfg.local_node.enabled);
    }

    #[tokio::test]
    async fn test_partial_yaml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "refresh:\n  probe_timeout_secs: 10\n  max_concurrency: 8\nprobe:\n  devcon_path: 'C:\\tools\\devcon.exe'\nmqtt:\n  host: broker.lan"
        )
        .unwrap();

        let cfg = load_config_from(file.path()).await;
        assert_eq!(cfg.refresh.probe_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.refresh.max_concurrency, Some(8));
        assert_eq!(cfg.refresh.period_secs, 60);
        assert_eq!(cfg.probe.devcon_path, "C:\\tools\\devcon.exe");
        assert_eq!(cfg.probe.macos_pattern, MACOS_CAMERA_PATTERN);
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1883);
    }

    #[tokio::test]
    async fn test_invalid_yaml_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "refresh: [not, a, map").unwrap();
        let cfg = load_config_from(file.path()).await;
        assert_eq!(cfg.refresh.probe_timeout_secs, 30);
    }

    #[test]
    fn test_zero_durations_are_clamped() {
        let refresh = RefreshConf { period_secs: 0, probe_timeout_secs: 0, max_concurrency: None };
        assert_eq!(refresh.period(), Duration::from_secs(1));
        assert_eq!(refresh.probe_timeout(), Duration::from_secs(1));
    }
}
