/*!
# NODE PROBE - Liste les caméras branchées sur un nœud

RÔLE : choisit la commande de diagnostic selon l'OS du nœud, l'exécute via le
nœud, puis extrait un [`Device`] par ligne qui matche le motif de la famille.

- Windows : `devcon.exe Status =Image`, motif `.*Name: (.*)`
- macOS   : `system_profiler SPCameraDataType`, motif `.*Model ID: (.*)`
- autre OS : liste vide, pas d'erreur

Un code de sortie non nul est un échec "doux" (log + liste vide). Seules les
erreurs de transport remontent, et c'est l'orchestrateur qui les absorbe.
*/

use regex::Regex;
use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::error::{PatternError, ProbeError};
use crate::models::{CommandSpec, Device, NodeId, OsFamily};
use crate::node::Node;

pub const WINDOWS_CAMERA_PATTERN: &str = ".*Name: (.*)";
pub const MACOS_CAMERA_PATTERN: &str = ".*Model ID: (.*)";

pub struct NodeProbe {
    devcon_path: String,
    windows_pattern: Regex,
    macos_pattern: Regex,
}

impl NodeProbe {
    pub fn new(cfg: &ProbeConfig) -> Result<Self, PatternError> {
        Ok(Self {
            devcon_path: cfg.devcon_path.clone(),
            windows_pattern: compile_pattern(&cfg.windows_pattern)?,
            macos_pattern: compile_pattern(&cfg.macos_pattern)?,
        })
    }

    /// Commande et motif pour une famille d'OS, `None` si non supportée.
    pub fn diagnostic_for(&self, os: &OsFamily) -> Option<(CommandSpec, &Regex)> {
        match os {
            OsFamily::Windows => Some((
                CommandSpec::new(self.devcon_path.as_str(), ["Status", "=Image"]),
                &self.windows_pattern,
            )),
            OsFamily::MacOs => Some((
                CommandSpec::new("system_profiler", ["SPCameraDataType"]),
                &self.macos_pattern,
            )),
            OsFamily::Unsupported(_) => None,
        }
    }

    pub async fn probe(&self, node: &dyn Node) -> Result<Vec<Device>, ProbeError> {
        let os = node.os_family();
        let Some((command, pattern)) = self.diagnostic_for(&os) else {
            debug!(node = %node.id(), os = %os, "[probe] no camera listing for this OS");
            return Ok(Vec::new());
        };

        debug!(node = %node.id(), command = %command, "[probe] getting cameras");
        let output = node.execute(&command).await?;

        for line in output.stderr_text().lines().filter(|l| !l.trim().is_empty()) {
            debug!(node = %node.id(), "[probe] stderr: {line}");
        }

        if !output.success() {
            warn!(
                node = %node.id(),
                exit_code = output.exit_code,
                stdout = %output.stdout_text(),
                "[probe] `{command}` failed to execute"
            );
            return Ok(Vec::new());
        }

        let devices = extract_devices(node.id(), &output.stdout_text(), pattern);
        debug!(node = %node.id(), count = devices.len(), "[probe] cameras listed");
        Ok(devices)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, PatternError> {
    let re = Regex::new(pattern).map_err(|source| PatternError::Invalid { pattern: pattern.to_string(), source })?;
    // captures_len compte le groupe implicite 0
    if re.captures_len() < 2 {
        return Err(PatternError::NoCaptureGroup(pattern.to_string()));
    }
    Ok(re)
}

/// Un device par ligne matchée, premier groupe de capture = nom affiché.
pub fn extract_devices(node: &NodeId, text: &str, pattern: &Regex) -> Vec<Device> {
    text.lines()
        .filter_map(|line| pattern.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|name| Device::new(node.clone(), name.as_str()))
        .collect()
}
