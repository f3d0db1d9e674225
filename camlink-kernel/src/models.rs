use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

/// Identité stable d'un nœud de la flotte (agent_id, ou nom du nœud local).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Une caméra rapportée par la commande de diagnostic d'un nœud.
///
/// `node` est une référence non possédante (l'identifiant) vers le nœud
/// propriétaire ; le snapshot garantit qu'elle est égale à sa clé.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub name: String,
    pub node: NodeId,
}

impl Device {
    pub fn new(node: NodeId, name: impl Into<String>) -> Self {
        Self { name: name.into(), node }
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    pub(crate) fn attributed_to(mut self, node: &NodeId) -> Self {
        if &self.node != node {
            self.node = node.clone();
        }
        self
    }
}

/// Famille d'OS d'un nœud, qui choisit la commande de diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    MacOs,
    Unsupported(String),
}

impl OsFamily {
    /// Parse the `std::env::consts::OS` string a node reports.
    pub fn from_os(os: &str) -> Self {
        match os.trim().to_ascii_lowercase().as_str() {
            "windows" => OsFamily::Windows,
            "macos" | "darwin" => OsFamily::MacOs,
            other => OsFamily::Unsupported(other.to_string()),
        }
    }

    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Windows => f.write_str("windows"),
            OsFamily::MacOs => f.write_str("macos"),
            OsFamily::Unsupported(os) => f.write_str(os),
        }
    }
}

/// Commande à exécuter sur un nœud : programme + arguments positionnels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Résultat brut d'une exécution distante.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_family_from_os() {
        assert_eq!(OsFamily::from_os("windows"), OsFamily::Windows);
        assert_eq!(OsFamily::from_os("macos"), OsFamily::MacOs);
        assert_eq!(OsFamily::from_os(" Darwin "), OsFamily::MacOs);
        assert_eq!(OsFamily::from_os("linux"), OsFamily::Unsupported("linux".into()));
    }

    #[test]
    fn test_command_spec_display() {
        let cmd = CommandSpec::new("system_profiler", ["SPCameraDataType"]);
        assert_eq!(cmd.to_string(), "system_profiler SPCameraDataType");
    }

    #[test]
    fn test_device_attribution() {
        let dev = Device::new(NodeId::new("a"), "cam").attributed_to(&NodeId::new("b"));
        assert_eq!(dev.node, NodeId::new("b"));
        assert_eq!(dev.display_name(), "cam");
    }
}
