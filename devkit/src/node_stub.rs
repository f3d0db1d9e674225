/*!
Nœuds scriptés pour tester l'orchestrateur sans flotte réelle

`ScriptedNode` répond à `execute` selon un [`Script`] modifiable à chaud,
compte ses exécutions et mesure sa concurrence (localement ou via une
[`Gauge`] partagée entre plusieurs nœuds).
*/

use async_trait::async_trait;
use camlink_kernel::{CommandOutput, CommandSpec, Fleet, Node, NodeId, NodeRef, OsFamily, ProbeError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::fixtures::{devcon_status, system_profiler_cameras};

/// Comportement de `execute` pour un nœud scripté.
#[derive(Debug, Clone)]
pub enum Script {
    /// The command runs and produces this output.
    Output(CommandOutput),
    /// Transport failure with this reason.
    Unreachable(String),
    Interrupted,
    /// Never answers.
    Hang,
}

impl Script {
    pub fn stdout(exit_code: i32, stdout: impl Into<String>) -> Self {
        Script::Output(CommandOutput {
            exit_code,
            stdout: stdout.into().into_bytes(),
            stderr: Vec::new(),
        })
    }
}

/// Concurrence observée : courante et maximale.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InFlight<'a>(&'a [&'a Gauge]);

impl<'a> InFlight<'a> {
    fn enter(gauges: &'a [&'a Gauge]) -> Self {
        gauges.iter().for_each(|g| g.enter());
        Self(gauges)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.iter().for_each(|g| g.leave());
    }
}

pub struct ScriptedNode {
    id: NodeId,
    os: OsFamily,
    online: AtomicBool,
    script: Mutex<Script>,
    delay: Option<Duration>,
    executions: AtomicUsize,
    local: Gauge,
    shared: Option<Arc<Gauge>>,
    commands: Mutex<Vec<CommandSpec>>,
}

impl ScriptedNode {
    pub fn new(id: &str, os: OsFamily, script: Script) -> Self {
        Self {
            id: NodeId::new(id),
            os,
            online: AtomicBool::new(true),
            script: Mutex::new(script),
            delay: None,
            executions: AtomicUsize::new(0),
            local: Gauge::default(),
            shared: None,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Windows node whose devcon output lists `cameras`.
    pub fn windows(id: &str, cameras: &[&str]) -> Self {
        Self::new(id, OsFamily::Windows, Script::stdout(0, devcon_status(cameras)))
    }

    /// macOS node whose system_profiler output lists `cameras`.
    pub fn macos(id: &str, cameras: &[&str]) -> Self {
        Self::new(id, OsFamily::MacOs, Script::stdout(0, system_profiler_cameras(cameras)))
    }

    pub fn unreachable(id: &str) -> Self {
        Self::new(id, OsFamily::Windows, Script::Unreachable("connection reset by peer".into()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.shared = Some(gauge);
        self
    }

    pub fn offline(self) -> Self {
        self.set_online(false);
        self
    }

    pub fn into_ref(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }

    pub fn set_cameras(&self, cameras: &[&str]) {
        let stdout = match self.os {
            OsFamily::MacOs => system_profiler_cameras(cameras),
            _ => devcon_status(cameras),
        };
        self.set_script(Script::stdout(0, stdout));
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.local.max()
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl Node for ScriptedNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn os_family(&self) -> OsFamily {
        self.os.clone()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput, ProbeError> {
        let run = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        self.commands.lock().push(command.clone());
        debug!(node = %self.id, run, "[stub] execute `{command}`");

        let gauges: Vec<&Gauge> = std::iter::once(&self.local).chain(self.shared.as_deref()).collect();
        let _in_flight = InFlight::enter(&gauges);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self.script.lock().clone();
        match script {
            Script::Output(output) => Ok(output),
            Script::Unreachable(reason) => Err(ProbeError::Transport { node: self.id.clone(), reason }),
            Script::Interrupted => Err(ProbeError::Interrupted { node: self.id.clone() }),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Roster fixe, modifiable entre deux rafraîchissements.
#[derive(Default)]
pub struct StaticFleet {
    nodes: RwLock<Vec<NodeRef>>,
}

impl StaticFleet {
    pub fn new(nodes: impl IntoIterator<Item = NodeRef>) -> Self {
        Self { nodes: RwLock::new(nodes.into_iter().collect()) }
    }

    pub fn push(&self, node: NodeRef) {
        self.nodes.write().push(node);
    }

    pub fn remove(&self, id: &NodeId) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| n.id() != id);
        nodes.len() != before
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[async_trait]
impl Fleet for StaticFleet {
    async fn nodes(&self) -> Vec<NodeRef> {
        self.nodes.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_node_counts_and_switches_script() {
        let node = ScriptedNode::windows("win-01", &["USB Video Device"]);
        let cmd = CommandSpec::new("devcon.exe", ["Status", "=Image"]);

        let output = node.execute(&cmd).await.unwrap();
        assert!(output.stdout_text().contains("Name: USB Video Device"));

        node.set_script(Script::Unreachable("gone".into()));
        assert!(matches!(node.execute(&cmd).await, Err(ProbeError::Transport { .. })));
        assert_eq!(node.executions(), 2);
        assert_eq!(node.commands(), vec![cmd.clone(), cmd]);
        assert_eq!(node.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_static_fleet_roster() {
        let fleet = StaticFleet::default();
        fleet.push(ScriptedNode::macos("mac-01", &[]).into_ref());
        fleet.push(ScriptedNode::unreachable("win-01").into_ref());
        assert_eq!(fleet.nodes().await.len(), 2);
        assert!(fleet.remove(&NodeId::new("mac-01")));
        assert!(!fleet.remove(&NodeId::new("mac-01")));
        assert_eq!(fleet.len(), 1);
    }
}
