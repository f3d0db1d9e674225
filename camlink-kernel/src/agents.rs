/**
 * AGENTS MANAGER - Flotte des agents workers connus via MQTT
 *
 * RÔLE : registre des agents (registration, heartbeat, offline) qui sert de
 * roster à l'orchestrateur, et transport des commandes de diagnostic
 * (requête MQTT → réponse corrélée par command_id).
 *
 * ARCHITECTURE : chaque agent est exposé comme un `Node` (AgentNode) dont
 * l'état online est partagé avec le registre. Les transitions online/offline
 * sont émises en `NodeEvent` vers le listener de cycle de vie.
 * UTILITÉ : sonder les caméras de machines distantes sans accès direct.
 */

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::models::{CommandOutput, CommandSpec, NodeId, OsFamily};
use crate::node::{Fleet, Node, NodeEvent, NodeRef};
use crate::protocol::{
    command_topic, AgentHeartbeat, AgentOffline, AgentRegistration, CommandRequest, CommandResponse,
};

/// Sends diagnostic commands to agents and routes their responses back.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    client: Option<AsyncClient>,
    pending: Mutex<HashMap<String, oneshot::Sender<CommandResponse>>>,
}

impl CommandDispatcher {
    pub fn new(client: AsyncClient) -> Self {
        Self::build(Some(client))
    }

    /// Dispatcher sans broker : chaque commande échoue en erreur de transport.
    pub fn disconnected() -> Self {
        Self::build(None)
    }

    fn build(client: Option<AsyncClient>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner { client, pending: Mutex::new(HashMap::new()) }),
        }
    }

    pub async fn execute(
        &self,
        node: &NodeId,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, ProbeError> {
        let transport = |reason: String| ProbeError::Transport { node: node.clone(), reason };

        let Some(client) = &self.inner.client else {
            return Err(transport("MQTT client not configured".into()));
        };

        let request = CommandRequest::new(node.as_str(), command, timeout);
        let payload = serde_json::to_string(&request).map_err(|e| transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let _pending = PendingCommand::register(&self.inner, request.command_id.clone(), tx);

        client
            .publish(command_topic(node.as_str()), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| transport(e.to_string()))?;
        debug!(node = %node, command_id = %request.command_id, "[agents] sent `{command}`");

        let response = rx.await.map_err(|_| ProbeError::Interrupted { node: node.clone() })?;
        response.into_output().map_err(transport)
    }

    /// Hands a response to its waiter. Returns false for unknown or late responses.
    pub fn complete(&self, response: CommandResponse) -> bool {
        let waiter = self.inner.pending.lock().remove(&response.command_id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                debug!(command_id = %response.command_id, "[agents] response without waiter dropped");
                false
            }
        }
    }

    /// Fails every in-flight command (broker connection lost).
    pub fn interrupt_all(&self) -> usize {
        let mut pending = self.inner.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().len()
    }

    #[cfg(test)]
    fn pending_ids(&self) -> Vec<String> {
        self.inner.pending.lock().keys().cloned().collect()
    }
}

/// Retire l'attente du registre quand la future est abandonnée (timeout).
struct PendingCommand<'a> {
    inner: &'a DispatcherInner,
    command_id: String,
}

impl<'a> PendingCommand<'a> {
    fn register(
        inner: &'a DispatcherInner,
        command_id: String,
        tx: oneshot::Sender<CommandResponse>,
    ) -> Self {
        inner.pending.lock().insert(command_id.clone(), tx);
        Self { inner, command_id }
    }
}

impl Drop for PendingCommand<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.command_id);
    }
}

/// An agent seen as a fleet node.
pub struct AgentNode {
    id: NodeId,
    os: OsFamily,
    online: AtomicBool,
    commands: CommandDispatcher,
    command_timeout: Duration,
}

impl AgentNode {
    fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::AcqRel)
    }
}

#[async_trait]
impl Node for AgentNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn os_family(&self) -> OsFamily {
        self.os.clone()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput, ProbeError> {
        self.commands.execute(&self.id, command, self.command_timeout).await
    }
}

struct AgentEntry {
    hostname: String,
    os: String,
    architecture: String,
    version: Option<String>,
    status: String,
    last_seen: OffsetDateTime,
    registration_time: OffsetDateTime,
    node: Arc<AgentNode>,
}

/// Vue sérialisable d'un agent pour l'API.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub hostname: String,
    pub os: String,
    pub architecture: String,
    pub version: Option<String>,
    pub status: String,
    pub online: bool,
    pub last_seen: String,
    pub registration_time: String,
}

pub struct AgentRegistry {
    agents: RwLock<HashMap<NodeId, AgentEntry>>,
    dispatcher: CommandDispatcher,
    command_timeout: Duration,
    events: Option<mpsc::UnboundedSender<NodeEvent>>,
    local: Option<NodeRef>,
}

pub type SharedAgentRegistry = Arc<AgentRegistry>;

impl AgentRegistry {
    pub fn new(dispatcher: CommandDispatcher, command_timeout: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            dispatcher,
            command_timeout,
            events: None,
            local: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<NodeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Le nœud local fait partie de la flotte, toujours online.
    pub fn with_local_node(mut self, node: NodeRef) -> Self {
        self.local = Some(node);
        self
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Traite un message de registration d'agent
    pub fn handle_registration(&self, msg: AgentRegistration) {
        let now = OffsetDateTime::now_utc();
        let id = NodeId::new(msg.agent_id.as_str());

        let node = {
            let mut agents = self.agents.write();
            // même OS : on garde le handle, les sondes en cours restent valides
            let kept = agents.get_mut(&id).filter(|entry| entry.os == msg.os).map(|entry| {
                entry.hostname = msg.hostname.clone();
                entry.architecture = msg.architecture.clone();
                entry.version = msg.version.clone();
                entry.status = "online".into();
                entry.last_seen = now;
                entry.node.set_online(true);
                Arc::clone(&entry.node)
            });

            match kept {
                Some(node) => node,
                None => {
                    let node = Arc::new(AgentNode {
                        id: id.clone(),
                        os: OsFamily::from_os(&msg.os),
                        online: AtomicBool::new(true),
                        commands: self.dispatcher.clone(),
                        command_timeout: self.command_timeout,
                    });
                    let entry = AgentEntry {
                        hostname: msg.hostname.clone(),
                        os: msg.os,
                        architecture: msg.architecture,
                        version: msg.version,
                        status: "online".into(),
                        last_seen: now,
                        registration_time: now,
                        node: Arc::clone(&node),
                    };
                    if let Some(previous) = agents.insert(id.clone(), entry) {
                        previous.node.set_online(false);
                    }
                    node
                }
            }
        };

        info!("[agents] registered agent {} ({})", id, msg.hostname);
        self.emit(NodeEvent::Online(node));
    }

    /// Traite un heartbeat ; un agent marqué offline qui bat à nouveau redevient online.
    pub fn handle_heartbeat(&self, msg: AgentHeartbeat) {
        let id = NodeId::new(msg.agent_id.as_str());
        let revived = {
            let mut agents = self.agents.write();
            let Some(entry) = agents.get_mut(&id) else {
                debug!("[agents] heartbeat from unknown agent {id}");
                return;
            };
            entry.last_seen = OffsetDateTime::now_utc();
            entry.status = msg.status;
            if entry.node.set_online(true) {
                None
            } else {
                Some(Arc::clone(&entry.node))
            }
        };

        if let Some(node) = revived {
            info!("[agents] agent {id} is back online");
            self.emit(NodeEvent::Online(node));
        }
    }

    pub fn handle_offline(&self, msg: AgentOffline) {
        let id = NodeId::new(msg.agent_id);
        if self.mark_offline(&id) {
            info!(
                "[agents] agent {id} went offline ({})",
                msg.reason.as_deref().unwrap_or("no reason")
            );
        }
    }

    /// Marque un agent offline. Returns true on an online → offline transition.
    pub fn mark_offline(&self, id: &NodeId) -> bool {
        let was_online = {
            let mut agents = self.agents.write();
            match agents.get_mut(id) {
                Some(entry) => {
                    entry.status = "offline".into();
                    entry.node.set_online(false)
                }
                None => false,
            }
        };
        if was_online {
            self.emit(NodeEvent::Offline(id.clone()));
        }
        was_online
    }

    /// Marque offline les agents silencieux depuis plus de `max_silence`.
    pub fn sweep_stale(&self, max_silence: Duration) -> Vec<NodeId> {
        let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(max_silence.as_secs() as i64);
        let stale: Vec<NodeId> = self
            .agents
            .read()
            .iter()
            .filter(|(_, entry)| entry.node.is_online() && entry.last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        stale.into_iter().filter(|id| self.mark_offline(id)).inspect(|id| {
            warn!("[agents] agent {id} silent for more than {max_silence:?}, marked offline");
        }).collect()
    }

    /// Surveille périodiquement les agents et marque ceux inactifs comme offline
    pub fn spawn_monitor(
        registry: SharedAgentRegistry,
        max_silence: Duration,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        info!("[agents] starting agent monitoring (timeout: {max_silence:?})");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        registry.sweep_stale(max_silence);
                    }
                }
            }
        })
    }

    pub fn list_agents(&self) -> Vec<AgentRecord> {
        let agents = self.agents.read();
        let mut records: Vec<AgentRecord> = agents
            .iter()
            .map(|(id, entry)| AgentRecord {
                agent_id: id.to_string(),
                hostname: entry.hostname.clone(),
                os: entry.os.clone(),
                architecture: entry.architecture.clone(),
                version: entry.version.clone(),
                status: entry.status.clone(),
                online: entry.node.is_online(),
                last_seen: entry.last_seen.format(&Rfc3339).unwrap_or_default(),
                registration_time: entry.registration_time.format(&Rfc3339).unwrap_or_default(),
            })
            .collect();
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        records
    }

    pub fn online_count(&self) -> usize {
        self.agents.read().values().filter(|e| e.node.is_online()).count()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    fn emit(&self, event: NodeEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("[agents] lifecycle listener gone, event dropped");
            }
        }
    }

    #[cfg(test)]
    fn backdate(&self, id: &str, secs: i64) {
        if let Some(entry) = self.agents.write().get_mut(&NodeId::new(id)) {
            entry.last_seen -= time::Duration::seconds(secs);
        }
    }
}

#[async_trait]
impl Fleet for AgentRegistry {
    async fn nodes(&self) -> Vec<NodeRef> {
        let mut nodes: Vec<NodeRef> = self.local.iter().cloned().collect();
        nodes.extend(
            self.agents
                .read()
                .values()
                .map(|entry| Arc::clone(&entry.node) as NodeRef),
        );
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalNode;
    use crate::protocol::now_rfc3339;
    use rumqttc::MqttOptions;

    fn registration(agent_id: &str, os: &str) -> AgentRegistration {
        AgentRegistration {
            agent_id: agent_id.into(),
            hostname: format!("{agent_id}.lan"),
            os: os.into(),
            architecture: "x86_64".into(),
            version: Some("0.1.0".into()),
            timestamp: now_rfc3339(),
        }
    }

    fn heartbeat(agent_id: &str) -> AgentHeartbeat {
        AgentHeartbeat { agent_id: agent_id.into(), status: "online".into(), timestamp: now_rfc3339() }
    }

    fn registry() -> (AgentRegistry, mpsc::UnboundedReceiver<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = AgentRegistry::new(CommandDispatcher::disconnected(), Duration::from_secs(30))
            .with_events(tx);
        (registry, rx)
    }

    #[tokio::test]
    async fn test_registration_adds_online_node_and_emits_event() {
        let (registry, mut rx) = registry();
        registry.handle_registration(registration("a1b2c3d4e5f6", "macos"));

        match rx.try_recv().unwrap() {
            NodeEvent::Online(node) => {
                assert_eq!(node.id().as_str(), "a1b2c3d4e5f6");
                assert_eq!(node.os_family(), OsFamily::MacOs);
                assert!(node.is_online());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(registry.nodes().await.len(), 1);
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_keeps_agent_in_roster() {
        let (registry, mut rx) = registry();
        registry.handle_registration(registration("win-01", "windows"));
        rx.try_recv().unwrap();

        registry.handle_offline(AgentOffline { agent_id: "win-01".into(), reason: Some("shutdown".into()) });
        assert!(matches!(rx.try_recv().unwrap(), NodeEvent::Offline(id) if id.as_str() == "win-01"));

        let nodes = registry.nodes().await;
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].is_online());

        // un second offline ne réémet rien
        assert!(!registry.mark_offline(&NodeId::new("win-01")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_revives_offline_agent() {
        let (registry, mut rx) = registry();
        registry.handle_registration(registration("win-01", "windows"));
        registry.mark_offline(&NodeId::new("win-01"));
        while rx.try_recv().is_ok() {}

        registry.handle_heartbeat(heartbeat("win-01"));
        assert!(matches!(rx.try_recv().unwrap(), NodeEvent::Online(_)));

        registry.handle_heartbeat(heartbeat("win-01"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_agent_is_ignored() {
        let (registry, mut rx) = registry();
        registry.handle_heartbeat(heartbeat("ghost"));
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reregistration_with_new_os_replaces_node() {
        let (registry, _rx) = registry();
        registry.handle_registration(registration("dual-boot", "windows"));
        let old = Arc::clone(&registry.nodes().await[0]);

        registry.handle_registration(registration("dual-boot", "macos"));
        let nodes = registry.nodes().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].os_family(), OsFamily::MacOs);
        assert!(!old.is_online());
    }

    #[tokio::test]
    async fn test_sweep_marks_silent_agents_offline() {
        let (registry, mut rx) = registry();
        registry.handle_registration(registration("quiet", "macos"));
        registry.handle_registration(registration("chatty", "macos"));
        while rx.try_recv().is_ok() {}

        registry.backdate("quiet", 300);
        let swept = registry.sweep_stale(Duration::from_secs(120));
        assert_eq!(swept, vec![NodeId::new("quiet")]);
        assert!(matches!(rx.try_recv().unwrap(), NodeEvent::Offline(id) if id.as_str() == "quiet"));
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test]
    async fn test_fleet_includes_local_node() {
        let registry = AgentRegistry::new(CommandDispatcher::disconnected(), Duration::from_secs(30))
            .with_local_node(Arc::new(LocalNode::new("controller")));
        registry.handle_registration(registration("mac-01", "macos"));

        let ids: Vec<String> = registry.nodes().await.iter().map(|n| n.id().to_string()).collect();
        assert_eq!(ids, vec!["controller", "mac-01"]);
    }

    #[tokio::test]
    async fn test_disconnected_dispatcher_is_transport_error() {
        let (registry, _rx) = registry();
        registry.handle_registration(registration("mac-01", "macos"));
        let node = Arc::clone(&registry.nodes().await[0]);

        let err = node
            .execute(&CommandSpec::new("system_profiler", ["SPCameraDataType"]))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "probe_transport");
    }

    #[tokio::test]
    async fn test_dispatcher_round_trip() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("test-kernel", "localhost", 1883), 10);
        let dispatcher = CommandDispatcher::new(client);

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .execute(
                        &NodeId::new("mac-01"),
                        &CommandSpec::new("system_profiler", ["SPCameraDataType"]),
                        Duration::from_secs(30),
                    )
                    .await
            })
        };

        let command_id = loop {
            if let Some(id) = dispatcher.pending_ids().pop() {
                break id;
            }
            tokio::task::yield_now().await;
        };

        assert!(dispatcher.complete(CommandResponse {
            command_id,
            agent_id: "mac-01".into(),
            exit_code: Some(0),
            stdout: "Model ID: FaceTime HD Camera\n".into(),
            stderr: String::new(),
            error: None,
            execution_time_ms: 12,
            timestamp: now_rfc3339(),
        }));

        let output = task.await.unwrap().unwrap();
        assert!(output.success());
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_command_is_unregistered() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("test-kernel", "localhost", 1883), 10);
        let dispatcher = CommandDispatcher::new(client);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            dispatcher.execute(
                &NodeId::new("win-01"),
                &CommandSpec::new("devcon.exe", ["Status", "=Image"]),
                Duration::from_secs(30),
            ),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_all_fails_waiters() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("test-kernel", "localhost", 1883), 10);
        let dispatcher = CommandDispatcher::new(client);

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .execute(&NodeId::new("mac-01"), &CommandSpec::new("system_profiler", ["SPCameraDataType"]), Duration::from_secs(30))
                    .await
            })
        };
        while dispatcher.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(dispatcher.interrupt_all(), 1);
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.as_label(), "probe_interrupted");
    }
}
