/*!
Messages d'agents simulés

Construit les payloads JSON que publierait un vrai `camlink-agent` et les
injecte dans le routage MQTT du kernel, sans broker.
*/

use anyhow::Result;
use camlink_kernel::agents::SharedAgentRegistry;
use camlink_kernel::mqtt::route_message;
use camlink_kernel::protocol::{now_rfc3339, HEARTBEAT_TOPIC, OFFLINE_TOPIC, REGISTRATION_TOPIC};
use serde_json::{json, Value};
use tracing::debug;

pub struct AgentMessageBuilder;

impl AgentMessageBuilder {
    pub fn registration(agent_id: &str, os: &str) -> Value {
        json!({
            "agent_id": agent_id,
            "hostname": format!("{agent_id}.lan"),
            "os": os,
            "architecture": "x86_64",
            "version": "0.1.0",
            "timestamp": now_rfc3339(),
        })
    }

    pub fn heartbeat(agent_id: &str) -> Value {
        json!({ "agent_id": agent_id, "status": "online", "timestamp": now_rfc3339() })
    }

    pub fn offline(agent_id: &str, reason: &str) -> Value {
        json!({ "agent_id": agent_id, "reason": reason })
    }
}

/// Un agent qui parle au registre via `route_message`.
pub struct SimulatedAgent {
    agent_id: String,
    os: String,
    registry: SharedAgentRegistry,
}

impl SimulatedAgent {
    pub fn new(registry: SharedAgentRegistry, agent_id: &str, os: &str) -> Self {
        Self { agent_id: agent_id.to_string(), os: os.to_string(), registry }
    }

    pub fn register(&self) -> Result<()> {
        self.send(REGISTRATION_TOPIC, AgentMessageBuilder::registration(&self.agent_id, &self.os))
    }

    pub fn heartbeat(&self) -> Result<()> {
        self.send(HEARTBEAT_TOPIC, AgentMessageBuilder::heartbeat(&self.agent_id))
    }

    /// Équivalent du last will publié par le broker.
    pub fn drop_connection(&self) -> Result<()> {
        self.send(OFFLINE_TOPIC, AgentMessageBuilder::offline(&self.agent_id, "connection lost"))
    }

    fn send(&self, topic: &str, payload: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&payload)?;
        debug!(agent = %self.agent_id, "[sim] {topic}");
        route_message(&self.registry, topic, &bytes)?;
        Ok(())
    }
}
