use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::SharedAgentRegistry;
use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::protocol::{
    AgentHeartbeat, AgentOffline, AgentRegistration, CommandResponse, HEARTBEAT_TOPIC,
    OFFLINE_TOPIC, REGISTRATION_TOPIC, RESPONSE_TOPIC,
};

const SUBSCRIPTIONS: [&str; 4] = [REGISTRATION_TOPIC, HEARTBEAT_TOPIC, OFFLINE_TOPIC, RESPONSE_TOPIC];

/// Crée le client MQTT partagé (commandes sortantes + listener)
pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs.max(5)));
    AsyncClient::new(opts, 64)
}

/// Pompe l'event loop : (ré)abonnement à chaque ConnAck, routage des publications.
pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    agents: SharedAgentRegistry,
    health: HealthTracker,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("[kernel] MQTT connected");
                    health.mark_mqtt_connected();
                    for topic in SUBSCRIPTIONS {
                        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                            error!("[kernel] subscribe {topic} failed: {e:?}");
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    if let Err(e) = route_message(&agents, &p.topic, &p.payload) {
                        warn!("[kernel] invalid JSON on {}: {e}", p.topic);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[kernel] MQTT error: {e:?}");
                    health.mark_mqtt_disconnected();
                    health.increment_reconnects();
                    let interrupted = agents.dispatcher().interrupt_all();
                    if interrupted > 0 {
                        warn!("[kernel] {interrupted} in-flight command(s) interrupted");
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
        info!("[kernel] MQTT listener stopped");
    })
}

/// Dispatch d'un message entrant selon son topic.
pub fn route_message(
    agents: &SharedAgentRegistry,
    topic: &str,
    payload: &[u8],
) -> Result<(), serde_json::Error> {
    match topic {
        REGISTRATION_TOPIC => agents.handle_registration(serde_json::from_slice::<AgentRegistration>(payload)?),
        HEARTBEAT_TOPIC => agents.handle_heartbeat(serde_json::from_slice::<AgentHeartbeat>(payload)?),
        OFFLINE_TOPIC => agents.handle_offline(serde_json::from_slice::<AgentOffline>(payload)?),
        RESPONSE_TOPIC => {
            agents.dispatcher().complete(serde_json::from_slice::<CommandResponse>(payload)?);
        }
        other => debug!("[kernel] ignoring message on {other}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRegistry, CommandDispatcher};
    use crate::node::Fleet;
    use std::sync::Arc;

    fn registry() -> SharedAgentRegistry {
        Arc::new(AgentRegistry::new(CommandDispatcher::disconnected(), Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn test_route_registration_then_offline() {
        let agents = registry();
        let registration = br#"{"agent_id":"a1b2c3","hostname":"build-mac","os":"macos","architecture":"aarch64","version":"0.1.0","timestamp":"2026-10-16T10:00:00Z"}"#;
        route_message(&agents, REGISTRATION_TOPIC, registration).unwrap();
        assert_eq!(agents.online_count(), 1);

        route_message(&agents, OFFLINE_TOPIC, br#"{"agent_id":"a1b2c3","reason":"last will"}"#).unwrap();
        assert_eq!(agents.online_count(), 0);
        assert_eq!(agents.nodes().await.len(), 1);
    }

    #[test]
    fn test_route_rejects_invalid_json() {
        let agents = registry();
        assert!(route_message(&agents, HEARTBEAT_TOPIC, b"not json").is_err());
        assert!(agents.is_empty());
    }

    #[test]
    fn test_unknown_response_is_ignored() {
        let agents = registry();
        let response = br#"{"command_id":"nobody-waits","agent_id":"x","exit_code":0,"stdout":"","stderr":"","error":null,"execution_time_ms":3,"timestamp":"2026-10-16T10:00:00Z"}"#;
        assert!(route_message(&agents, RESPONSE_TOPIC, response).is_ok());
        assert!(route_message(&agents, "camlink/other", b"{}").is_ok());
    }
}
