//! CamLink Agent - fleet worker for camera diagnostics
//!
//! Runs on every machine that may have cameras attached:
//! - Registration and heartbeat via MQTT, with a last will on the offline topic
//! - Executes allow-listed diagnostic commands sent by the kernel
//! - Replies on the shared response topic, correlated by `command_id`

mod config;
mod discovery;
mod execution;

use anyhow::{Context, Result};
use camlink_kernel::protocol::{
    command_topic, AgentHeartbeat, AgentOffline, AgentRegistration, CommandRequest,
    HEARTBEAT_TOPIC, OFFLINE_TOPIC, REGISTRATION_TOPIC, RESPONSE_TOPIC,
};
use chrono::Utc;
use config::AgentConfig;
use discovery::SystemInfo;
use execution::CommandExecutor;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

struct Agent {
    config: AgentConfig,
    system_info: SystemInfo,
    mqtt_client: AsyncClient,
    executor: Arc<CommandExecutor>,
}

impl Agent {
    fn new(config: AgentConfig) -> Result<(Self, EventLoop)> {
        let system_info = SystemInfo::discover(config.agent.agent_id.as_deref());

        let last_will = serde_json::to_vec(&AgentOffline {
            agent_id: system_info.agent_id.clone(),
            reason: Some("connection lost".to_string()),
        })
        .context("Failed to serialize last will")?;

        let mut mqtt_options = MqttOptions::new(
            format!("camlink-agent-{}", system_info.agent_id),
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs.max(5)));
        mqtt_options.set_clean_session(true);
        mqtt_options.set_last_will(LastWill::new(OFFLINE_TOPIC, last_will, QoS::AtLeastOnce, false));

        let (mqtt_client, eventloop) = AsyncClient::new(mqtt_options, 32);

        let executor = Arc::new(CommandExecutor::new(
            system_info.agent_id.clone(),
            config.execution.allowed_commands.clone(),
            config.execution.max_command(),
        ));

        info!(
            "Agent initialized - ID: {}, Hostname: {}, allowed: {:?}",
            system_info.agent_id,
            system_info.hostname,
            config.execution.allowed_commands.iter().map(|c| c.path.as_str()).collect::<Vec<_>>()
        );
        Ok((Self { config, system_info, mqtt_client, executor }, eventloop))
    }

    async fn run(&self, mut eventloop: EventLoop) -> Result<()> {
        let command_topic = command_topic(&self.system_info.agent_id);
        let mut heartbeat_timer = interval(self.config.agent.heartbeat_interval());
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,

                _ = heartbeat_timer.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        error!("Failed to send heartbeat: {e:#}");
                    }
                }

                event = eventloop.poll() => match event {
                    // (ré)abonnement + registration à chaque connexion au broker
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        self.mqtt_client
                            .subscribe(&command_topic, QoS::AtLeastOnce)
                            .await
                            .context("Failed to subscribe to command topic")?;
                        info!("Subscribed to commands on: {command_topic}");
                        if let Err(e) = self.register().await {
                            error!("Failed to register: {e:#}");
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == command_topic => {
                        match serde_json::from_slice::<CommandRequest>(&publish.payload) {
                            Ok(request) => self.spawn_command(request),
                            Err(e) => warn!("Invalid command payload: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                },
            }
        }

        info!("Shutting down");
        self.shutdown(eventloop).await
    }

    /// Chaque commande dans sa propre tâche : l'event loop continue d'être pompée.
    fn spawn_command(&self, request: CommandRequest) {
        info!("Received command {}: {}", request.command_id, request.command());
        let executor = Arc::clone(&self.executor);
        let client = self.mqtt_client.clone();
        tokio::spawn(async move {
            let response = executor.execute(&request).await;
            match serde_json::to_vec(&response) {
                Ok(payload) => {
                    if let Err(e) = client.publish(RESPONSE_TOPIC, QoS::AtLeastOnce, false, payload).await {
                        error!("Failed to publish response {}: {e}", response.command_id);
                    }
                }
                Err(e) => error!("Failed to serialize response: {e}"),
            }
        });
    }

    async fn register(&self) -> Result<()> {
        let registration = AgentRegistration {
            agent_id: self.system_info.agent_id.clone(),
            hostname: self.system_info.hostname.clone(),
            os: self.system_info.os.clone(),
            architecture: self.system_info.architecture.clone(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            timestamp: Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_string(&registration).context("Failed to serialize registration message")?;

        self.mqtt_client
            .publish(REGISTRATION_TOPIC, QoS::AtLeastOnce, false, payload)
            .await
            .context("Failed to publish registration")?;
        info!("Agent registered");
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<()> {
        let heartbeat = AgentHeartbeat {
            agent_id: self.system_info.agent_id.clone(),
            status: "online".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_string(&heartbeat).context("Failed to serialize heartbeat message")?;

        self.mqtt_client
            .publish(HEARTBEAT_TOPIC, QoS::AtLeastOnce, false, payload)
            .await
            .context("Failed to publish heartbeat")?;
        debug!("Heartbeat sent");
        Ok(())
    }

    /// Annonce le départ puis attend que le broker ait vu la déconnexion.
    async fn shutdown(&self, mut eventloop: EventLoop) -> Result<()> {
        let offline = AgentOffline {
            agent_id: self.system_info.agent_id.clone(),
            reason: Some("shutdown".to_string()),
        };
        self.mqtt_client
            .publish(OFFLINE_TOPIC, QoS::AtLeastOnce, false, serde_json::to_vec(&offline)?)
            .await
            .context("Failed to publish offline message")?;
        self.mqtt_client.disconnect().await.context("Failed to disconnect")?;

        let drain = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), drain).await.is_err() {
            warn!("Broker did not acknowledge shutdown in time");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camlink_agent=info")))
        .init();

    info!("CamLink Agent starting...");

    let config = AgentConfig::load().await.context("Failed to load agent config")?;
    let (agent, eventloop) = Agent::new(config).context("Failed to create agent")?;
    agent.run(eventloop).await.context("Agent execution failed")
}
