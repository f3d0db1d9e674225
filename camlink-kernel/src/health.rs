use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::agents::AgentRegistry;
use crate::orchestrator::{FetchOrchestrator, RefreshReport};

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub nodes_tracked: usize,
    pub devices_tracked: usize,
    pub agents_known: usize,
    pub agents_online: usize,
    pub commands_in_flight: usize,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub last_refresh: Option<RefreshReport>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    pub fn get_health(&self, orchestrator: &FetchOrchestrator, agents: &AgentRegistry) -> KernelHealth {
        let snapshot = orchestrator.store().get();

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            nodes_tracked: snapshot.node_count(),
            devices_tracked: snapshot.device_count(),
            agents_known: agents.len(),
            agents_online: agents.online_count(),
            commands_in_flight: agents.dispatcher().in_flight(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            last_refresh: orchestrator.last_report(),
        }
    }
}
