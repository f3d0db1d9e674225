//! Node online/offline handling.
//!
//! Events come from the fleet manager through a channel. Probing a node that
//! just came online is spawned onto the runtime so the dispatcher is never held
//! by a slow node; eviction on offline is immediate.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::NodeId;
use crate::node::{NodeEvent, NodeRef};
use crate::orchestrator::FetchOrchestrator;

#[derive(Clone)]
pub struct NodeLifecycleListener {
    orchestrator: Arc<FetchOrchestrator>,
}

impl NodeLifecycleListener {
    pub fn new(orchestrator: Arc<FetchOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn on_online(&self, node: NodeRef) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            orchestrator.refresh_node(node.as_ref()).await;
        })
    }

    pub fn on_offline(&self, node: &NodeId) {
        self.orchestrator.remove_node(node);
    }

    pub fn handle(&self, event: NodeEvent) {
        debug!("[lifecycle] {event:?}");
        match event {
            NodeEvent::Online(node) => {
                self.on_online(node);
            }
            NodeEvent::Offline(id) => self.on_offline(&id),
        }
    }

    pub fn spawn(
        self,
        mut events: mpsc::UnboundedReceiver<NodeEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => self.handle(event),
                        None => break,
                    },
                }
            }
            info!("[lifecycle] listener stopped");
        })
    }
}
