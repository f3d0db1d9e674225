/*!
# FETCH ORCHESTRATOR - Collecte des caméras sur toute la flotte

RÔLE : lance une sonde par nœud en parallèle (fan-out), attend toutes les
réponses (fan-in) et publie le résultat dans l'[`InventoryStore`].

FONCTIONNEMENT :
- `refresh_all` : une tâche tokio par nœud online, chacune bornée par le
  timeout de sonde. Un échec ou un timeout donne une liste vide pour ce nœud,
  sans jamais annuler les autres. Le snapshot final *remplace* le précédent
  (les nœuds sortis de la flotte disparaissent).
- `refresh_node` : variante synchrone pour un seul nœud, fusionnée dans le
  snapshot courant (le reste de la flotte n'est pas touché). Si le nœud passe
  offline pendant la sonde, le résultat est jeté sans fusion.
- `remove_node` : délègue au store.

Les appels `refresh_all` concurrents sont sérialisés par une porte async : un
ancien résultat ne peut pas écraser un plus récent.
*/

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::ProbeError;
use crate::models::{Device, NodeId};
use crate::node::{Fleet, Node};
use crate::probe::NodeProbe;
use crate::store::{InventoryStore, Snapshot};

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub probe_timeout: Duration,
    /// `None` = une tâche par nœud, sans limite.
    pub max_concurrency: Option<usize>,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self { probe_timeout: Duration::from_secs(30), max_concurrency: None }
    }
}

/// Summary of one full refresh round.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_offline: usize,
    pub devices: usize,
    pub elapsed_ms: u64,
}

pub struct FetchOrchestrator {
    fleet: Arc<dyn Fleet>,
    probe: Arc<NodeProbe>,
    store: Arc<InventoryStore>,
    settings: RefreshSettings,
    gate: tokio::sync::Mutex<()>,
    last_report: Mutex<Option<RefreshReport>>,
}

impl FetchOrchestrator {
    pub fn new(
        fleet: Arc<dyn Fleet>,
        probe: Arc<NodeProbe>,
        store: Arc<InventoryStore>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            fleet,
            probe,
            store,
            settings,
            gate: tokio::sync::Mutex::new(()),
            last_report: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<InventoryStore> {
        &self.store
    }

    pub fn last_report(&self) -> Option<RefreshReport> {
        self.last_report.lock().clone()
    }

    /// Refresh every node of the fleet concurrently and replace the snapshot.
    ///
    /// Never fails: per-node errors are logged and degrade to an empty entry.
    pub async fn refresh_all(&self) -> RefreshReport {
        let _serial = self.gate.lock().await;
        let started = Instant::now();
        let nodes = self.fleet.nodes().await;

        let limiter = self
            .settings
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let deadline = self.settings.probe_timeout;

        let mut report = RefreshReport::default();
        let mut set = JoinSet::new();

        for node in nodes {
            if !node.is_online() {
                debug!(node = %node.id(), "[orchestrator] node offline, skipped");
                report.skipped_offline += 1;
                continue;
            }
            report.probed += 1;

            let probe = Arc::clone(&self.probe);
            let limiter = limiter.clone();
            set.spawn(async move {
                let _permit = match limiter {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                let outcome = probe_with_deadline(&probe, node.as_ref(), deadline).await;
                (node.id().clone(), outcome)
            });
        }

        let mut builder = Snapshot::builder();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, Ok(devices))) => {
                    report.succeeded += 1;
                    report.devices += devices.len();
                    builder.insert(id, devices);
                }
                Ok((id, Err(e))) => {
                    report.failed += 1;
                    warn!(node = %id, kind = e.as_label(), "[orchestrator] failed to list up cameras: {e}");
                    builder.insert(id, Vec::new());
                }
                Err(e) => {
                    // tâche paniquée : le nœud est absent du snapshot (= zéro caméra)
                    report.failed += 1;
                    error!("[orchestrator] probe task aborted: {e}");
                }
            }
        }

        self.store.replace(builder.build());
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            probed = report.probed,
            failed = report.failed,
            skipped = report.skipped_offline,
            devices = report.devices,
            elapsed_ms = report.elapsed_ms,
            "[orchestrator] camera list refreshed"
        );
        *self.last_report.lock() = Some(report.clone());
        report
    }

    /// Refresh one node and merge its entry. An offline or failing node
    /// gets an empty entry rather than keeping a stale one.
    ///
    /// The result of a node that went offline while being probed is dropped:
    /// its offline event evicts the entry, a late merge must not bring it back.
    pub async fn refresh_node(&self, node: &dyn Node) -> Vec<Device> {
        if !node.is_online() {
            debug!(node = %node.id(), "[orchestrator] node offline, nothing to probe");
            self.store.merge_node(node.id(), Vec::new());
            return Vec::new();
        }

        let devices = match probe_with_deadline(&self.probe, node, self.settings.probe_timeout).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(node = %node.id(), kind = e.as_label(), "[orchestrator] failed to list up cameras: {e}");
                Vec::new()
            }
        };

        if !node.is_online() {
            info!(node = %node.id(), "[orchestrator] node went offline during probe, result dropped");
            return Vec::new();
        }

        info!(node = %node.id(), devices = devices.len(), "[orchestrator] node refreshed");
        self.store.merge_node(node.id(), devices.clone());
        devices
    }

    pub fn remove_node(&self, node: &NodeId) {
        if self.store.remove_node(node) {
            info!(node = %node, "[orchestrator] node removed from inventory");
        }
    }
}

async fn probe_with_deadline(
    probe: &NodeProbe,
    node: &dyn Node,
    deadline: Duration,
) -> Result<Vec<Device>, ProbeError> {
    match tokio::time::timeout(deadline, probe.probe(node)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProbeError::Timeout { node: node.id().clone(), timeout: deadline }),
    }
}
