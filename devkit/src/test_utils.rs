/*!
Test Harness pour l'inventaire de caméras

Assemble store + flotte scriptée + orchestrateur comme le fait le kernel,
avec des helpers d'attente compatibles avec une horloge tokio en pause.
*/

use camlink_kernel::config::ProbeConfig;
use camlink_kernel::lifecycle::NodeLifecycleListener;
use camlink_kernel::{FetchOrchestrator, InventoryStore, NodeId, NodeProbe, NodeRef, RefreshSettings, Snapshot};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::node_stub::{ScriptedNode, StaticFleet};

/// Init du logging pour les tests (idempotent, `RUST_LOG` respecté).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub struct TestHarness {
    pub fleet: Arc<StaticFleet>,
    pub store: Arc<InventoryStore>,
    pub orchestrator: Arc<FetchOrchestrator>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new(RefreshSettings::default())
    }
}

impl TestHarness {
    pub fn new(settings: RefreshSettings) -> Self {
        init_tracing();
        let fleet = Arc::new(StaticFleet::default());
        let store = Arc::new(InventoryStore::new());
        let probe = match NodeProbe::new(&ProbeConfig::default()) {
            Ok(probe) => Arc::new(probe),
            Err(e) => panic!("default camera patterns must compile: {e}"),
        };
        let orchestrator = Arc::new(FetchOrchestrator::new(fleet.clone(), probe, store.clone(), settings));
        Self { fleet, store, orchestrator }
    }

    pub fn with_probe_timeout(timeout: Duration) -> Self {
        Self::new(RefreshSettings { probe_timeout: timeout, ..RefreshSettings::default() })
    }

    /// Ajoute un nœud à la flotte et garde le handle concret pour les assertions.
    pub fn add(&self, node: ScriptedNode) -> Arc<ScriptedNode> {
        let node = node.into_ref();
        self.fleet.push(node.clone());
        node
    }

    pub fn add_all(&self, nodes: impl IntoIterator<Item = ScriptedNode>) -> Vec<Arc<ScriptedNode>> {
        nodes.into_iter().map(|n| self.add(n)).collect()
    }

    pub fn listener(&self) -> NodeLifecycleListener {
        NodeLifecycleListener::new(self.orchestrator.clone())
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.get()
    }

    /// Noms affichés des caméras d'un nœud dans le snapshot courant.
    pub fn cameras(&self, node: &str) -> Vec<String> {
        self.snapshot()
            .devices(&NodeId::new(node))
            .iter()
            .map(|d| d.display_name().to_string())
            .collect()
    }
}

pub fn node_ref(node: &Arc<ScriptedNode>) -> NodeRef {
    node.clone()
}

/// Attend qu'une condition devienne vraie (polling toutes les 10ms).
pub async fn eventually<F>(mut check: F, within: Duration) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(within, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Lance `fut` et vérifie qu'elle ne se termine pas avant `delay`.
pub async fn still_pending<F: Future>(fut: F, delay: Duration) -> bool {
    tokio::time::timeout(delay, fut).await.is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_refreshes_scripted_fleet() {
        let harness = TestHarness::default();
        harness.add(ScriptedNode::macos("mac-01", &["FaceTime HD Camera"]));
        harness.orchestrator.refresh_all().await;
        assert_eq!(harness.cameras("mac-01"), vec!["FaceTime HD Camera"]);
        assert!(harness.cameras("nowhere").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_times_out() {
        assert!(!eventually(|| false, Duration::from_millis(100)).await);
        assert!(eventually(|| true, Duration::from_millis(100)).await);
        assert!(still_pending(std::future::pending::<()>(), Duration::from_secs(1)).await);
    }
}
