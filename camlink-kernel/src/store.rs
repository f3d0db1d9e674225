/*!
# INVENTORY STORE - Snapshot courant des caméras de la flotte

RÔLE : détient le snapshot publié (nœud → caméras, ordre d'insertion conservé
par nœud) et le remplace atomiquement.

ARCHITECTURE : copy-on-write + `ArcSwap`. Les lecteurs font un `load` sans
verrou ; les écrivains passent par une section critique unique
"lire courant → calculer nouveau → publier". Un snapshot publié n'est jamais
muté : chaque écriture en construit un nouveau.
*/

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{Device, NodeId};

/// Immutable mapping node → devices. A node absent from the map has zero devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<NodeId, Vec<Device>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn devices(&self, node: &NodeId) -> &[Device] {
        self.entries.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.entries.contains_key(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &[Device])> {
        self.entries.iter().map(|(node, devices)| (node, devices.as_slice()))
    }

    pub fn node_count(&self) -> usize {
        self.entries.len()
    }

    pub fn device_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Node → device display names, the shape consumed by the axis expander.
    pub fn display_names(&self) -> BTreeMap<NodeId, Vec<String>> {
        self.entries
            .iter()
            .map(|(node, devices)| (node.clone(), devices.iter().map(|d| d.name.clone()).collect()))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    entries: BTreeMap<NodeId, Vec<Device>>,
}

impl SnapshotBuilder {
    pub fn insert(&mut self, node: NodeId, devices: Vec<Device>) -> &mut Self {
        let devices = attribute(&node, devices);
        self.entries.insert(node, devices);
        self
    }

    pub fn build(self) -> Snapshot {
        Snapshot { entries: self.entries }
    }
}

fn attribute(node: &NodeId, devices: Vec<Device>) -> Vec<Device> {
    devices.into_iter().map(|d| d.attributed_to(node)).collect()
}

pub struct InventoryStore {
    current: ArcSwap<Snapshot>,
    writer: Mutex<()>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
            writer: Mutex::new(()),
        }
    }

    /// Snapshot publié courant ; ne bloque jamais.
    pub fn get(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Remplace tout : les nœuds absents du nouveau snapshot disparaissent.
    pub fn replace(&self, snapshot: Snapshot) {
        let _write = self.writer.lock();
        self.current.store(Arc::new(snapshot));
    }

    /// Copie le snapshot courant, remplace l'entrée de `node`, publie.
    pub fn merge_node(&self, node: &NodeId, devices: Vec<Device>) {
        let _write = self.writer.lock();
        let mut next = Snapshot::clone(&self.current.load_full());
        next.entries.insert(node.clone(), attribute(node, devices));
        self.current.store(Arc::new(next));
    }

    /// Retire l'entrée de `node`. Returns false when there was nothing to remove.
    pub fn remove_node(&self, node: &NodeId) -> bool {
        let _write = self.writer.lock();
        let current = self.current.load_full();
        if !current.contains(node) {
            return false;
        }
        let mut next = Snapshot::clone(&current);
        next.entries.remove(node);
        self.current.store(Arc::new(next));
        true
    }
}

impl Default for InventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn devs(node: &str, names: &[&str]) -> Vec<Device> {
        names.iter().map(|n| Device::new(NodeId::new(node), *n)).collect()
    }

    fn seeded() -> InventoryStore {
        let store = InventoryStore::new();
        let mut builder = Snapshot::builder();
        builder
            .insert(NodeId::new("a"), devs("a", &["cam-a1"]))
            .insert(NodeId::new("b"), devs("b", &["cam-b1", "cam-b2"]));
        store.replace(builder.build());
        store
    }

    fn names(snapshot: &Snapshot, node: &str) -> Vec<String> {
        snapshot.devices(&NodeId::new(node)).iter().map(|d| d.name.clone()).collect()
    }

    #[test]
    fn test_starts_empty() {
        let store = InventoryStore::new();
        assert!(store.get().is_empty());
        assert!(store.get().devices(&NodeId::new("ghost")).is_empty());
    }

    #[test]
    fn test_merge_node_keeps_other_entries() {
        let store = seeded();
        store.merge_node(&NodeId::new("a"), devs("a", &["cam-a2", "cam-a3"]));

        let snap = store.get();
        assert_eq!(names(&snap, "a"), vec!["cam-a2", "cam-a3"]);
        assert_eq!(names(&snap, "b"), vec!["cam-b1", "cam-b2"]);
    }

    #[test]
    fn test_merge_attributes_devices_to_key() {
        let store = InventoryStore::new();
        store.merge_node(&NodeId::new("a"), devs("elsewhere", &["cam"]));
        let snap = store.get();
        assert!(snap.iter().all(|(node, devices)| devices.iter().all(|d| &d.node == node)));
    }

    #[test]
    fn test_remove_node() {
        let store = seeded();
        assert!(store.remove_node(&NodeId::new("a")));
        let snap = store.get();
        assert_eq!(snap.nodes().cloned().collect::<Vec<_>>(), vec![NodeId::new("b")]);
        assert!(!store.remove_node(&NodeId::new("a")));
    }

    #[test]
    fn test_replace_drops_stale_nodes() {
        let store = seeded();
        let mut builder = Snapshot::builder();
        builder.insert(NodeId::new("a"), devs("a", &["cam-a1"]));
        builder.insert(NodeId::new("c"), Vec::new());
        store.replace(builder.build());

        let snap = store.get();
        assert!(!snap.contains(&NodeId::new("b")));
        assert!(snap.contains(&NodeId::new("c")));
        assert_eq!(snap.device_count(), 1);
    }

    #[test]
    fn test_published_snapshot_is_never_mutated() {
        let store = seeded();
        let before = store.get();
        store.merge_node(&NodeId::new("a"), Vec::new());
        store.remove_node(&NodeId::new("b"));
        assert_eq!(names(&before, "a"), vec!["cam-a1"]);
        assert_eq!(names(&before, "b"), vec!["cam-b1", "cam-b2"]);
    }

    #[test]
    fn test_readers_never_see_mixed_rounds() {
        let store = Arc::new(seeded());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for round in 0..2_000 {
                    let tag = format!("round-{round}");
                    store.merge_node(&NodeId::new("a"), devs("a", &[tag.as_str(), tag.as_str(), tag.as_str()]));
                    if round % 7 == 0 {
                        store.remove_node(&NodeId::new("a"));
                    }
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        let snap = store.get();
                        let a = names(&snap, "a");
                        assert!(a.windows(2).all(|w| w[0] == w[1]), "mixed rounds: {a:?}");
                        assert_eq!(names(&snap, "b"), vec!["cam-b1", "cam-b2"]);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_display_names() {
        let store = seeded();
        let names = store.get().display_names();
        assert_eq!(names[&NodeId::new("b")], vec!["cam-b1".to_string(), "cam-b2".to_string()]);
    }
}
