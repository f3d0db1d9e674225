/*!
# CamLink Kernel

Inventaire vivant des caméras branchées sur les machines de la flotte.

- [`probe`] : sonde un nœud (devcon / system_profiler) et parse la sortie
- [`store`] : snapshot immuable publié atomiquement
- [`orchestrator`] : fan-out des sondes sur la flotte, fan-in avec isolation des erreurs
- [`scheduler`] / [`lifecycle`] : déclencheurs périodiques et événements online/offline
- [`agents`] / [`mqtt`] : la flotte réelle (agents MQTT) et le transport des commandes
*/

pub mod agents;
pub mod axis;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod local;
pub mod models;
pub mod mqtt;
pub mod node;
pub mod orchestrator;
pub mod probe;
pub mod protocol;
pub mod scheduler;
pub mod store;

pub use error::{AccessError, PatternError, ProbeError};
pub use models::{CommandOutput, CommandSpec, Device, NodeId, OsFamily};
pub use node::{Fleet, Node, NodeEvent, NodeRef};
pub use orchestrator::{FetchOrchestrator, RefreshReport, RefreshSettings};
pub use probe::NodeProbe;
pub use store::{InventoryStore, Snapshot};
