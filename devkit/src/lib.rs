/*!
# CamLink DevKit - Stubs et utilitaires de test

Bibliothèque pour tester le kernel CamLink sans flotte réelle :
- Nœuds scriptés (sorties devcon / system_profiler, pannes, lenteurs)
- Agents simulés qui passent par le routage MQTT du kernel
- Harness assemblant store, flotte et orchestrateur
*/

pub mod agent_sim;
pub mod fixtures;
pub mod node_stub;
pub mod test_utils;

pub use agent_sim::{AgentMessageBuilder, SimulatedAgent};
pub use node_stub::{Gauge, Script, ScriptedNode, StaticFleet};
pub use test_utils::{eventually, init_tracing, node_ref, still_pending, TestHarness};
