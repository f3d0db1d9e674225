//! Seams between the inventory core and the fleet it runs against.
//!
//! The core never owns nodes: it holds [`NodeRef`] handles handed out by a
//! [`Fleet`] and reacts to [`NodeEvent`]s raised by whoever manages them.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::ProbeError;
use crate::models::{CommandOutput, CommandSpec, NodeId, OsFamily};

/// # A fleet worker able to run a command.
///
/// `execute` is the only blocking point of a probe. Implementations report
/// unreachable nodes as [`ProbeError::Transport`] and must not treat a
/// non-zero exit code as an error.
#[async_trait]
pub trait Node: Send + Sync + 'static {
    fn id(&self) -> &NodeId;

    fn os_family(&self) -> OsFamily;

    fn is_online(&self) -> bool;

    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput, ProbeError>;
}

pub type NodeRef = Arc<dyn Node>;

/// The live roster of nodes, owned by the fleet manager.
#[async_trait]
pub trait Fleet: Send + Sync + 'static {
    async fn nodes(&self) -> Vec<NodeRef>;
}

/// Lifecycle events consumed by [`crate::lifecycle::NodeLifecycleListener`].
#[derive(Clone)]
pub enum NodeEvent {
    Online(NodeRef),
    Offline(NodeId),
}

impl fmt::Debug for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::Online(node) => f.debug_tuple("Online").field(node.id()).finish(),
            NodeEvent::Offline(id) => f.debug_tuple("Offline").field(id).finish(),
        }
    }
}
