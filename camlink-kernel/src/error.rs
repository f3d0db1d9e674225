//! Error types for probing nodes and for gated operations.
//!
//! [`ProbeError`] never escapes the orchestrator: a failing node only makes
//! its own contribution to the snapshot empty.

use std::time::Duration;
use thiserror::Error;

use crate::models::NodeId;

/// # Transport-level failures of a node probe.
///
/// A diagnostic command that runs but exits non-zero is *not* an error; the
/// probe degrades it to an empty device list on its own.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The node could not be reached, or the command could not be started on it.
    #[error("node {node} unreachable: {reason}")]
    Transport { node: NodeId, reason: String },

    /// The execution was abandoned before a result came back.
    #[error("command on node {node} was interrupted")]
    Interrupted { node: NodeId },

    /// The probe did not finish before its deadline.
    #[error("probe of node {node} timed out after {timeout:?}")]
    Timeout { node: NodeId, timeout: Duration },
}

impl ProbeError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProbeError::Transport { .. } => "probe_transport",
            ProbeError::Interrupted { .. } => "probe_interrupted",
            ProbeError::Timeout { .. } => "probe_timeout",
        }
    }

    pub fn node(&self) -> &NodeId {
        match self {
            ProbeError::Transport { node, .. }
            | ProbeError::Interrupted { node }
            | ProbeError::Timeout { node, .. } => node,
        }
    }
}

/// A camera pattern from the config that cannot name a device.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("invalid camera pattern `{pattern}`: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Le nom affiché vient du premier groupe de capture.
    #[error("camera pattern `{0}` has no capture group for the device name")]
    NoCaptureGroup(String),
}

/// Rejection of a caller before any probing starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_labels() {
        let err = ProbeError::Timeout {
            node: NodeId::new("mac-01"),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.as_label(), "probe_timeout");
        assert_eq!(err.node().as_str(), "mac-01");
        assert_eq!(err.to_string(), "probe of node mac-01 timed out after 30s");
    }
}
