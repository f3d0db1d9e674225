//! Dynamic build-matrix axis that expands to every attached camera.

use crate::store::Snapshot;

/// Variable name under which each camera is made available to a build.
pub const AXIS_NAME: &str = "UDID";
pub const DEFAULT_VALUE: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct AvailableDevicesAxis {
    values: Vec<String>,
}

impl AvailableDevicesAxis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &'static str {
        AXIS_NAME
    }

    /// Flattens the inventory, node order then device order. May be empty.
    pub fn rebuild(&mut self, snapshot: &Snapshot) -> &[String] {
        self.values = snapshot
            .iter()
            .flat_map(|(_, devices)| devices.iter().map(|d| d.name.clone()))
            .collect();
        &self.values
    }

    /// Values of the last rebuild, or a single `default` when there are none.
    pub fn values(&self) -> Vec<String> {
        if self.values.is_empty() {
            vec![DEFAULT_VALUE.to_string()]
        } else {
            self.values.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, NodeId};

    #[test]
    fn test_empty_inventory_expands_to_default() {
        let mut axis = AvailableDevicesAxis::new();
        assert_eq!(axis.values(), vec!["default"]);
        assert!(axis.rebuild(&Snapshot::empty()).is_empty());
        assert_eq!(axis.values(), vec!["default"]);
    }

    #[test]
    fn test_rebuild_flattens_nodes_in_order() {
        let mut builder = Snapshot::builder();
        builder
            .insert(NodeId::new("mac-02"), vec![Device::new(NodeId::new("mac-02"), "FaceTime HD Camera")])
            .insert(NodeId::new("empty"), Vec::new())
            .insert(
                NodeId::new("build-win"),
                vec![
                    Device::new(NodeId::new("build-win"), "Logitech Webcam C270"),
                    Device::new(NodeId::new("build-win"), "USB Video Device"),
                ],
            );

        let mut axis = AvailableDevicesAxis::new();
        axis.rebuild(&builder.build());
        assert_eq!(
            axis.values(),
            vec!["Logitech Webcam C270", "USB Video Device", "FaceTime HD Camera"]
        );
        assert_eq!(axis.name(), "UDID");
    }
}
