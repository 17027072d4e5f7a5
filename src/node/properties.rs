//! Routing of node settings keys
//!
//! Every key of a create response or an update request is dispatched through
//! an explicit table instead of being matched against the node at runtime:
//! typed fields, keys that need a dedicated engine call, identity keys that
//! never change, and the open properties bag for everything else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Emulator family of a node; selects the engine sub-API path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Vpcs,
    VirtualBox,
    Vmware,
    Qemu,
    Dynamips,
    Iou,
    Docker,
    /// Engine-specific type the controller has no rules for
    Other(String),
}

impl NodeType {
    /// Path segment of this type in the engine API
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Vpcs => "vpcs",
            NodeType::VirtualBox => "virtualbox",
            NodeType::Vmware => "vmware",
            NodeType::Qemu => "qemu",
            NodeType::Dynamips => "dynamips",
            NodeType::Iou => "iou",
            NodeType::Docker => "docker",
            NodeType::Other(name) => name,
        }
    }

    /// Keys with a type-specific route, checked before the common ones
    fn rules(&self) -> &'static [(&'static str, KeyRoute)] {
        match self {
            // The engine renames the VM in the hypervisor itself
            NodeType::VirtualBox | NodeType::Vmware => &[("vmname", KeyRoute::Rename)],
            _ => &[],
        }
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        match s {
            "vpcs" => NodeType::Vpcs,
            "virtualbox" => NodeType::VirtualBox,
            "vmware" => NodeType::Vmware,
            "qemu" => NodeType::Qemu,
            "dynamips" => NodeType::Dynamips,
            "iou" => NodeType::Iou,
            "docker" => NodeType::Docker,
            other => NodeType::Other(other.to_string()),
        }
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        NodeType::from(s.as_str())
    }
}

impl From<NodeType> for String {
    fn from(node_type: NodeType) -> Self {
        node_type.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed field of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeField {
    Name,
    Console,
    ConsoleType,
}

/// Where a settings key goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRoute {
    /// Never changes after creation; ignored
    Identity,
    /// Typed node field, pushed with the generic update
    Field(NodeField),
    /// Needs the dedicated rename call on the engine
    Rename,
    /// Needs the dedicated adapter resize call
    Adapters,
    /// Open, engine-specific property
    Property,
}

const COMMON_RULES: &[(&str, KeyRoute)] = &[
    ("vm_id", KeyRoute::Identity),
    ("node_id", KeyRoute::Identity),
    ("project_id", KeyRoute::Identity),
    ("vm_type", KeyRoute::Identity),
    ("node_type", KeyRoute::Identity),
    ("compute_id", KeyRoute::Identity),
    // Local status only follows confirmed lifecycle calls
    ("status", KeyRoute::Identity),
    ("name", KeyRoute::Field(NodeField::Name)),
    ("console", KeyRoute::Field(NodeField::Console)),
    ("console_type", KeyRoute::Field(NodeField::ConsoleType)),
    ("adapters", KeyRoute::Adapters),
];

/// Route `key` for a node of type `node_type`
pub fn route(node_type: &NodeType, key: &str) -> KeyRoute {
    node_type
        .rules()
        .iter()
        .chain(COMMON_RULES.iter())
        .find(|(name, _)| *name == key)
        .map(|(_, route)| *route)
        .unwrap_or(KeyRoute::Property)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_round_trip_through_str() {
        for name in ["vpcs", "virtualbox", "vmware", "qemu", "dynamips", "iou", "docker"] {
            assert_eq!(NodeType::from(name).as_str(), name);
        }
        assert_eq!(
            NodeType::from("cloud"),
            NodeType::Other("cloud".to_string())
        );
    }

    #[test]
    fn test_node_type_serde_as_string() {
        let value = serde_json::to_value(NodeType::VirtualBox).unwrap();
        assert_eq!(value, serde_json::json!("virtualbox"));

        let parsed: NodeType = serde_json::from_value(serde_json::json!("qemu")).unwrap();
        assert_eq!(parsed, NodeType::Qemu);
    }

    #[test]
    fn test_common_routes() {
        let vpcs = NodeType::Vpcs;
        assert_eq!(route(&vpcs, "name"), KeyRoute::Field(NodeField::Name));
        assert_eq!(route(&vpcs, "console"), KeyRoute::Field(NodeField::Console));
        assert_eq!(route(&vpcs, "adapters"), KeyRoute::Adapters);
        assert_eq!(route(&vpcs, "vm_id"), KeyRoute::Identity);
        assert_eq!(route(&vpcs, "startup_script"), KeyRoute::Property);
    }

    #[test]
    fn test_rename_is_type_specific() {
        assert_eq!(route(&NodeType::VirtualBox, "vmname"), KeyRoute::Rename);
        assert_eq!(route(&NodeType::Vmware, "vmname"), KeyRoute::Rename);
        assert_eq!(route(&NodeType::Qemu, "vmname"), KeyRoute::Property);
    }
}
