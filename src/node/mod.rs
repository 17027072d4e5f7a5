/*!
 * Nodes: controller-side mirrors of emulated devices living on a compute engine
 *
 * A node is created locally in the `Pending` state and only becomes usable
 * once the engine confirmed its creation. Every state change afterwards is
 * applied locally only after the matching engine call succeeded.
 */

pub mod adapters;
pub mod capture;
pub mod nio;
pub mod properties;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lattice_connect::{ComputeManager, ConnectError};
use lattice_core_interface::{ComputeApi, ComputeApiExt};

use crate::error::{ControllerError, Result};
use crate::project::Project;

pub use nio::Nio;
pub use properties::{route, KeyRoute, NodeField, NodeType};

/// Console protocol exposed by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleType {
    #[default]
    Telnet,
    Vnc,
    Spice,
    None,
}

impl ConsoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleType::Telnet => "telnet",
            ConsoleType::Vnc => "vnc",
            ConsoleType::Spice => "spice",
            ConsoleType::None => "none",
        }
    }
}

impl fmt::Display for ConsoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state as last confirmed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Known locally, creation not yet confirmed
    Pending,
    Created,
    Started,
    Stopped,
    Suspended,
    Deleted,
}

impl NodeStatus {
    /// Whether the node exists on its engine
    pub fn is_created(&self) -> bool {
        matches!(
            self,
            NodeStatus::Created | NodeStatus::Started | NodeStatus::Stopped | NodeStatus::Suspended
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Created => "created",
            NodeStatus::Started => "started",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Suspended => "suspended",
            NodeStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to build a node
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Identifier to use; a fresh one is generated when absent
    pub node_id: Option<Uuid>,
    pub node_type: NodeType,
    pub name: String,
    /// Console port; the engine allocates one when absent
    pub console: Option<u32>,
    pub console_type: ConsoleType,
    pub adapters: u32,
    pub properties: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            node_id: None,
            node_type,
            name: name.into(),
            console: None,
            console_type: ConsoleType::default(),
            adapters: 0,
            properties: Map::new(),
        }
    }

    pub fn with_id(mut self, node_id: Uuid) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_console(mut self, console: u32) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_console_type(mut self, console_type: ConsoleType) -> Self {
        self.console_type = console_type;
        self
    }

    pub fn with_adapters(mut self, adapters: u32) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Serializable description of a node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub compute_id: String,
    pub project_id: Uuid,
    pub vm_id: Uuid,
    pub vm_type: NodeType,
    pub name: String,
    pub console: Option<u32>,
    pub console_type: ConsoleType,
    pub properties: Map<String, Value>,
}

/// A node bound to one project and one compute engine
pub struct Node {
    id: Uuid,
    project_id: Uuid,
    compute_id: String,
    computes: Arc<ComputeManager>,
    node_type: NodeType,
    name: String,
    console: Option<u32>,
    console_type: ConsoleType,
    properties: Map<String, Value>,
    adapters: u32,
    nios: BTreeMap<u32, Nio>,
    capture_dir: PathBuf,
    status: NodeStatus,
}

impl Node {
    /// Build a pending node; nothing is sent to the engine until [`Node::create`]
    ///
    /// The engine is looked up by `compute_id` in `computes` on every call.
    /// Keys of `spec.properties` that name a typed field or an identity are
    /// dropped: the typed values of `spec` are authoritative.
    pub fn new(
        project: &Project,
        computes: &Arc<ComputeManager>,
        compute_id: impl Into<String>,
        spec: NodeSpec,
    ) -> Self {
        let properties = spec
            .properties
            .into_iter()
            .filter(|(key, _)| match route(&spec.node_type, key) {
                KeyRoute::Rename | KeyRoute::Property => true,
                _ => {
                    debug!("Dropping reserved key {} from node properties", key);
                    false
                }
            })
            .collect();

        Self {
            id: spec.node_id.unwrap_or_else(Uuid::new_v4),
            project_id: project.id(),
            compute_id: compute_id.into(),
            computes: computes.clone(),
            node_type: spec.node_type,
            name: spec.name,
            console: spec.console,
            console_type: spec.console_type,
            properties,
            adapters: spec.adapters,
            nios: BTreeMap::new(),
            capture_dir: project.capture_working_directory(),
            status: NodeStatus::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn compute_id(&self) -> &str {
        &self.compute_id
    }

    pub fn node_type(&self) -> &NodeType {
        &self.node_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn console(&self) -> Option<u32> {
        self.console
    }

    pub fn console_type(&self) -> ConsoleType {
        self.console_type
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn adapters(&self) -> u32 {
        self.adapters
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Directory capture files of this node are written to
    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    /// Current client of the node's engine
    async fn compute(&self) -> Result<Arc<dyn ComputeApi>> {
        match self.computes.get_compute(&self.compute_id).await {
            Ok(compute) => Ok(compute),
            Err(ConnectError::ComputeNotFound(id)) => Err(ControllerError::ComputeUnavailable(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn collection_path(&self) -> String {
        format!(
            "/projects/{}/{}/vms",
            self.project_id,
            self.node_type.as_str()
        )
    }

    /// Path of this node on its engine
    pub fn node_path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.id)
    }

    fn sub_path(&self, sub_path: &str) -> String {
        if sub_path.starts_with('/') {
            format!("{}{}", self.node_path(), sub_path)
        } else {
            format!("{}/{}", self.node_path(), sub_path)
        }
    }

    fn ensure_created(&self, operation: &str) -> Result<()> {
        if self.status.is_created() {
            Ok(())
        } else {
            Err(ControllerError::Conflict(format!(
                "Cannot {} node {}: node is {}",
                operation, self.id, self.status
            )))
        }
    }

    fn transition(&mut self, next: NodeStatus) {
        debug!("Node {} status: {} -> {}", self.id, self.status, next);
        self.status = next;
    }

    /// Payload of the create call
    fn create_payload(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("vm_id".to_string(), Value::String(self.id.to_string()));
        data.insert("name".to_string(), Value::String(self.name.clone()));
        data.insert(
            "console_type".to_string(),
            Value::String(self.console_type.as_str().to_string()),
        );
        if let Some(console) = self.console {
            data.insert("console".to_string(), Value::from(console));
        }
        if self.adapters > 0 {
            data.insert("adapters".to_string(), Value::from(self.adapters));
        }
        for (key, value) in &self.properties {
            if !value.is_null() {
                data.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        data
    }

    /// Create the node on its engine
    pub async fn create(&mut self) -> Result<()> {
        if self.status != NodeStatus::Pending {
            return Err(ControllerError::Conflict(format!(
                "Node {} is already {}",
                self.id, self.status
            )));
        }

        let compute = self.compute().await?;
        let payload = self.create_payload();
        let response = compute
            .post(&self.collection_path(), Some(Value::Object(payload)))
            .await?;

        self.merge_response(&response);
        self.transition(NodeStatus::Created);
        info!(
            "Created {} node {} ({}) on compute {}",
            self.node_type, self.name, self.id, self.compute_id
        );
        Ok(())
    }

    /// Fold an engine answer into the local state
    fn merge_response(&mut self, response: &Value) {
        if let Some(object) = response.as_object() {
            for (key, value) in object {
                self.apply_key(key, value);
            }
        }
    }

    fn apply_key(&mut self, key: &str, value: &Value) {
        match route(&self.node_type, key) {
            KeyRoute::Identity => {}
            KeyRoute::Field(NodeField::Name) => {
                if let Some(name) = value.as_str() {
                    self.name = name.to_string();
                }
            }
            KeyRoute::Field(NodeField::Console) => {
                self.console = value.as_u64().and_then(|port| u32::try_from(port).ok());
            }
            KeyRoute::Field(NodeField::ConsoleType) => {
                if let Ok(console_type) = serde_json::from_value(value.clone()) {
                    self.console_type = console_type;
                }
            }
            KeyRoute::Adapters => match value.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(count) if self.nios.range(count..).next().is_none() => self.adapters = count,
                Some(count) => warn!(
                    "Ignoring adapter count {} reported for node {}: adapters in use above it",
                    count, self.id
                ),
                None => {}
            },
            KeyRoute::Rename | KeyRoute::Property => {
                self.properties.insert(key.to_string(), value.clone());
            }
        }
    }

    /// Current local value of a typed field, as JSON
    fn field_value(&self, field: NodeField) -> Value {
        match field {
            NodeField::Name => Value::String(self.name.clone()),
            NodeField::Console => self.console.map(Value::from).unwrap_or(Value::Null),
            NodeField::ConsoleType => Value::String(self.console_type.as_str().to_string()),
        }
    }

    fn check_field(field: NodeField, value: &Value) -> Result<()> {
        let valid = match field {
            NodeField::Name => value.as_str().is_some_and(|name| !name.is_empty()),
            NodeField::Console => {
                value.is_null() || value.as_u64().is_some_and(|port| port > 0 && port <= 65535)
            }
            NodeField::ConsoleType => {
                serde_json::from_value::<ConsoleType>(value.clone()).is_ok()
            }
        };
        if valid {
            Ok(())
        } else {
            Err(ControllerError::Validation(format!(
                "Invalid value for {:?}: {}",
                field, value
            )))
        }
    }

    /// Apply settings changes
    ///
    /// Only keys whose value differs from the local one are sent. Typed fields
    /// and properties go out in a single generic update; rename-sensitive keys
    /// and the adapter count use their dedicated engine calls afterwards.
    /// Returns the keys that were changed.
    pub async fn update(&mut self, changes: &Map<String, Value>) -> Result<Vec<String>> {
        self.ensure_created("update")?;

        let mut push = Map::new();
        let mut rename: Option<(String, Value)> = None;
        let mut resize: Option<u32> = None;

        for (key, value) in changes {
            match route(&self.node_type, key) {
                KeyRoute::Identity => debug!("Ignoring identity key {} for node {}", key, self.id),
                KeyRoute::Field(field) => {
                    Self::check_field(field, value)?;
                    if self.field_value(field) != *value {
                        push.insert(key.clone(), value.clone());
                    }
                }
                KeyRoute::Property => {
                    if self.properties.get(key) != Some(value) {
                        push.insert(key.clone(), value.clone());
                    }
                }
                KeyRoute::Rename => {
                    if self.properties.get(key) != Some(value) {
                        rename = Some((key.clone(), value.clone()));
                    }
                }
                KeyRoute::Adapters => {
                    let count = value
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| {
                            ControllerError::Validation(format!(
                                "Adapter count must be a non-negative integer, got {}",
                                value
                            ))
                        })?;
                    if count != self.adapters {
                        resize = Some(count);
                    }
                }
            }
        }

        if push.is_empty() && rename.is_none() && resize.is_none() {
            debug!("Nothing to update on node {}", self.id);
            return Ok(Vec::new());
        }

        let compute = self.compute().await?;
        let mut changed = Vec::new();

        if !push.is_empty() {
            let response = compute
                .put(&self.node_path(), Some(Value::Object(push.clone())))
                .await?;
            for (key, value) in &push {
                self.apply_key(key, value);
            }
            self.merge_response(&response);
            changed.extend(push.keys().cloned());
        }

        if let Some((key, value)) = rename {
            let mut body = Map::new();
            body.insert(key.clone(), value.clone());
            compute
                .post(&self.sub_path("rename"), Some(Value::Object(body)))
                .await?;
            self.properties.insert(key.clone(), value);
            changed.push(key);
        }

        if let Some(count) = resize {
            self.resize_adapters(count).await?;
            changed.push("adapters".to_string());
        }

        info!("Updated node {}: {}", self.id, changed.join(", "));
        Ok(changed)
    }

    async fn action(&mut self, action: &str, next: Option<NodeStatus>) -> Result<()> {
        self.ensure_created(action)?;
        let compute = self.compute().await?;
        compute.post(&self.sub_path(action), None).await?;
        if let Some(next) = next {
            self.transition(next);
        }
        info!("Node {} ({}): {} done", self.name, self.id, action);
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        self.action("start", Some(NodeStatus::Started)).await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.action("stop", Some(NodeStatus::Stopped)).await
    }

    pub async fn suspend(&mut self) -> Result<()> {
        self.action("suspend", Some(NodeStatus::Suspended)).await
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.action("resume", Some(NodeStatus::Started)).await
    }

    /// Reload the node; the status stays whatever it was
    pub async fn reload(&mut self) -> Result<()> {
        self.action("reload", None).await
    }

    /// Delete the node on its engine
    ///
    /// On failure the node keeps its previous status and stays usable.
    pub async fn destroy(&mut self) -> Result<()> {
        match self.status {
            NodeStatus::Deleted => {
                return Err(ControllerError::Conflict(format!(
                    "Node {} is already deleted",
                    self.id
                )))
            }
            NodeStatus::Pending => {}
            _ => {
                let compute = self.compute().await?;
                compute.delete(&self.node_path()).await?;
            }
        }
        self.nios.clear();
        self.transition(NodeStatus::Deleted);
        info!("Deleted node {} ({})", self.name, self.id);
        Ok(())
    }

    /// Raw POST below this node's path
    pub async fn post(&self, sub_path: &str, body: Option<Value>) -> Result<Value> {
        let compute = self.compute().await?;
        Ok(compute.post(&self.sub_path(sub_path), body).await?)
    }

    /// Raw DELETE below this node's path
    pub async fn delete(&self, sub_path: &str) -> Result<Value> {
        let compute = self.compute().await?;
        Ok(compute.delete(&self.sub_path(sub_path)).await?)
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            compute_id: self.compute_id.clone(),
            project_id: self.project_id,
            vm_id: self.id,
            vm_type: self.node_type.clone(),
            name: self.name.clone(),
            console: self.console,
            console_type: self.console_type,
            properties: self.properties.clone(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("project_id", &self.project_id)
            .field("compute_id", &self.compute_id)
            .field("node_type", &self.node_type)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("adapters", &self.adapters)
            .field("nios", &self.nios)
            .finish()
    }
}
