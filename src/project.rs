/*!
 * Projects: named containers of nodes
 *
 * A project owns its nodes and is the only place they are inserted or
 * removed. Each node sits behind its own mutex so concurrent operations on
 * the same node run one after another, while the node map itself is never
 * locked across an engine call.
 */

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use lattice_connect::ComputeManager;

use crate::error::{ControllerError, Result};
use crate::node::{Node, NodeSpec};

/// Shared handle to a node
pub type NodeHandle = Arc<Mutex<Node>>;

/// Serializable summary of a project
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectInfo {
    pub project_id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub nodes: usize,
}

pub struct Project {
    id: Uuid,
    name: String,
    path: PathBuf,
    nodes: RwLock<HashMap<Uuid, NodeHandle>>,
    /// Ids of nodes whose creation is in flight
    pending: std::sync::Mutex<HashSet<Uuid>>,
}

/// Claim on a node id, released when dropped
struct Reservation<'a> {
    pending: &'a std::sync::Mutex<HashSet<Uuid>>,
    node_id: Uuid,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.node_id);
    }
}

impl Project {
    /// Project stored in `<projects_root>/<id>`
    pub fn new(id: Uuid, name: impl Into<String>, projects_root: &Path) -> Self {
        Self {
            id,
            name: name.into(),
            path: projects_root.join(id.to_string()),
            nodes: RwLock::new(HashMap::new()),
            pending: std::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where capture files of this project's nodes are written
    pub fn capture_working_directory(&self) -> PathBuf {
        self.path.join("project-files").join("captures")
    }

    /// Create a node on the engine `compute_id` and register it
    ///
    /// The node id is claimed before the engine is called, so a concurrent
    /// add with the same id fails without reaching the engine. The node only
    /// becomes visible once the engine confirmed its creation.
    pub async fn add_node(
        &self,
        computes: &Arc<ComputeManager>,
        compute_id: &str,
        spec: NodeSpec,
    ) -> Result<NodeHandle> {
        let mut node = Node::new(self, computes, compute_id, spec);
        let node_id = node.id();
        let reservation = self.reserve(node_id).await?;

        node.create().await?;

        let handle = Arc::new(Mutex::new(node));
        self.nodes.write().await.insert(node_id, handle.clone());
        drop(reservation);
        info!("Added node {} to project {}", node_id, self.id);
        Ok(handle)
    }

    async fn reserve(&self, node_id: Uuid) -> Result<Reservation<'_>> {
        let nodes = self.nodes.write().await;
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if nodes.contains_key(&node_id) || !pending.insert(node_id) {
            return Err(ControllerError::Conflict(format!(
                "Node {} already exists in project {}",
                node_id, self.id
            )));
        }
        debug!("Reserved node id {} in project {}", node_id, self.id);
        Ok(Reservation {
            pending: &self.pending,
            node_id,
        })
    }

    pub async fn get_node(&self, node_id: &Uuid) -> Result<NodeHandle> {
        self.nodes
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| {
                ControllerError::NotFound(format!(
                    "Node {} doesn't exist in project {}",
                    node_id, self.id
                ))
            })
    }

    /// Node identifiers, sorted
    pub async fn node_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.nodes.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn nodes(&self) -> Vec<NodeHandle> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Delete a node on its engine, then forget it
    ///
    /// When the engine refuses, the node stays registered and usable.
    pub async fn delete_node(&self, node_id: &Uuid) -> Result<()> {
        let handle = self.get_node(node_id).await?;
        handle.lock().await.destroy().await?;

        self.nodes.write().await.remove(node_id);
        info!("Removed node {} from project {}", node_id, self.id);
        Ok(())
    }

    /// Start a capture on one adapter of a node
    pub async fn start_capture(
        &self,
        node_id: &Uuid,
        adapter_index: u32,
        file_name: &str,
    ) -> Result<PathBuf> {
        let handle = self.get_node(node_id).await?;
        let node = handle.lock().await;
        node.start_capture(adapter_index, file_name).await
    }

    pub async fn stop_capture(&self, node_id: &Uuid, adapter_index: u32) -> Result<()> {
        let handle = self.get_node(node_id).await?;
        let node = handle.lock().await;
        node.stop_capture(adapter_index).await
    }

    /// Delete every node, stopping at the first failure
    pub async fn close(&self) -> Result<()> {
        for node_id in self.node_ids().await {
            self.delete_node(&node_id).await?;
        }
        info!("Closed project {} ({})", self.name, self.id);
        Ok(())
    }

    pub async fn info(&self) -> ProjectInfo {
        ProjectInfo {
            project_id: self.id,
            name: self.name.clone(),
            path: self.path.clone(),
            nodes: self.node_count().await,
        }
    }
}

/// Registry of open projects
pub struct ProjectManager {
    projects_root: PathBuf,
    projects: RwLock<HashMap<Uuid, Arc<Project>>>,
}

impl ProjectManager {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            projects: RwLock::new(HashMap::new()),
        }
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    /// Open a new project; a fresh identifier is generated when none is given
    pub async fn create_project(
        &self,
        project_id: Option<Uuid>,
        name: impl Into<String>,
    ) -> Result<Arc<Project>> {
        let project_id = project_id.unwrap_or_else(Uuid::new_v4);
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project_id) {
            return Err(ControllerError::Conflict(format!(
                "Project {} already exists",
                project_id
            )));
        }

        let project = Arc::new(Project::new(project_id, name, &self.projects_root));
        projects.insert(project_id, project.clone());
        info!("Created project {} ({})", project.name(), project_id);
        Ok(project)
    }

    pub async fn get_project(&self, project_id: &Uuid) -> Result<Arc<Project>> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| {
                ControllerError::NotFound(format!("Project {} doesn't exist", project_id))
            })
    }

    pub async fn list_projects(&self) -> Vec<Arc<Project>> {
        let mut projects: Vec<_> = self.projects.read().await.values().cloned().collect();
        projects.sort_by_key(|project| project.id());
        projects
    }

    /// Close a project and forget it
    ///
    /// If a node cannot be deleted the project stays registered with the
    /// nodes that are left.
    pub async fn delete_project(&self, project_id: &Uuid) -> Result<()> {
        let project = self.get_project(project_id).await?;
        project.close().await?;
        self.projects.write().await.remove(project_id);
        Ok(())
    }

    /// Close every project, reporting the first failure
    pub async fn close_all(&self) -> Result<()> {
        let mut first_error = None;
        for project in self.list_projects().await {
            if let Err(e) = self.delete_project(&project.id()).await {
                warn!("Could not close project {}: {}", project.id(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
