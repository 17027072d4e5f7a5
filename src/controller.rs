/*!
 * Controller: ties the compute registry and the open projects together
 */

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use lattice_connect::{ComputeManager, ConnectError};
use lattice_core_interface::ComputeApiExt;

use crate::config::{Config, ControllerSettings};
use crate::error::{ControllerError, Result};
use crate::node::NodeSpec;
use crate::project::{NodeHandle, ProjectManager};

pub struct Controller {
    settings: RwLock<ControllerSettings>,
    computes: Arc<ComputeManager>,
    projects: ProjectManager,
    /// Engines that came from configuration rather than `register_with`
    configured: Mutex<HashSet<String>>,
}

impl Controller {
    /// Build a controller and register the configured compute engines
    pub async fn new(settings: ControllerSettings) -> Result<Self> {
        let controller = Self {
            settings: RwLock::new(settings.clone()),
            computes: Arc::new(ComputeManager::with_timeout(settings.rpc_timeout)),
            projects: ProjectManager::new(settings.projects_path.clone()),
            configured: Mutex::new(HashSet::new()),
        };
        let (count, projects_path) = (settings.computes.len(), settings.projects_path.clone());
        controller.apply_settings(settings).await?;

        info!(
            "Controller ready: {} compute(s), projects in {}",
            count,
            projects_path.display()
        );
        Ok(controller)
    }

    /// Current settings
    pub async fn settings(&self) -> ControllerSettings {
        self.settings.read().await.clone()
    }

    pub fn computes(&self) -> &Arc<ComputeManager> {
        &self.computes
    }

    pub fn projects(&self) -> &ProjectManager {
        &self.projects
    }

    /// Bring the compute registry in line with `settings`
    ///
    /// Configured engines that disappeared are unregistered, new or changed
    /// ones are (re)registered and the request timeout is updated. Engines
    /// registered at runtime are left alone. Every engine is attempted; the
    /// first failure is returned. The projects root only changes on restart.
    pub async fn apply_settings(&self, settings: ControllerSettings) -> Result<()> {
        self.computes.set_timeout(settings.rpc_timeout).await;

        let wanted: HashSet<String> = settings.computes.iter().map(|r| r.id.clone()).collect();
        let mut configured = self.configured.lock().await;
        let mut first_error = None;

        for id in configured.difference(&wanted) {
            match self.computes.unregister(id).await {
                Ok(()) | Err(ConnectError::ComputeNotFound(_)) => {}
                Err(e) => {
                    warn!("Could not unregister compute {}: {}", id, e);
                    first_error.get_or_insert(ControllerError::from(e));
                }
            }
        }

        for record in &settings.computes {
            if self.computes.get_record(&record.id).await.as_ref() == Some(record) {
                continue;
            }
            if let Err(e) = self.computes.register(record.clone()).await {
                warn!("Could not register compute {}: {}", record.id, e);
                first_error.get_or_insert(ControllerError::from(e));
            }
        }
        *configured = wanted;
        drop(configured);

        let mut current = self.settings.write().await;
        if current.projects_path != settings.projects_path {
            warn!(
                "projects_path changed to {}; open projects stay in {}",
                settings.projects_path.display(),
                self.projects.projects_root().display()
            );
        }
        *current = settings;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-read settings from `config` every time the watcher reports a reload
    ///
    /// The task ends when the watcher goes away.
    pub fn follow_config(
        self: Arc<Self>,
        config: Arc<RwLock<Config>>,
        mut reloads: watch::Receiver<u64>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while reloads.changed().await.is_ok() {
                let settings = ControllerSettings::from_config(&*config.read().await);
                let applied = match settings {
                    Ok(settings) => self.apply_settings(settings).await,
                    Err(e) => Err(e),
                };
                match applied {
                    Ok(()) => info!("Applied reloaded configuration"),
                    Err(e) => warn!("Reloaded configuration not fully applied: {}", e),
                }
            }
        })
    }

    /// Create a node of a project on a registered engine
    pub async fn add_node(
        &self,
        project_id: &Uuid,
        compute_id: &str,
        spec: NodeSpec,
    ) -> Result<NodeHandle> {
        let project = self.projects.get_project(project_id).await?;
        if self.computes.get_record(compute_id).await.is_none() {
            return Err(ConnectError::ComputeNotFound(compute_id.to_string()).into());
        }
        project.add_node(&self.computes, compute_id, spec).await
    }

    /// Ask an engine for its version
    pub async fn probe(&self, compute_id: &str) -> Result<Value> {
        let compute = self.computes.get_compute(compute_id).await?;
        Ok(compute.get("/version").await?)
    }

    /// Close every project, then drop every engine connection
    pub async fn shutdown(&self) -> Result<()> {
        let closed = self.projects.close_all().await;
        self.computes.disconnect_all().await;
        closed
    }
}
