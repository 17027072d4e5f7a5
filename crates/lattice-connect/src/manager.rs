//! ComputeManager: registry and connection cache for compute engines

use crate::error::ConnectError;
use crate::system::RemoteCompute;
use lattice_core_interface::ComputeApi;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default per-request timeout towards an engine
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default API version prefix of the engine REST API
pub const DEFAULT_API_VERSION: u32 = 2;

/// Status of a compute engine connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeStatus {
    /// Engine is registered but no client has been built yet
    Registered,
    /// A client exists and is handed out to nodes
    Connected,
    /// Client was dropped (shutdown or forced reconnect)
    Disconnected,
}

/// Registration record of a compute engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRecord {
    /// Unique identifier for this engine
    pub id: String,

    /// "http" or "https"
    pub protocol: String,

    pub host: String,

    pub port: u16,

    /// Version prefix of the engine API (`/v{api_version}`)
    pub api_version: u32,

    /// Basic auth user, if the engine requires authentication
    pub user: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Display name for this engine (optional)
    pub name: Option<String>,
}

impl ComputeRecord {
    /// Create a new compute record
    pub fn new(
        id: impl Into<String>,
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            protocol: protocol.into(),
            host: host.into(),
            port,
            api_version: DEFAULT_API_VERSION,
            user: None,
            password: None,
            name: None,
        }
    }

    /// Attach a display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach basic auth credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Network address that makes this engine unique (`protocol://host:port`)
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Base URL every request path is appended to
    pub fn base_url(&self) -> String {
        format!("{}/v{}", self.address(), self.api_version)
    }
}

struct ComputeEntry {
    record: ComputeRecord,
    status: ComputeStatus,
    /// Client given to `register_with`; reused after a disconnect
    custom: Option<Arc<dyn ComputeApi>>,
}

/// Central registry of compute engines
///
/// Responsibilities:
/// - Maintain the set of known engines, each uniquely addressed
/// - Build and cache one client per engine (the only place connections originate)
/// - Hand out shared `ComputeApi` handles to nodes
///
/// # Example
///
/// ```rust,no_run
/// use lattice_connect::{ComputeManager, ComputeRecord};
/// use lattice_core_interface::ComputeApiExt;
///
/// # async fn example() -> anyhow::Result<()> {
/// let manager = ComputeManager::new();
///
/// manager
///     .register(ComputeRecord::new("local", "http", "127.0.0.1", 3080))
///     .await?;
///
/// // Client is built lazily on first lookup
/// let compute = manager.get_compute("local").await?;
/// let version = compute.get("/version").await?;
/// # Ok(())
/// # }
/// ```
pub struct ComputeManager {
    /// Registry of known engines (ID -> Entry)
    registry: Arc<RwLock<HashMap<String, ComputeEntry>>>,

    /// Live clients (ID -> ComputeApi)
    connections: Arc<RwLock<HashMap<String, Arc<dyn ComputeApi>>>>,

    /// Timeout applied to every request of clients built here, in milliseconds
    timeout_ms: AtomicU64,
}

impl ComputeManager {
    /// Create a new empty ComputeManager with the default request timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_RPC_TIMEOUT)
    }

    /// Create a new empty ComputeManager with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
            timeout_ms: AtomicU64::new(duration_ms(timeout)),
        }
    }

    /// Request timeout used for clients built by this manager
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Change the request timeout
    ///
    /// Cached HTTP clients are dropped so the next lookup builds one with the
    /// new timeout; clients given to `register_with` are kept.
    pub async fn set_timeout(&self, timeout: Duration) {
        let previous = self.timeout_ms.swap(duration_ms(timeout), Ordering::Relaxed);
        if previous == duration_ms(timeout) {
            return;
        }
        info!("Compute request timeout set to {:?}", timeout);

        let mut registry = self.registry.write().await;
        let mut connections = self.connections.write().await;
        for (id, entry) in registry.iter_mut() {
            if entry.custom.is_none() && connections.remove(id).is_some() {
                entry.status = ComputeStatus::Registered;
            }
        }
    }

    /// Register a compute engine
    ///
    /// This does not open a connection. Clients are built lazily by
    /// `get_compute()`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::DuplicateAddress` if another engine id is
    /// already registered at the same address.
    pub async fn register(&self, record: ComputeRecord) -> Result<(), ConnectError> {
        let mut registry = self.registry.write().await;
        Self::check_address(&registry, &record)?;

        info!("Registering compute: {} ({})", record.id, record.address());

        if let Some(previous) = registry.get(&record.id) {
            if previous.record != record {
                // Record changed: the cached client points at stale settings
                self.connections.write().await.remove(&record.id);
            }
        }

        registry.insert(
            record.id.clone(),
            ComputeEntry {
                record,
                status: ComputeStatus::Registered,
                custom: None,
            },
        );
        Ok(())
    }

    /// Register a compute engine reached through a caller-supplied client
    ///
    /// Used for in-process engines and tests, where no HTTP client should be
    /// built.
    pub async fn register_with(
        &self,
        record: ComputeRecord,
        client: Arc<dyn ComputeApi>,
    ) -> Result<(), ConnectError> {
        let mut registry = self.registry.write().await;
        Self::check_address(&registry, &record)?;

        info!("Registering compute with custom client: {}", record.id);

        let id = record.id.clone();
        registry.insert(
            id.clone(),
            ComputeEntry {
                record,
                status: ComputeStatus::Connected,
                custom: Some(client.clone()),
            },
        );
        self.connections.write().await.insert(id, client);
        Ok(())
    }

    fn check_address(
        registry: &HashMap<String, ComputeEntry>,
        record: &ComputeRecord,
    ) -> Result<(), ConnectError> {
        let address = record.address();
        match registry
            .values()
            .find(|entry| entry.record.id != record.id && entry.record.address() == address)
        {
            Some(existing) => Err(ConnectError::DuplicateAddress {
                existing: existing.record.id.clone(),
                address,
            }),
            None => Ok(()),
        }
    }

    /// Remove an engine from the registry and drop its client
    ///
    /// Nodes look engines up by id, so they see it as unavailable
    /// afterwards.
    pub async fn unregister(&self, compute_id: &str) -> Result<(), ConnectError> {
        info!("Unregistering compute: {}", compute_id);

        let mut registry = self.registry.write().await;
        registry
            .remove(compute_id)
            .ok_or_else(|| ConnectError::ComputeNotFound(compute_id.to_string()))?;

        let mut connections = self.connections.write().await;
        connections.remove(compute_id);

        Ok(())
    }

    /// Get the client for a specific engine
    ///
    /// Reuses the cached client if there is one, otherwise builds a
    /// `RemoteCompute` from the registered record.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Compute ID is not found in registry
    /// - The record does not describe a usable endpoint
    pub async fn get_compute(&self, compute_id: &str) -> Result<Arc<dyn ComputeApi>, ConnectError> {
        {
            let connections = self.connections.read().await;
            if let Some(compute) = connections.get(compute_id) {
                debug!("Reusing client for compute: {}", compute_id);
                return Ok(compute.clone());
            }
        }

        self.connect(compute_id).await
    }

    async fn connect(&self, compute_id: &str) -> Result<Arc<dyn ComputeApi>, ConnectError> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .get_mut(compute_id)
            .ok_or_else(|| ConnectError::ComputeNotFound(compute_id.to_string()))?;

        let mut connections = self.connections.write().await;
        // Another task may have connected while we waited for the write lock
        if let Some(compute) = connections.get(compute_id) {
            return Ok(compute.clone());
        }

        debug!(
            "Building client for compute {} at {}",
            compute_id,
            entry.record.base_url()
        );

        let compute: Arc<dyn ComputeApi> = match entry.custom {
            Some(ref custom) => custom.clone(),
            None => Arc::new(RemoteCompute::new(&entry.record, self.timeout())?),
        };
        connections.insert(compute_id.to_string(), compute.clone());
        entry.status = ComputeStatus::Connected;

        info!("Client ready for compute: {}", compute_id);

        Ok(compute)
    }

    /// Get the record of a registered engine
    pub async fn get_record(&self, compute_id: &str) -> Option<ComputeRecord> {
        let registry = self.registry.read().await;
        registry.get(compute_id).map(|entry| entry.record.clone())
    }

    /// Get the connection status of a registered engine
    pub async fn status(&self, compute_id: &str) -> Option<ComputeStatus> {
        let registry = self.registry.read().await;
        registry.get(compute_id).map(|entry| entry.status)
    }

    /// Get all registered engines, sorted by id
    pub async fn list_computes(&self) -> Vec<ComputeRecord> {
        let registry = self.registry.read().await;
        let mut records: Vec<ComputeRecord> =
            registry.values().map(|entry| entry.record.clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Check if a client currently exists for an engine
    pub async fn is_connected(&self, compute_id: &str) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(compute_id)
    }

    /// Drop the client of an engine (but keep it registered)
    pub async fn disconnect(&self, compute_id: &str) {
        info!("Disconnecting from compute: {}", compute_id);

        let mut registry = self.registry.write().await;
        let mut connections = self.connections.write().await;
        connections.remove(compute_id);

        if let Some(entry) = registry.get_mut(compute_id) {
            entry.status = ComputeStatus::Disconnected;
        }
    }

    /// Drop every client
    pub async fn disconnect_all(&self) {
        info!("Disconnecting from all computes");

        let mut registry = self.registry.write().await;
        let mut connections = self.connections.write().await;
        connections.clear();

        for entry in registry.values_mut() {
            entry.status = ComputeStatus::Disconnected;
        }
    }
}

fn duration_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl Default for ComputeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCompute;

    #[tokio::test]
    async fn test_register_and_list_computes() {
        let manager = ComputeManager::new();

        manager
            .register(ComputeRecord::new("b", "http", "10.0.0.2", 3080))
            .await
            .unwrap();
        manager
            .register(ComputeRecord::new("a", "http", "10.0.0.1", 3080))
            .await
            .unwrap();

        let computes = manager.list_computes().await;
        assert_eq!(computes.len(), 2);
        assert_eq!(computes[0].id, "a");
        assert_eq!(manager.status("a").await, Some(ComputeStatus::Registered));
    }

    #[tokio::test]
    async fn test_duplicate_address_rejected() {
        let manager = ComputeManager::new();

        manager
            .register(ComputeRecord::new("one", "http", "10.0.0.1", 3080))
            .await
            .unwrap();

        let result = manager
            .register(ComputeRecord::new("two", "http", "10.0.0.1", 3080))
            .await;
        assert!(matches!(result, Err(ConnectError::DuplicateAddress { .. })));

        // Same id, same address: allowed
        manager
            .register(ComputeRecord::new("one", "http", "10.0.0.1", 3080).with_name("main"))
            .await
            .unwrap();
        assert_eq!(manager.list_computes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_get_compute_builds_and_caches_client() {
        let manager = ComputeManager::new();
        manager
            .register(ComputeRecord::new("local", "http", "127.0.0.1", 3080))
            .await
            .unwrap();

        assert!(!manager.is_connected("local").await);
        let first = manager.get_compute("local").await.unwrap();
        let second = manager.get_compute("local").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id(), "local");
        assert_eq!(manager.status("local").await, Some(ComputeStatus::Connected));
    }

    #[tokio::test]
    async fn test_get_compute_for_unknown_engine() {
        let manager = ComputeManager::new();

        let result = manager.get_compute("unknown").await;
        assert!(matches!(result, Err(ConnectError::ComputeNotFound(_))));
    }

    #[tokio::test]
    async fn test_register_with_custom_client() {
        let manager = ComputeManager::new();
        let mock = Arc::new(MockCompute::new("mock"));

        manager
            .register_with(ComputeRecord::new("mock", "http", "mock", 1), mock.clone())
            .await
            .unwrap();

        let compute = manager.get_compute("mock").await.unwrap();
        assert_eq!(compute.id(), "mock");
    }

    #[tokio::test]
    async fn test_custom_client_survives_disconnect() {
        let manager = ComputeManager::new();
        let mock = Arc::new(MockCompute::new("mock"));
        manager
            .register_with(ComputeRecord::new("mock", "http", "mock", 1), mock.clone())
            .await
            .unwrap();

        manager.disconnect("mock").await;
        assert!(!manager.is_connected("mock").await);
        assert_eq!(manager.status("mock").await, Some(ComputeStatus::Disconnected));

        let compute = manager.get_compute("mock").await.unwrap();
        let expected: Arc<dyn ComputeApi> = mock;
        assert!(Arc::ptr_eq(&compute, &expected));
        assert_eq!(manager.status("mock").await, Some(ComputeStatus::Connected));
    }

    #[tokio::test]
    async fn test_set_timeout_rebuilds_http_clients() {
        let manager = ComputeManager::new();
        manager
            .register(ComputeRecord::new("local", "http", "127.0.0.1", 3080))
            .await
            .unwrap();
        let first = manager.get_compute("local").await.unwrap();

        manager.set_timeout(Duration::from_secs(3)).await;
        assert_eq!(manager.timeout(), Duration::from_secs(3));
        assert!(!manager.is_connected("local").await);

        let second = manager.get_compute("local").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        // Unchanged timeout keeps the cached client
        manager.set_timeout(Duration::from_secs(3)).await;
        assert!(manager.is_connected("local").await);
    }

    #[tokio::test]
    async fn test_unregister_drops_client() {
        let manager = ComputeManager::new();
        let mock = Arc::new(MockCompute::new("mock"));
        manager
            .register_with(ComputeRecord::new("mock", "http", "mock", 1), mock)
            .await
            .unwrap();

        let weak = Arc::downgrade(&manager.get_compute("mock").await.unwrap());
        manager.unregister("mock").await.unwrap();

        assert!(weak.upgrade().is_none());
        assert!(matches!(
            manager.unregister("mock").await,
            Err(ConnectError::ComputeNotFound(_))
        ));
    }
}
