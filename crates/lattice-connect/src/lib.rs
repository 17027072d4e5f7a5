//! Lattice Connect: client-side connectivity from the controller to compute engines
//!
//! This crate provides the controller's half of the compute RPC channel.
//!
//! # Architecture
//!
//! - **RemoteCompute**: Implements `ComputeApi` over HTTP/JSON to one engine
//! - **ComputeManager**: Registry of engines and cache of their clients
//! - **testing::MockCompute**: Scripted engine for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use lattice_connect::{ComputeManager, ComputeRecord};
//! use lattice_core_interface::ComputeApiExt;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let manager = ComputeManager::new();
//!     manager
//!         .register(ComputeRecord::new("local", "http", "127.0.0.1", 3080))
//!         .await?;
//!
//!     let compute = manager.get_compute("local").await?;
//!     let version = compute.get("/version").await?;
//!     println!("{}", version);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod manager;
pub mod system;
pub mod testing;

pub use error::ConnectError;
pub use manager::{ComputeManager, ComputeRecord, ComputeStatus, DEFAULT_RPC_TIMEOUT};
pub use system::RemoteCompute;
