//! Lattice Core Interface: the controller's view of a compute engine
//!
//! This crate defines the `ComputeApi` trait, which abstracts the request/response
//! channel between the controller and the remote engines that actually run nodes.
//!
//! # Architecture
//!
//! A compute engine is nothing more than an RPC endpoint to the controller:
//!
//! 1. **Request**: an HTTP-style verb, a path relative to the engine base address,
//!    and an optional JSON body
//! 2. **Response**: a parsed JSON value on success, or a structured `ComputeError`
//!
//! Implementations live elsewhere:
//! - **RemoteCompute** (`lattice-connect`): HTTP/JSON over the network
//! - **MockCompute** (`lattice-connect::testing`): scripted, in-memory
//!
//! # Example
//!
//! ```rust,no_run
//! use lattice_core_interface::{ComputeApi, ComputeApiExt};
//! use serde_json::json;
//!
//! async fn start_vm<C: ComputeApi>(compute: &C, project: &str, vm: &str) -> anyhow::Result<()> {
//!     let path = format!("/projects/{}/vpcs/vms/{}/start", project, vm);
//!     compute.post(&path, None).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Design Philosophy
//!
//! - A call is exactly one suspend point: no retries, no hidden follow-up requests
//! - Remote failures keep the engine's own status and message untouched
//! - Transport failures are distinguishable from remote failures

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    /// The engine answered with a non-success status
    #[error("Compute error {status}: {message}")]
    Rpc { status: u16, message: String },

    /// The request never got an answer (connect, reset, DNS, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The engine answered with a success status but an unreadable body
    #[error("Invalid response from compute: {0}")]
    InvalidResponse(String),
}

impl ComputeError {
    /// True when the failure happened below the RPC layer (worth retrying upstream)
    pub fn is_transport(&self) -> bool {
        matches!(self, ComputeError::Transport(_) | ComputeError::Timeout(_))
    }

    /// Remote status code, when the engine produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            ComputeError::Rpc { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ComputeError>;

/// HTTP-style verb of a compute request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body returned by a compute engine on failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
}

/// The request/response channel to one compute engine
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static`: a single engine is shared
/// by every node it runs.
#[async_trait]
pub trait ComputeApi: Send + Sync + 'static {
    /// Identifier of the engine (conventionally its URL)
    fn id(&self) -> &str;

    /// Issue one request and wait for the engine's answer
    ///
    /// `path` is relative to the engine base address. A success with an empty
    /// body yields `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Rpc` with the remote status and message verbatim
    /// on a non-success answer, `Transport`/`Timeout` when no answer arrived.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value>;
}

/// Verb helpers derived from `ComputeApi::request`
#[async_trait]
pub trait ComputeApiExt: ComputeApi {
    async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::Get, path, None).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.request(Method::Post, path, body).await
    }

    async fn put(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.request(Method::Put, path, body).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::Delete, path, None).await
    }
}

// Blanket implementation for all ComputeApi implementations
impl<T: ComputeApi + ?Sized> ComputeApiExt for T {}
