//! Scripted in-memory compute engine for testing
//!
//! `MockCompute` implements `ComputeApi` without any network: every request is
//! recorded, and the answer comes from a per-route script (or `{}` when the
//! route was not scripted).
//!
//! ## Example
//!
//! ```
//! use lattice_connect::testing::MockCompute;
//! use lattice_core_interface::{ComputeApiExt, Method};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let compute = MockCompute::new("http://test.com:42");
//! compute.respond(Method::Post, "/projects/p/vpcs/vms", json!({"console": 2048}));
//!
//! let reply = compute.post("/projects/p/vpcs/vms", Some(json!({"name": "pc1"}))).await.unwrap();
//! assert_eq!(reply["console"], 2048);
//! assert_eq!(compute.call_count(), 1);
//! # }
//! ```

use async_trait::async_trait;
use lattice_core_interface::{ComputeApi, ComputeError, Method, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One request seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl Call {
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Call>,
    script: HashMap<(Method, String), Result<Value>>,
}

/// In-memory compute engine
#[derive(Debug, Clone)]
pub struct MockCompute {
    id: String,
    state: Arc<Mutex<MockState>>,
}

impl MockCompute {
    /// Create a mock engine with the given identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Answer every `method path` request with `value`
    pub fn respond(&self, method: Method, path: impl Into<String>, value: Value) {
        self.state
            .lock()
            .unwrap()
            .script
            .insert((method, path.into()), Ok(value));
    }

    /// Fail every `method path` request with `error`
    pub fn fail(&self, method: Method, path: impl Into<String>, error: ComputeError) {
        self.state
            .lock()
            .unwrap()
            .script
            .insert((method, path.into()), Err(error));
    }

    /// Drop the script of a route, restoring the default answer
    pub fn reset(&self, method: Method, path: &str) {
        self.state
            .lock()
            .unwrap()
            .script
            .remove(&(method, path.to_string()));
    }

    /// Every request received so far, oldest first
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// The most recent request
    pub fn last_call(&self) -> Option<Call> {
        self.state.lock().unwrap().calls.last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Forget recorded requests (the script is kept)
    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}

#[async_trait]
impl ComputeApi for MockCompute {
    fn id(&self) -> &str {
        &self.id
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::new(method, path, body));

        match state.script.get(&(method, path.to_string())) {
            Some(answer) => answer.clone(),
            None => Ok(json!({})),
        }
    }
}
