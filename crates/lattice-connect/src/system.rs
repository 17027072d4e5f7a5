//! RemoteCompute: ComputeApi implementation that talks HTTP/JSON to a compute engine

use async_trait::async_trait;
use lattice_core_interface::{ComputeApi, ComputeError, ErrorBody, Method, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ConnectError;
use crate::manager::ComputeRecord;

/// A remote implementation of ComputeApi that forwards every request to a
/// compute engine over HTTP.
///
/// This struct is cheaply cloneable (reqwest's `Client` is an `Arc` internally).
///
/// # Example
///
/// ```rust,no_run
/// use lattice_connect::{ComputeRecord, RemoteCompute};
/// use lattice_core_interface::ComputeApiExt;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let record = ComputeRecord::new("local", "http", "127.0.0.1", 3080);
/// let compute = RemoteCompute::new(&record, Duration::from_secs(30))?;
///
/// let version = compute.get("/version").await?;
/// println!("Engine version: {}", version["version"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RemoteCompute {
    /// Engine identifier, as registered
    id: String,

    /// Base address every relative path is appended to
    base_url: String,

    /// HTTP client carrying the per-request timeout
    client: Client,

    /// Basic auth credentials, when the engine requires them
    credentials: Option<(String, String)>,

    timeout: Duration,
}

impl RemoteCompute {
    /// Create a client for the engine described by `record`.
    ///
    /// No connection is opened here; the first request does that.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::InvalidEndpoint` for an unsupported protocol or
    /// an empty host.
    pub fn new(record: &ComputeRecord, timeout: Duration) -> std::result::Result<Self, ConnectError> {
        if record.protocol != "http" && record.protocol != "https" {
            return Err(ConnectError::InvalidEndpoint {
                compute_id: record.id.clone(),
                reason: format!("unsupported protocol '{}'", record.protocol),
            });
        }
        if record.host.is_empty() {
            return Err(ConnectError::InvalidEndpoint {
                compute_id: record.id.clone(),
                reason: "empty host".to_string(),
            });
        }

        let client = Client::builder().timeout(timeout).build()?;

        let credentials = record
            .user
            .as_ref()
            .map(|user| (user.clone(), record.password.clone().unwrap_or_default()));

        Ok(Self {
            id: record.id.clone(),
            base_url: record.base_url(),
            client,
            credentials,
            timeout,
        })
    }

    /// Base address of the engine (e.g. `http://10.0.0.5:3080/v2`)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ComputeError {
        if err.is_timeout() {
            ComputeError::Timeout(self.timeout)
        } else {
            ComputeError::Transport(err.to_string())
        }
    }
}

/// Turn a non-success answer into a `ComputeError::Rpc`
///
/// The engine's `{status, message}` body wins when present; otherwise the HTTP
/// status and raw text are relayed.
fn remote_error(status: StatusCode, text: &str) -> ComputeError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => ComputeError::Rpc {
            status: body.status,
            message: body.message,
        },
        Err(_) => {
            let message = if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text.to_string()
            };
            ComputeError::Rpc {
                status: status.as_u16(),
                message,
            }
        }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl ComputeApi for RemoteCompute {
    fn id(&self) -> &str {
        &self.id
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = self.url(path);
        debug!("{} {} on compute {}", method, path, self.id);

        let mut builder = self.client.request(to_reqwest(method), &url);
        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("{} {} on compute {} failed: {}", method, path, self.id, e);
            self.transport_error(e)
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let err = remote_error(status, &text);
            warn!("{} {} on compute {} rejected: {}", method, path, self.id, err);
            return Err(err);
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| ComputeError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_compute_is_send_sync() {
        // Compile-time check that RemoteCompute satisfies trait bounds
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RemoteCompute>();
    }

    #[test]
    fn test_url_join() {
        let record = ComputeRecord::new("local", "http", "127.0.0.1", 3080);
        let compute = RemoteCompute::new(&record, Duration::from_secs(5)).unwrap();

        assert_eq!(compute.base_url(), "http://127.0.0.1:3080/v2");
        assert_eq!(compute.url("/version"), "http://127.0.0.1:3080/v2/version");
        assert_eq!(compute.url("version"), "http://127.0.0.1:3080/v2/version");
    }

    #[test]
    fn test_rejects_unknown_protocol() {
        let record = ComputeRecord::new("odd", "gopher", "127.0.0.1", 70);
        let result = RemoteCompute::new(&record, Duration::from_secs(5));
        assert!(matches!(result, Err(ConnectError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_remote_error_prefers_engine_body() {
        let err = remote_error(
            StatusCode::CONFLICT,
            r#"{"status": 409, "message": "VM is not suspended"}"#,
        );
        assert_eq!(
            err,
            ComputeError::Rpc {
                status: 409,
                message: "VM is not suspended".to_string()
            }
        );
    }

    #[test]
    fn test_remote_error_falls_back_to_http_status() {
        let err = remote_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.status(), Some(502));
        assert_eq!(
            err,
            ComputeError::Rpc {
                status: 502,
                message: "upstream down".to_string()
            }
        );

        let err = remote_error(StatusCode::NOT_FOUND, "");
        assert_eq!(
            err,
            ComputeError::Rpc {
                status: 404,
                message: "Not Found".to_string()
            }
        );
    }
}
