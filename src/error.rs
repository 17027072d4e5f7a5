/*!
 * Error types for the Lattice controller
 */

use lattice_connect::ConnectError;
use lattice_core_interface::ComputeError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Process exit codes of the `lattice` binary
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum ControllerError {
    /// Malformed input (bad NIO kind, adapter index out of range, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown project, node, compute or adapter binding
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation invalid for the current local or remote state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The compute engine could not be reached or did not answer in time
    #[error("RPC transport error: {0}")]
    RpcTransport(String),

    /// The compute engine answered with a failure status
    #[error("Compute returned {status}: {message}")]
    Rpc { status: u16, message: String },

    /// The engine a node is bound to is no longer registered
    #[error("Compute {0} is no longer available")]
    ComputeUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ControllerError {
    /// HTTP status the boundary layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            ControllerError::Validation(_) => 400,
            ControllerError::NotFound(_) => 404,
            ControllerError::Conflict(_) => 409,
            ControllerError::Rpc { status, .. } => *status,
            ControllerError::RpcTransport(_) | ControllerError::ComputeUnavailable(_) => 502,
            ControllerError::Config(_) | ControllerError::Io(_) => 500,
        }
    }

    /// Exit code the CLI terminates with
    pub fn exit_code(&self) -> i32 {
        match self {
            // The controller cannot run at all
            ControllerError::Config(_) | ControllerError::Io(_) => EXIT_FATAL,
            _ => EXIT_FAILURE,
        }
    }

    /// Check if this error is transient (a higher layer may retry)
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::RpcTransport(_) => true,
            ControllerError::Rpc { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ComputeError> for ControllerError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::Rpc { status: 400, message } => ControllerError::Validation(message),
            ComputeError::Rpc { status: 404, message } => ControllerError::NotFound(message),
            ComputeError::Rpc { status: 409, message } => ControllerError::Conflict(message),
            ComputeError::Rpc { status, message } => ControllerError::Rpc { status, message },
            ComputeError::Transport(msg) => ControllerError::RpcTransport(msg),
            ComputeError::Timeout(after) => {
                ControllerError::RpcTransport(format!("timed out after {:?}", after))
            }
            ComputeError::InvalidResponse(msg) => ControllerError::Rpc {
                status: 502,
                message: msg,
            },
        }
    }
}

impl From<ConnectError> for ControllerError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::ComputeNotFound(id) => {
                ControllerError::NotFound(format!("compute {}", id))
            }
            ConnectError::DuplicateAddress { .. } => ControllerError::Conflict(err.to_string()),
            ConnectError::InvalidEndpoint { .. } => ControllerError::Config(err.to_string()),
            other => ControllerError::RpcTransport(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for ControllerError {
    fn from(err: toml::de::Error) -> Self {
        ControllerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_remote_status_maps_to_kind() {
        let err: ControllerError = ComputeError::Rpc {
            status: 404,
            message: "VM abc doesn't exist".to_string(),
        }
        .into();
        assert!(matches!(err, ControllerError::NotFound(ref m) if m == "VM abc doesn't exist"));
        assert_eq!(err.http_status(), 404);

        let err: ControllerError = ComputeError::Rpc {
            status: 409,
            message: "busy".to_string(),
        }
        .into();
        assert_eq!(err.http_status(), 409);

        let err: ControllerError = ComputeError::Rpc {
            status: 400,
            message: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[test]
    fn test_other_remote_status_preserved() {
        let err: ControllerError = ComputeError::Rpc {
            status: 503,
            message: "VirtualBox is not running".to_string(),
        }
        .into();
        assert_eq!(err.http_status(), 503);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Compute returned 503: VirtualBox is not running");
    }

    #[test]
    fn test_timeout_is_transport() {
        let err: ControllerError = ComputeError::Timeout(Duration::from_secs(3)).into();
        assert!(matches!(err, ControllerError::RpcTransport(_)));
        assert!(err.is_transient());
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn test_caller_errors_not_transient() {
        assert!(!ControllerError::Validation("x".into()).is_transient());
        assert!(!ControllerError::NotFound("x".into()).is_transient());
        assert!(!ControllerError::Conflict("x".into()).is_transient());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ControllerError::Config("x".into()).exit_code(), EXIT_FATAL);
        assert_eq!(
            ControllerError::RpcTransport("x".into()).exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(EXIT_SUCCESS, 0);
    }

    #[test]
    fn test_connect_error_mapping() {
        let err: ControllerError = ConnectError::ComputeNotFound("local".into()).into();
        assert_eq!(err.http_status(), 404);
    }
}
