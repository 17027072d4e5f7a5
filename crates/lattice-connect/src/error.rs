//! Error types for the lattice-connect crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Compute not found: {0}")]
    ComputeNotFound(String),

    #[error("Compute {existing} is already registered at {address}")]
    DuplicateAddress { existing: String, address: String },

    #[error("Invalid endpoint for compute {compute_id}: {reason}")]
    InvalidEndpoint { compute_id: String, reason: String },

    #[error("Other error: {0}")]
    Other(String),
}

impl From<ConnectError> for lattice_core_interface::ComputeError {
    fn from(err: ConnectError) -> Self {
        lattice_core_interface::ComputeError::Transport(err.to_string())
    }
}
