/*!
 * Lattice - control plane for network topology emulation
 *
 * Keeps projects, nodes and their network adapters in sync with the remote
 * compute engines that actually run the emulated devices:
 * - Compute registry with one shared client per engine
 * - Node lifecycle driven by confirmed engine calls
 * - Differential settings updates
 * - Adapter NIO bindings and packet capture
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod node;
pub mod project;

// Re-export commonly used types
pub use config::{Config, ControllerSettings, LogLevel, LogSettings};
pub use controller::Controller;
pub use error::{ControllerError, Result};
pub use node::{ConsoleType, Nio, Node, NodeInfo, NodeSpec, NodeStatus, NodeType};
pub use project::{NodeHandle, Project, ProjectInfo, ProjectManager};

pub use lattice_connect::{ComputeManager, ComputeRecord};
pub use lattice_core_interface::{ComputeApi, ComputeApiExt, ComputeError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
