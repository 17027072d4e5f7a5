//! Packet capture on node adapters

use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use lattice_core_interface::ComputeApiExt;

use super::Node;
use crate::error::Result;

impl Node {
    /// Start capturing adapter traffic into `file_name` under the project's
    /// capture directory; returns the full path handed to the engine
    pub async fn start_capture(&self, adapter_index: u32, file_name: &str) -> Result<PathBuf> {
        self.ensure_created("capture on")?;
        self.check_adapter(adapter_index)?;

        let path = self.capture_dir.join(file_name);
        let compute = self.compute().await?;
        compute
            .post(
                &self.adapter_path(adapter_index, "start_capture"),
                Some(json!({ "capture_file_path": path.to_string_lossy() })),
            )
            .await?;

        info!(
            "Capturing adapter {} of node {} to {}",
            adapter_index,
            self.id,
            path.display()
        );
        Ok(path)
    }

    pub async fn stop_capture(&self, adapter_index: u32) -> Result<()> {
        self.ensure_created("stop capture on")?;
        self.check_adapter(adapter_index)?;

        let compute = self.compute().await?;
        compute
            .post(&self.adapter_path(adapter_index, "stop_capture"), None)
            .await?;

        info!("Stopped capture on adapter {} of node {}", adapter_index, self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{NodeSpec, NodeType};
    use super::*;
    use crate::error::ControllerError;
    use crate::project::Project;
    use lattice_connect::testing::{Call, MockCompute};
    use lattice_connect::{ComputeManager, ComputeRecord};
    use lattice_core_interface::Method;
    use std::path::Path;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn local_engine() -> (Arc<MockCompute>, Arc<ComputeManager>) {
        let mock = Arc::new(MockCompute::new("local"));
        let computes = Arc::new(ComputeManager::new());
        computes
            .register_with(
                ComputeRecord::new("local", "http", "127.0.0.1", 3080),
                mock.clone(),
            )
            .await
            .unwrap();
        (mock, computes)
    }

    #[tokio::test]
    async fn test_capture_round() {
        let project = Project::new(Uuid::new_v4(), "test", Path::new("/srv/projects"));
        let (mock, computes) = local_engine().await;
        let mut node = Node::new(
            &project,
            &computes,
            "local",
            NodeSpec::new(NodeType::Vpcs, "pc1").with_adapters(1),
        );
        node.create().await.unwrap();

        let path = node.start_capture(0, "test.pcap").await.unwrap();

        let expected = project.capture_working_directory().join("test.pcap");
        assert_eq!(path, expected);
        assert_eq!(
            mock.last_call(),
            Some(Call::new(
                Method::Post,
                format!("{}/adapters/0/start_capture", node.node_path()),
                Some(json!({"capture_file_path": expected.to_string_lossy()}))
            ))
        );

        node.stop_capture(0).await.unwrap();
        assert_eq!(
            mock.last_call(),
            Some(Call::new(
                Method::Post,
                format!("{}/adapters/0/stop_capture", node.node_path()),
                None
            ))
        );
    }

    #[tokio::test]
    async fn test_capture_on_missing_adapter() {
        let project = Project::new(Uuid::new_v4(), "test", Path::new("/srv/projects"));
        let (mock, computes) = local_engine().await;
        let mut node = Node::new(&project, &computes, "local", NodeSpec::new(NodeType::Vpcs, "pc1"));
        node.create().await.unwrap();
        mock.clear_calls();

        assert!(matches!(
            node.start_capture(0, "test.pcap").await,
            Err(ControllerError::Validation(_))
        ));
        assert_eq!(mock.call_count(), 0);
    }
}
