//! Adapter slots and their NIO bindings

use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

use lattice_core_interface::ComputeApiExt;

use super::{Nio, Node};
use crate::error::{ControllerError, Result};

impl Node {
    /// NIO bindings by adapter index
    pub fn nios(&self) -> &BTreeMap<u32, Nio> {
        &self.nios
    }

    pub fn nio(&self, adapter_index: u32) -> Option<&Nio> {
        self.nios.get(&adapter_index)
    }

    pub(crate) fn check_adapter(&self, adapter_index: u32) -> Result<()> {
        if adapter_index < self.adapters {
            Ok(())
        } else {
            Err(ControllerError::Validation(format!(
                "Adapter {} doesn't exist on node {} ({} adapters)",
                adapter_index, self.id, self.adapters
            )))
        }
    }

    pub(crate) fn adapter_path(&self, adapter_index: u32, leaf: &str) -> String {
        self.sub_path(&format!("adapters/{}/{}", adapter_index, leaf))
    }

    /// Bind a NIO built from `spec` to an adapter
    ///
    /// The index, the free slot and the NIO description are all checked
    /// before anything is sent to the engine.
    pub async fn add_nio(&mut self, adapter_index: u32, spec: &Value) -> Result<Nio> {
        self.ensure_created("add a NIO to")?;
        self.check_adapter(adapter_index)?;
        if self.nios.contains_key(&adapter_index) {
            return Err(ControllerError::Conflict(format!(
                "Adapter {} of node {} already has a NIO",
                adapter_index, self.id
            )));
        }
        let nio = Nio::from_spec(spec)?;

        let compute = self.compute().await?;
        compute
            .post(
                &self.adapter_path(adapter_index, "nio"),
                Some(nio.to_value()?),
            )
            .await?;

        info!(
            "Added {} on adapter {} of node {}",
            nio.kind(),
            adapter_index,
            self.id
        );
        self.nios.insert(adapter_index, nio.clone());
        Ok(nio)
    }

    /// Unbind the NIO of an adapter, returning it
    pub async fn remove_nio(&mut self, adapter_index: u32) -> Result<Nio> {
        self.ensure_created("remove a NIO from")?;
        if !self.nios.contains_key(&adapter_index) {
            return Err(ControllerError::NotFound(format!(
                "No NIO on adapter {} of node {}",
                adapter_index, self.id
            )));
        }

        let compute = self.compute().await?;
        compute
            .delete(&self.adapter_path(adapter_index, "nio"))
            .await?;

        info!("Removed NIO on adapter {} of node {}", adapter_index, self.id);
        self.nios
            .remove(&adapter_index)
            .ok_or_else(|| ControllerError::NotFound(format!("adapter {}", adapter_index)))
    }

    /// Change the adapter count, dropping bindings that would fall outside it
    ///
    /// Doomed bindings are removed in ascending index order; the first failed
    /// removal stops the resize with the count unchanged.
    pub(crate) async fn resize_adapters(&mut self, count: u32) -> Result<()> {
        let compute = self.compute().await?;

        let doomed: Vec<u32> = self.nios.range(count..).map(|(index, _)| *index).collect();
        for index in doomed {
            if let Err(e) = compute.delete(&self.adapter_path(index, "nio")).await {
                warn!(
                    "Could not remove NIO on adapter {} of node {} while resizing: {}",
                    index, self.id, e
                );
                return Err(e.into());
            }
            self.nios.remove(&index);
        }

        compute
            .put(&self.sub_path("adapters"), Some(json!({ "adapters": count })))
            .await?;

        info!(
            "Node {} adapters: {} -> {}",
            self.id, self.adapters, count
        );
        self.adapters = count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{NodeSpec, NodeType};
    use super::*;
    use crate::project::Project;
    use lattice_connect::testing::{Call, MockCompute};
    use lattice_connect::{ComputeManager, ComputeRecord};
    use lattice_core_interface::{ComputeError, Method};
    use std::path::Path;
    use std::sync::Arc;
    use uuid::Uuid;

    fn udp(lport: u16) -> Value {
        json!({"type": "nio_udp", "lport": lport, "rport": 4243, "rhost": "127.0.0.1"})
    }

    async fn node_with_adapters(adapters: u32) -> (Node, Arc<MockCompute>) {
        let project = Project::new(Uuid::new_v4(), "test", Path::new("/tmp/lattice-projects"));
        let mock = Arc::new(MockCompute::new("local"));
        let computes = Arc::new(ComputeManager::new());
        computes
            .register_with(
                ComputeRecord::new("local", "http", "127.0.0.1", 3080),
                mock.clone(),
            )
            .await
            .unwrap();
        let mut node = Node::new(
            &project,
            &computes,
            "local",
            NodeSpec::new(NodeType::Qemu, "r1").with_adapters(adapters),
        );
        node.create().await.unwrap();
        mock.clear_calls();
        (node, mock)
    }

    #[tokio::test]
    async fn test_add_nio() {
        let (mut node, mock) = node_with_adapters(2).await;

        let nio = node.add_nio(0, &udp(4242)).await.unwrap();

        assert_eq!(nio.kind(), "nio_udp");
        assert_eq!(node.nio(0), Some(&nio));
        assert_eq!(
            mock.last_call(),
            Some(Call::new(
                Method::Post,
                format!("{}/adapters/0/nio", node.node_path()),
                Some(udp(4242))
            ))
        );
    }

    #[tokio::test]
    async fn test_add_nio_out_of_range_sends_nothing() {
        let (mut node, mock) = node_with_adapters(1).await;

        let err = node.add_nio(5, &udp(4242)).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert_eq!(mock.call_count(), 0);
        assert!(node.nios().is_empty());
    }

    #[tokio::test]
    async fn test_add_nio_occupied_slot_is_conflict() {
        let (mut node, mock) = node_with_adapters(1).await;
        node.add_nio(0, &udp(4242)).await.unwrap();
        mock.clear_calls();

        let err = node.add_nio(0, &json!({"type": "nio_null"})).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_add_nio_unknown_kind_sends_nothing() {
        let (mut node, mock) = node_with_adapters(1).await;

        let err = node
            .add_nio(0, &json!({"type": "nio_vde", "control_file": "/tmp/x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_add_nio_remote_failure_leaves_slot_free() {
        let (mut node, mock) = node_with_adapters(1).await;
        mock.fail(
            Method::Post,
            format!("{}/adapters/0/nio", node.node_path()),
            ComputeError::Rpc {
                status: 409,
                message: "port 4242 in use".to_string(),
            },
        );

        let err = node.add_nio(0, &udp(4242)).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(ref m) if m == "port 4242 in use"));
        assert!(node.nio(0).is_none());
    }

    #[tokio::test]
    async fn test_remove_nio() {
        let (mut node, mock) = node_with_adapters(2).await;
        node.add_nio(1, &json!({"type": "nio_null"})).await.unwrap();

        let removed = node.remove_nio(1).await.unwrap();

        assert_eq!(removed, Nio::Null);
        assert!(node.nio(1).is_none());
        assert_eq!(
            mock.last_call(),
            Some(Call::new(
                Method::Delete,
                format!("{}/adapters/1/nio", node.node_path()),
                None
            ))
        );
    }

    #[tokio::test]
    async fn test_remove_missing_nio_is_not_found() {
        let (mut node, mock) = node_with_adapters(2).await;

        assert!(matches!(
            node.remove_nio(0).await,
            Err(ControllerError::NotFound(_))
        ));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_shrink_removes_bindings_above_count() {
        let (mut node, mock) = node_with_adapters(4).await;
        node.add_nio(0, &udp(5000)).await.unwrap();
        node.add_nio(2, &udp(5002)).await.unwrap();
        node.add_nio(3, &udp(5003)).await.unwrap();
        mock.clear_calls();

        node.update(json!({"adapters": 2}).as_object().unwrap())
            .await
            .unwrap();

        let base = node.node_path();
        assert_eq!(
            mock.calls(),
            vec![
                Call::new(Method::Delete, format!("{}/adapters/2/nio", base), None),
                Call::new(Method::Delete, format!("{}/adapters/3/nio", base), None),
                Call::new(
                    Method::Put,
                    format!("{}/adapters", base),
                    Some(json!({"adapters": 2}))
                ),
            ]
        );
        assert_eq!(node.adapters(), 2);
        assert_eq!(node.nios().keys().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[tokio::test]
    async fn test_shrink_stops_at_first_failed_removal() {
        let (mut node, mock) = node_with_adapters(4).await;
        node.add_nio(1, &udp(5001)).await.unwrap();
        node.add_nio(2, &udp(5002)).await.unwrap();
        node.add_nio(3, &udp(5003)).await.unwrap();
        mock.fail(
            Method::Delete,
            format!("{}/adapters/2/nio", node.node_path()),
            ComputeError::Transport("connection reset".to_string()),
        );
        mock.clear_calls();

        let err = node
            .update(json!({"adapters": 1}).as_object().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::RpcTransport(_)));
        // adapter 1 went first, 3 was never attempted
        assert_eq!(mock.call_count(), 2);
        assert_eq!(node.adapters(), 4);
        assert_eq!(node.nios().keys().copied().collect::<Vec<_>>(), vec![2, 3]);
    }
}
