//! Owning registry of the nodes of one test network.
//!
//! ```text
//! NodeNet::new -> launch_batch -> wait_for_nodes -> ... -> shutdown_all
//! ```
//!
//! Nodes are numbered in launch order. Node `k` listens on
//! `base_port + k * port_step`, answers RPC on
//! `base_rpc_port + k * port_step` and keeps its data in
//! `<data_root>/<port>`. Without a configured root, a temporary directory
//! owned by the registry is used and removed with it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use log::{info, log_enabled, warn, Level};
use parking_lot::Mutex;
use regnet_common::config::VERSION;
use tempfile::TempDir;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};

use crate::config::NetConfig;
use crate::node::{NodeHandle, NodeId, ReadinessError};
use crate::orchestrator::{Clock, SystemClock};
use crate::process::{NodeLauncher, NodeSpec};
use crate::rpc::NodeInfo;
use crate::sync::{self, SyncError};
use crate::topology::{EdgeChange, TopologyController, TopologyError, TopologyGroup};
use crate::tx_builder::TransactionBuilder;

pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Failed to prepare data directory {}: {}", path.display(), source)]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No port left for node #{}", _0)]
    PortsExhausted(usize),
    #[error("Failed to launch node {}: {:#}", node, source)]
    Launch {
        node: NodeId,
        source: anyhow::Error,
    },
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error("Timeout waiting for {} node(s) to stop after {:?}", running, timeout)]
    ShutdownTimeout { running: usize, timeout: Duration },
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub struct NodeNet {
    config: NetConfig,
    launcher: Arc<dyn NodeLauncher>,
    topology: TopologyController,
    tx_builder: TransactionBuilder,
    nodes: Mutex<Vec<Arc<NodeHandle>>>,
    // Set when the registry owns its data root
    temp_dir: Option<TempDir>,
    data_root: PathBuf,
}

impl NodeNet {
    pub fn new(config: NetConfig, launcher: Arc<dyn NodeLauncher>) -> Result<Self, NetError> {
        Self::with_clock(config, launcher, Arc::new(SystemClock))
    }

    /// Registry whose topology controller reads time from `clock`.
    pub fn with_clock(
        config: NetConfig,
        launcher: Arc<dyn NodeLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NetError> {
        let (temp_dir, data_root) = match &config.data_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|source| NetError::DataDir {
                    path: root.clone(),
                    source,
                })?;
                (None, root.clone())
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("regnet-")
                    .tempdir()
                    .map_err(|source| NetError::DataDir {
                        path: std::env::temp_dir(),
                        source,
                    })?;
                let root = dir.path().to_path_buf();
                (Some(dir), root)
            }
        };

        Ok(Self {
            topology: TopologyController::new(config.topology.clone(), clock),
            tx_builder: TransactionBuilder::new(config.fees.clone()),
            config,
            launcher,
            nodes: Mutex::new(Vec::new()),
            temp_dir,
            data_root,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn owns_data_root(&self) -> bool {
        self.temp_dir.is_some()
    }

    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    pub fn tx_builder(&self) -> &TransactionBuilder {
        &self.tx_builder
    }

    /// Registered nodes in launch order.
    pub fn nodes(&self) -> Vec<Arc<NodeHandle>> {
        self.nodes.lock().clone()
    }

    pub fn node(&self, index: usize) -> Option<Arc<NodeHandle>> {
        self.nodes.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node_id(&self, index: usize) -> Result<NodeId, NetError> {
        let offset = u16::try_from(index)
            .ok()
            .and_then(|k| k.checked_mul(self.config.port_step))
            .ok_or(NetError::PortsExhausted(index))?;
        let port = self.config.base_port.checked_add(offset);
        let rpc_port = self.config.base_rpc_port.checked_add(offset);
        match (port, rpc_port) {
            (Some(port), Some(rpc_port)) => Ok(NodeId::new(self.config.host.clone(), port, rpc_port)),
            _ => Err(NetError::PortsExhausted(index)),
        }
    }

    /// Launch `count` more nodes, one after the other, and register them.
    /// Nodes are not waited on, see [`NodeNet::wait_for_nodes`].
    pub async fn launch_batch(&self, count: usize) -> Result<Vec<Arc<NodeHandle>>, NetError> {
        let first = self.len();
        let mut batch = Vec::with_capacity(count);
        for index in first..first + count {
            let id = self.node_id(index)?;
            let data_dir = self.data_root.join(id.port.to_string());
            std::fs::create_dir_all(&data_dir).map_err(|source| NetError::DataDir {
                path: data_dir.clone(),
                source,
            })?;

            let spec = NodeSpec {
                id: id.clone(),
                data_dir,
                rpc_user: self.config.rpc_user.clone(),
                rpc_password: self.config.rpc_password.clone(),
                extra_args: self.config.extra_args.clone(),
            };
            let launched = self
                .launcher
                .launch(&spec)
                .await
                .map_err(|source| NetError::Launch {
                    node: id.clone(),
                    source,
                })?;

            let handle = Arc::new(NodeHandle::from_launched(id, launched));
            self.nodes.lock().push(handle.clone());
            batch.push(handle);
        }

        if log_enabled!(Level::Info) {
            info!(
                "Launched {} node(s) under {} (regnet {})",
                batch.len(),
                self.data_root.display(),
                VERSION
            );
        }
        Ok(batch)
    }

    /// Wait for each node in turn to become ready.
    pub async fn wait_for_nodes(
        &self,
        nodes: &[Arc<NodeHandle>],
        timeout: Duration,
    ) -> Result<Vec<NodeInfo>, NetError> {
        let mut infos = Vec::with_capacity(nodes.len());
        for node in nodes {
            infos.push(node.wait_until_ready(timeout).await?);
        }
        Ok(infos)
    }

    /// [`NodeNet::launch_batch`] then [`NodeNet::wait_for_nodes`] with the
    /// configured readiness deadline.
    pub async fn launch_and_wait(&self, count: usize) -> Result<Vec<Arc<NodeHandle>>, NetError> {
        let batch = self.launch_batch(count).await?;
        self.wait_for_nodes(&batch, self.config.ready_timeout).await?;
        Ok(batch)
    }

    /// Stop every running node, wait until none is running and empty the
    /// registry. Stop failures are logged, the wait still applies.
    pub async fn shutdown_all(&self) -> Result<(), NetError> {
        let nodes = self.nodes();
        let results = join_all(
            nodes
                .iter()
                .filter(|node| node.is_running())
                .map(|node| async move { (node.id().clone(), node.stop().await) }),
        )
        .await;
        for (id, result) in results {
            if let Err(e) = result {
                warn!("Failed to stop node {}: {:#}", id, e);
            }
        }

        let timeout = self.config.shutdown_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let running = nodes.iter().filter(|node| node.is_running()).count();
            if running == 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(NetError::ShutdownTimeout { running, timeout });
            }
            sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        self.nodes.lock().clear();
        if log_enabled!(Level::Info) {
            info!("Stopped {} node(s)", nodes.len());
        }
        Ok(())
    }

    pub async fn connect_nodes(
        &self,
        nodes: &[Arc<NodeHandle>],
    ) -> Result<Vec<EdgeChange>, NetError> {
        Ok(self.topology.connect_nodes(nodes).await?)
    }

    pub async fn disconnect_groups(
        &self,
        group_a: &[Arc<NodeHandle>],
        group_b: &[Arc<NodeHandle>],
    ) -> Result<Vec<EdgeChange>, NetError> {
        Ok(self.topology.disconnect_groups(group_a, group_b).await?)
    }

    pub async fn partition(
        &self,
        nodes: &[Arc<NodeHandle>],
        group_count: usize,
        designations: &[Vec<NodeId>],
    ) -> Result<Vec<TopologyGroup>, NetError> {
        Ok(self
            .topology
            .partition(nodes, group_count, designations)
            .await?)
    }

    pub async fn merge(&self, nodes: &[Arc<NodeHandle>]) -> Result<Vec<EdgeChange>, NetError> {
        Ok(self.topology.merge(nodes).await?)
    }

    pub async fn sync(
        &self,
        a: &NodeHandle,
        b: &NodeHandle,
        timeout: Duration,
    ) -> Result<u64, NetError> {
        Ok(sync::sync(a, b, timeout).await?)
    }

    /// Sync every registered node with the next one.
    pub async fn sync_all(&self, timeout: Duration) -> Result<(), NetError> {
        Ok(sync::sync_all(&self.nodes(), timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimNetwork;

    #[tokio::test]
    async fn test_ports_and_data_dirs() {
        let sim = Arc::new(SimNetwork::new());
        let net = NodeNet::new(NetConfig::default().with_ports(30000, 31000), sim).unwrap();
        assert!(net.owns_data_root());

        let batch = net.launch_batch(2).await.unwrap();
        let more = net.launch_batch(1).await.unwrap();
        assert_eq!(batch[0].id(), &NodeId::new("127.0.0.1", 30000, 31000));
        assert_eq!(batch[1].id(), &NodeId::new("127.0.0.1", 30010, 31010));
        assert_eq!(more[0].id(), &NodeId::new("127.0.0.1", 30020, 31020));
        assert!(net.data_root().join("30010").is_dir());
        assert_eq!(net.len(), 3);
    }

    #[tokio::test]
    async fn test_port_overflow() {
        let sim = Arc::new(SimNetwork::new());
        let config = NetConfig::default().with_ports(65530, 65531);
        let net = NodeNet::new(config, sim).unwrap();
        assert!(matches!(
            net.launch_batch(2).await,
            Err(NetError::PortsExhausted(1))
        ));
        // The first node was launched and stays registered
        assert_eq!(net.len(), 1);
    }

    #[tokio::test]
    async fn test_temp_root_removed_on_drop() {
        let sim = Arc::new(SimNetwork::new());
        let net = NodeNet::new(NetConfig::default(), sim).unwrap();
        let root = net.data_root().to_path_buf();
        net.launch_batch(1).await.unwrap();
        assert!(root.is_dir());
        drop(net);
        assert!(!root.exists());
    }
}
