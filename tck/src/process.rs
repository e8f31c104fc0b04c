//! Process lifecycle seam.
//!
//! Spawning and killing the node binary belongs to the environment running
//! the tests. The registry only talks to these traits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::node::NodeId;
use crate::rpc::NodeRpc;

/// A running (or exited) node process.
#[async_trait]
pub trait NodeProcess: Send + Sync {
    fn is_running(&self) -> bool;

    /// Request termination. The process may take a while to exit, poll
    /// [`NodeProcess::is_running`] to observe it.
    async fn stop(&self) -> Result<()>;
}

/// Everything needed to start one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub id: NodeId,
    pub data_dir: PathBuf,
    pub rpc_user: String,
    pub rpc_password: String,
    pub extra_args: Vec<String>,
}

impl NodeSpec {
    /// Command line of the node binary.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-regtest".to_string(),
            format!("-datadir={}", self.data_dir.display()),
            format!("-rpcuser={}", self.rpc_user),
            format!("-rpcpassword={}", self.rpc_password),
            format!("-rpcport={}", self.id.rpc_port),
            format!("-port={}", self.id.port),
            "-server=1".to_string(),
            "-listen=1".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// A freshly started node: its request surface and its process.
pub struct LaunchedNode {
    pub rpc: Arc<dyn NodeRpc>,
    pub process: Box<dyn NodeProcess>,
}

#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Start a node. The data directory already exists and is empty.
    async fn launch(&self, spec: &NodeSpec) -> Result<LaunchedNode>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let spec = NodeSpec {
            id: NodeId::new("127.0.0.1", 18444, 18443),
            data_dir: PathBuf::from("/tmp/regnet/18444"),
            rpc_user: "user".to_string(),
            rpc_password: "password".to_string(),
            extra_args: vec!["-txindex=1".to_string()],
        };
        assert_eq!(
            spec.args(),
            vec![
                "-regtest",
                "-datadir=/tmp/regnet/18444",
                "-rpcuser=user",
                "-rpcpassword=password",
                "-rpcport=18443",
                "-port=18444",
                "-server=1",
                "-listen=1",
                "-txindex=1",
            ]
        );
    }
}
