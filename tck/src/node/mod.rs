//! Per-node state: identity, collaborators and outbound connection
//! bookkeeping.

mod readiness;
mod wallet;

pub use readiness::{ReadinessError, ReadinessState, ReadinessWaiter, Step};
pub use wallet::{TxLocation, WalletError};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::process::{LaunchedNode, NodeProcess};
use crate::rpc::{NodeInfo, NodeRpc};

/// Identity of a node. Two handles with the same host and ports are the
/// same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
    pub rpc_port: u16,
}

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16, rpc_port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            rpc_port,
        }
    }

    /// P2P address used in `addnode` and `disconnectnode` requests
    pub fn peer_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// Outbound intents issued by this node and when each edge last changed
#[derive(Default)]
struct PeerBook {
    connections: HashSet<NodeId>,
    stamps: HashMap<NodeId, Instant>,
}

/// Handle to one node of the network.
///
/// `connections` is asymmetric: a node only records the connects it issued
/// itself. A peer stays recorded until a disconnect from this side succeeds.
pub struct NodeHandle {
    id: NodeId,
    rpc: Arc<dyn NodeRpc>,
    process: Box<dyn NodeProcess>,
    peers: Mutex<PeerBook>,
}

impl NodeHandle {
    pub fn new(id: NodeId, rpc: Arc<dyn NodeRpc>, process: Box<dyn NodeProcess>) -> Self {
        Self {
            id,
            rpc,
            process,
            peers: Mutex::new(PeerBook::default()),
        }
    }

    pub fn from_launched(id: NodeId, launched: LaunchedNode) -> Self {
        Self::new(id, launched.rpc, launched.process)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn rpc(&self) -> &Arc<dyn NodeRpc> {
        &self.rpc
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    pub async fn stop(&self) -> Result<()> {
        self.process.stop().await
    }

    /// Poll the node until it answers `get_info`, see [`ReadinessWaiter`].
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<NodeInfo, ReadinessError> {
        ReadinessWaiter::new(self.id.clone(), timeout).wait(self.rpc.as_ref()).await
    }

    pub fn has_connection(&self, peer: &NodeId) -> bool {
        self.peers.lock().connections.contains(peer)
    }

    /// Whether this node issued a connect to `other`. With `bidirectional`
    /// a connect issued by `other` toward this node also counts.
    pub fn is_connected(&self, other: &NodeHandle, bidirectional: bool) -> bool {
        self.has_connection(&other.id) || (bidirectional && other.has_connection(&self.id))
    }

    /// Members of `nodes` this node issued a connect to, in input order.
    pub fn get_connected(&self, nodes: &[Arc<NodeHandle>]) -> Vec<Arc<NodeHandle>> {
        let book = self.peers.lock();
        nodes
            .iter()
            .filter(|node| book.connections.contains(&node.id))
            .cloned()
            .collect()
    }

    /// Recorded outbound connections, sorted.
    pub fn connections(&self) -> Vec<NodeId> {
        let mut connections: Vec<NodeId> = self.peers.lock().connections.iter().cloned().collect();
        connections.sort();
        connections
    }

    /// When a connect or disconnect toward `peer` was last requested.
    pub fn last_change(&self, peer: &NodeId) -> Option<Instant> {
        self.peers.lock().stamps.get(peer).copied()
    }

    // Records the intent and its time; false if it was already recorded
    pub(crate) fn record_connect(&self, peer: &NodeId, at: Instant) -> bool {
        let mut book = self.peers.lock();
        book.stamps.insert(peer.clone(), at);
        book.connections.insert(peer.clone())
    }

    pub(crate) fn stamp(&self, peer: &NodeId, at: Instant) {
        self.peers.lock().stamps.insert(peer.clone(), at);
    }

    pub(crate) fn forget_connection(&self, peer: &NodeId) -> bool {
        self.peers.lock().connections.remove(peer)
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("connections", &self.connections())
            .finish()
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeHandle {}
