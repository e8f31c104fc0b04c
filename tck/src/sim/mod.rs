//! In-process regtest network.
//!
//! Simulated nodes implement [`NodeRpc`](crate::rpc::NodeRpc) and
//! [`NodeProcess`] on top of one shared ledger, so every component can be
//! exercised without a node binary. Nodes joined by a link, directly or
//! through other nodes, relay blocks and mempool transactions to each
//! other: every node of a connected group adopts the longest chain in it.
//!
//! What the simulator deliberately keeps simple: chain selection is by
//! height only, transactions of blocks dropped by a reorg are not returned
//! to the mempool and wallets only spend confirmed outputs.

mod chain;
mod node;
mod wallet;

pub use node::{SimNode, SimProcess};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, log_enabled, Level};
use parking_lot::Mutex;
use regnet_common::{crypto::Hash, transaction::Transaction};
use tokio::time::Instant;

use self::chain::Ledger;
use self::wallet::Wallet;
use crate::node::NodeId;
use crate::process::{LaunchedNode, NodeLauncher, NodeSpec};
use crate::rpc::RpcError;

/// Startup behavior of a simulated node.
#[derive(Debug, Clone, Default)]
pub struct SimNodeOptions {
    /// Errors returned by the first `get_info` calls, in order
    pub warmup: Vec<RpcError>,
    /// Reject every request as unauthorized
    pub unauthorized: bool,
}

impl SimNodeOptions {
    pub fn with_warmup(mut self, errors: Vec<RpcError>) -> Self {
        self.warmup = errors;
        self
    }

    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Connect,
    Disconnect,
}

/// A link change requested through `addnode` or `disconnectnode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub at: Instant,
    pub from: NodeId,
    pub to: NodeId,
    pub action: LinkAction,
}

type LinkKey = (NodeId, NodeId);

fn link_key(a: &NodeId, b: &NodeId) -> LinkKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

pub(crate) struct NodeState {
    pub running: bool,
    pub options: SimNodeOptions,
    pub warmup: VecDeque<RpcError>,
    pub chain: Vec<Hash>,
    pub mempool: Vec<Hash>,
    pub wallet: Wallet,
}

pub(crate) struct NetState {
    pub ledger: Ledger,
    pub nodes: HashMap<NodeId, NodeState>,
    // P2P address to node
    pub addrs: HashMap<String, NodeId>,
    pub links: HashSet<LinkKey>,
    pub events: Vec<LinkEvent>,
}

impl NetState {
    pub fn node(&self, id: &NodeId) -> Option<&NodeState> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut NodeState> {
        self.nodes.get_mut(id)
    }

    pub fn link_count(&self, id: &NodeId) -> usize {
        self.links.iter().filter(|(a, b)| a == id || b == id).count()
    }

    pub fn connect(&mut self, from: &NodeId, to: &NodeId) {
        self.events.push(LinkEvent {
            at: Instant::now(),
            from: from.clone(),
            to: to.clone(),
            action: LinkAction::Connect,
        });
        let reachable = self.nodes.get(to).map_or(false, |n| n.running);
        if from != to && reachable {
            self.links.insert(link_key(from, to));
            self.relay();
        }
    }

    /// Drop the link between `from` and `to`, whichever side opened it.
    pub fn disconnect(&mut self, from: &NodeId, to: &NodeId) -> bool {
        self.events.push(LinkEvent {
            at: Instant::now(),
            from: from.clone(),
            to: to.clone(),
            action: LinkAction::Disconnect,
        });
        self.links.remove(&link_key(from, to))
    }

    pub fn drop_links(&mut self, id: &NodeId) {
        self.links.retain(|(a, b)| a != id && b != id);
    }

    // Connected components over running nodes, each sorted
    fn components(&self) -> Vec<Vec<NodeId>> {
        let mut ids: Vec<&NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.running)
            .map(|(id, _)| id)
            .collect();
        ids.sort();

        let mut seen: HashSet<&NodeId> = HashSet::new();
        let mut components = Vec::new();
        for start in ids {
            if !seen.insert(start) {
                continue;
            }
            let mut component = vec![start.clone()];
            let mut queue = VecDeque::from([start]);
            while let Some(current) = queue.pop_front() {
                for (a, b) in &self.links {
                    let next = if a == current {
                        b
                    } else if b == current {
                        a
                    } else {
                        continue;
                    };
                    let running = self.nodes.get(next).map_or(false, |n| n.running);
                    if running && seen.insert(next) {
                        component.push(next.clone());
                        queue.push_back(next);
                    }
                }
            }
            component.sort();
            components.push(component);
        }
        components
    }

    /// Propagate chains and mempool transactions inside every connected
    /// group of nodes.
    pub fn relay(&mut self) {
        for component in self.components() {
            if component.len() < 2 {
                continue;
            }

            // Longest chain wins, the first one found on a tie
            let best = component
                .iter()
                .filter_map(|id| self.nodes.get(id))
                .map(|n| &n.chain)
                .fold(None::<&Vec<Hash>>, |best, chain| match best {
                    Some(b) if b.len() >= chain.len() => Some(b),
                    _ => Some(chain),
                })
                .cloned();
            if let Some(best) = best {
                for id in &component {
                    let adopt = self.nodes.get(id).map_or(false, |n| n.chain.len() < best.len());
                    if adopt {
                        if log_enabled!(Level::Debug) {
                            debug!("Simulated node {} adopts tip at height {}", id, best.len() - 1);
                        }
                        if let Some(node) = self.nodes.get_mut(id) {
                            node.chain = best.clone();
                        }
                        self.revalidate_mempool(id);
                    }
                }
            }

            let mut pending: Vec<Hash> = Vec::new();
            for id in &component {
                if let Some(node) = self.nodes.get(id) {
                    for tx in &node.mempool {
                        if !pending.contains(tx) {
                            pending.push(*tx);
                        }
                    }
                }
            }
            for id in &component {
                for tx in &pending {
                    // Rejections are expected, e.g. conflicting spends
                    let _ = self.accept_known(id, tx);
                }
            }
        }
    }

    // Keep the mempool entries that are still valid on the new chain
    fn revalidate_mempool(&mut self, id: &NodeId) {
        let (chain, old) = match self.nodes.get_mut(id) {
            Some(node) => (node.chain.clone(), std::mem::take(&mut node.mempool)),
            None => return,
        };
        let mut kept: Vec<Hash> = Vec::new();
        for hash in old {
            if self.ledger.chain_contains(&chain, &hash) {
                continue;
            }
            let valid = match self.ledger.transaction(&hash) {
                Some(tx) => self.ledger.view(&chain, &kept).check(tx).is_ok(),
                None => false,
            };
            if valid {
                kept.push(hash);
            }
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.mempool = kept;
        }
    }

    /// Admit a transaction into the mempool of `id`.
    pub fn accept(&mut self, id: &NodeId, tx: Transaction) -> Result<Hash, RpcError> {
        let hash = self.ledger.remember(tx);
        self.accept_known(id, &hash)?;
        Ok(hash)
    }

    fn accept_known(&mut self, id: &NodeId, hash: &Hash) -> Result<(), RpcError> {
        let node = self.nodes.get(id).ok_or(RpcError::ConnectionRefused)?;
        if node.mempool.contains(hash) {
            return Ok(());
        }
        if self.ledger.chain_contains(&node.chain, hash) {
            return Err(RpcError::node(
                crate::rpc::error::RPC_VERIFY_ERROR,
                "transaction already in block chain",
            ));
        }
        let tx = self
            .ledger
            .transaction(hash)
            .ok_or_else(|| RpcError::node(crate::rpc::error::RPC_VERIFY_ERROR, "unknown transaction"))?;
        self.ledger.view(&node.chain, &node.mempool).check(tx)?;
        if let Some(node) = self.nodes.get_mut(id) {
            node.mempool.push(*hash);
        }
        Ok(())
    }
}

/// Handle to a simulated network. Clones share the same network.
#[derive(Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<NetState>>,
    defaults: Arc<Mutex<SimNodeOptions>>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetState {
                ledger: Ledger::new(),
                nodes: HashMap::new(),
                addrs: HashMap::new(),
                links: HashSet::new(),
                events: Vec::new(),
            })),
            defaults: Arc::new(Mutex::new(SimNodeOptions::default())),
        }
    }

    /// Options applied to nodes started through [`NodeLauncher`].
    pub fn set_default_options(&self, options: SimNodeOptions) {
        *self.defaults.lock() = options;
    }

    pub fn spawn_node(&self, id: &NodeId) -> LaunchedNode {
        let options = self.defaults.lock().clone();
        self.spawn_node_with(id, options)
    }

    /// Start (or restart) the node `id` at the genesis block.
    pub fn spawn_node_with(&self, id: &NodeId, options: SimNodeOptions) -> LaunchedNode {
        {
            let mut state = self.state.lock();
            let genesis = state.ledger.genesis();
            state.addrs.insert(id.peer_addr(), id.clone());
            state.nodes.insert(
                id.clone(),
                NodeState {
                    running: true,
                    warmup: options.warmup.iter().cloned().collect(),
                    options,
                    chain: vec![genesis],
                    mempool: Vec::new(),
                    wallet: Wallet::new(id),
                },
            );
        }
        LaunchedNode {
            rpc: Arc::new(SimNode::new(id.clone(), self.clone())),
            process: Box::new(SimProcess::new(id.clone(), self.clone())),
        }
    }

    pub(crate) fn state(&self) -> &Mutex<NetState> {
        &self.state
    }

    /// Whether a link exists between `a` and `b`, whichever side opened it.
    pub fn is_linked(&self, a: &NodeId, b: &NodeId) -> bool {
        self.state.lock().links.contains(&link_key(a, b))
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Every link change request so far, in order.
    pub fn events(&self) -> Vec<LinkEvent> {
        self.state.lock().events.clone()
    }

    pub fn height(&self, id: &NodeId) -> Option<u64> {
        self.state
            .lock()
            .node(id)
            .map(|n| n.chain.len() as u64 - 1)
    }
}

#[async_trait]
impl NodeLauncher for SimNetwork {
    async fn launch(&self, spec: &NodeSpec) -> Result<LaunchedNode> {
        let running = self
            .state
            .lock()
            .node(&spec.id)
            .map_or(false, |n| n.running);
        if running {
            bail!("Port {} is already in use", spec.id.port);
        }
        if !spec.data_dir.is_dir() {
            bail!("Data directory {} does not exist", spec.data_dir.display());
        }
        Ok(self.spawn_node(&spec.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(port: u16) -> NodeId {
        NodeId::new("127.0.0.1", port, port + 1)
    }

    #[test]
    fn test_components_follow_links() {
        let sim = SimNetwork::new();
        for port in [10, 20, 30, 40] {
            sim.spawn_node(&id(port));
        }
        let mut state = sim.state.lock();
        state.connect(&id(10), &id(20));
        state.connect(&id(30), &id(20));
        assert_eq!(
            state.components(),
            vec![vec![id(10), id(20), id(30)], vec![id(40)]]
        );

        assert!(state.disconnect(&id(20), &id(10)));
        assert!(!state.disconnect(&id(20), &id(10)));
        assert_eq!(state.components().len(), 3);
        assert_eq!(state.events.len(), 4);
    }

    #[test]
    fn test_connect_to_self_or_unknown_is_ignored() {
        let sim = SimNetwork::new();
        sim.spawn_node(&id(10));
        let mut state = sim.state.lock();
        state.connect(&id(10), &id(10));
        state.connect(&id(10), &id(99));
        assert!(state.links.is_empty());
        assert_eq!(state.events.len(), 2);
    }
}
