//! Connection graph control: connect, disconnect, partition, merge.
//!
//! Single edge changes go through the [`EdgeRateLimiter`]. Operations that
//! touch many nodes fan out one task per node and join them with a
//! [`Barrier`]; partitioning runs two such phases strictly one after the
//! other.

pub mod barrier;
pub mod partition;
pub mod rate_limit;

pub use barrier::{Barrier, Failure, Ticket};
pub use partition::{assign_groups, AssignmentError};
pub use rate_limit::EdgeRateLimiter;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, log_enabled, trace, Level};
use thiserror::Error;

use crate::config::TopologyConfig;
use crate::node::{NodeHandle, NodeId};
use crate::orchestrator::{Clock, SystemClock};
use crate::rpc::{AddNodeCommand, RpcError};

/// A group of nodes produced by a partition.
pub type TopologyGroup = Vec<Arc<NodeHandle>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeAction {
    Connect,
    Disconnect,
}

impl fmt::Display for EdgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeAction::Connect => write!(f, "connect"),
            EdgeAction::Disconnect => write!(f, "disconnect"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeOutcome {
    /// The request was issued
    Applied,
    /// Already in the requested state, nothing was sent
    Unchanged,
}

/// Result of one edge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeChange {
    pub from: NodeId,
    pub to: NodeId,
    pub action: EdgeAction,
    pub outcome: EdgeOutcome,
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Failed to {} {} -> {}: {}", action, from, to, source)]
    Rpc {
        from: NodeId,
        to: NodeId,
        action: EdgeAction,
        source: RpcError,
    },
    #[error("Cannot partition {} nodes into {} groups", nodes, groups)]
    InvalidGroupCount { nodes: usize, groups: usize },
    #[error("Invalid designation: {}", _0)]
    InvalidDesignation(AssignmentError),
    #[error("Designated node {} is not part of the partitioned set", _0)]
    UnknownDesignatedNode(NodeId),
    #[error(transparent)]
    Phase(#[from] PhaseError),
}

/// Every failure of one fan-out phase.
#[derive(Debug, Error)]
pub struct PhaseError {
    pub phase: &'static str,
    pub failures: Vec<Failure<TopologyError>>,
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} operation(s) failed during {}", self.failures.len(), self.phase)?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

// One fan-out job: a node and the peers it acts on
type Job = (Arc<NodeHandle>, Vec<Arc<NodeHandle>>);

#[derive(Clone)]
pub struct TopologyController {
    limiter: Arc<EdgeRateLimiter>,
}

impl TopologyController {
    pub fn new(config: TopologyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter: Arc::new(EdgeRateLimiter::new(clock, config.min_edge_spacing)),
        }
    }

    pub fn with_system_clock(config: TopologyConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn limiter(&self) -> &EdgeRateLimiter {
        &self.limiter
    }

    /// Have `node` connect to each target in order, stopping at the first
    /// failure. Targets it already connected to are left alone.
    pub async fn connect(
        &self,
        node: &NodeHandle,
        targets: &[Arc<NodeHandle>],
    ) -> Result<Vec<EdgeChange>, TopologyError> {
        let mut changes = Vec::with_capacity(targets.len());
        for target in targets {
            changes.push(self.connect_one(node, target).await?);
        }
        Ok(changes)
    }

    pub async fn connect_one(
        &self,
        node: &NodeHandle,
        target: &NodeHandle,
    ) -> Result<EdgeChange, TopologyError> {
        let change = |outcome| EdgeChange {
            from: node.id().clone(),
            to: target.id().clone(),
            action: EdgeAction::Connect,
            outcome,
        };
        if node.id() == target.id() {
            return Ok(change(EdgeOutcome::Unchanged));
        }

        let _edge = self.limiter.lock_edge(node.id(), target.id()).await;
        if node.has_connection(target.id()) {
            return Ok(change(EdgeOutcome::Unchanged));
        }
        self.limiter.wait(node, target).await;

        // Counts as issued even if the request fails
        node.record_connect(target.id(), self.limiter.now());
        trace!("{} -> {}: addnode onetry", node.id(), target.id());
        node.rpc()
            .add_node(&target.id().peer_addr(), AddNodeCommand::OneTry)
            .await
            .map_err(|source| TopologyError::Rpc {
                from: node.id().clone(),
                to: target.id().clone(),
                action: EdgeAction::Connect,
                source,
            })?;
        Ok(change(EdgeOutcome::Applied))
    }

    /// Have `node` disconnect from each target in order, stopping at the
    /// first failure. Targets it is not connected to are left alone.
    pub async fn disconnect(
        &self,
        node: &NodeHandle,
        targets: &[Arc<NodeHandle>],
    ) -> Result<Vec<EdgeChange>, TopologyError> {
        let mut changes = Vec::with_capacity(targets.len());
        for target in targets {
            changes.push(self.disconnect_one(node, target).await?);
        }
        Ok(changes)
    }

    pub async fn disconnect_one(
        &self,
        node: &NodeHandle,
        target: &NodeHandle,
    ) -> Result<EdgeChange, TopologyError> {
        let change = |outcome| EdgeChange {
            from: node.id().clone(),
            to: target.id().clone(),
            action: EdgeAction::Disconnect,
            outcome,
        };

        let _edge = self.limiter.lock_edge(node.id(), target.id()).await;
        if !node.has_connection(target.id()) {
            return Ok(change(EdgeOutcome::Unchanged));
        }
        self.limiter.wait(node, target).await;

        node.stamp(target.id(), self.limiter.now());
        trace!("{} -> {}: disconnectnode", node.id(), target.id());
        node.rpc()
            .disconnect_node(&target.id().peer_addr())
            .await
            .map_err(|source| TopologyError::Rpc {
                from: node.id().clone(),
                to: target.id().clone(),
                action: EdgeAction::Disconnect,
                source,
            })?;
        node.forget_connection(target.id());
        Ok(change(EdgeOutcome::Applied))
    }

    /// The first node connects to all the others.
    pub async fn connect_nodes(
        &self,
        nodes: &[Arc<NodeHandle>],
    ) -> Result<Vec<EdgeChange>, TopologyError> {
        match nodes.split_first() {
            Some((first, rest)) => self.connect(first, rest).await,
            None => Ok(Vec::new()),
        }
    }

    /// Remove every edge between `group_a` and `group_b`, from whichever
    /// side issued it. Edges within a group or to other nodes stay.
    pub async fn disconnect_groups(
        &self,
        group_a: &[Arc<NodeHandle>],
        group_b: &[Arc<NodeHandle>],
    ) -> Result<Vec<EdgeChange>, TopologyError> {
        let jobs: Vec<Job> = group_a
            .iter()
            .map(|a| (a.clone(), a.get_connected(group_b)))
            .chain(group_b.iter().map(|b| (b.clone(), b.get_connected(group_a))))
            .filter(|(_, targets)| !targets.is_empty())
            .collect();
        self.fan_out("disconnect groups", EdgeAction::Disconnect, jobs).await
    }

    /// Split `nodes` into at most `group_count` isolated, fully meshed
    /// groups. `designations[g]` lists nodes that must end up in group `g`.
    ///
    /// All cross-group edges are removed before any in-group edge is added.
    pub async fn partition(
        &self,
        nodes: &[Arc<NodeHandle>],
        group_count: usize,
        designations: &[Vec<NodeId>],
    ) -> Result<Vec<TopologyGroup>, TopologyError> {
        if group_count == 0 {
            return Err(TopologyError::InvalidGroupCount {
                nodes: nodes.len(),
                groups: group_count,
            });
        }

        let positions: HashMap<&NodeId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.id(), i)).collect();
        let designated = designations
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|id| {
                        positions
                            .get(id)
                            .copied()
                            .ok_or_else(|| TopologyError::UnknownDesignatedNode(id.clone()))
                    })
                    .collect::<Result<Vec<usize>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let assignment = assign_groups(nodes.len(), group_count, &designated)
            .map_err(TopologyError::InvalidDesignation)?;
        let groups: Vec<TopologyGroup> = assignment
            .iter()
            .map(|members| members.iter().map(|&p| nodes[p].clone()).collect())
            .collect();

        if log_enabled!(Level::Info) {
            let sizes: Vec<usize> = groups.iter().map(|g| g.len()).collect();
            info!("Partitioning {} nodes into groups of sizes {:?}", nodes.len(), sizes);
        }

        // Phase 1: drop every cross-group edge
        let mut group_of: HashMap<&NodeId, usize> = HashMap::new();
        for (g, members) in groups.iter().enumerate() {
            for node in members {
                group_of.insert(node.id(), g);
            }
        }
        let isolate: Vec<Job> = nodes
            .iter()
            .map(|node| {
                let own = group_of.get(node.id()).copied();
                let strangers: Vec<Arc<NodeHandle>> = nodes
                    .iter()
                    .filter(|peer| group_of.get(peer.id()).copied() != own)
                    .cloned()
                    .collect();
                (node.clone(), node.get_connected(&strangers))
            })
            .filter(|(_, targets)| !targets.is_empty())
            .collect();
        self.fan_out("partition isolation", EdgeAction::Disconnect, isolate)
            .await?;

        // Phase 2: full mesh inside each group
        let mut mesh: Vec<Job> = Vec::new();
        for members in &groups {
            for (i, node) in members.iter().enumerate() {
                let targets: Vec<Arc<NodeHandle>> = members[i + 1..]
                    .iter()
                    .filter(|peer| !node.is_connected(peer, true))
                    .cloned()
                    .collect();
                if !targets.is_empty() {
                    mesh.push((node.clone(), targets));
                }
            }
        }
        self.fan_out("partition mesh", EdgeAction::Connect, mesh).await?;

        Ok(groups)
    }

    /// Fully connect `nodes`: node i connects to nodes i+1..n. Reports one
    /// change per pair, n(n-1)/2 in total.
    pub async fn merge(&self, nodes: &[Arc<NodeHandle>]) -> Result<Vec<EdgeChange>, TopologyError> {
        let jobs: Vec<Job> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| i + 1 < nodes.len())
            .map(|(i, node)| (node.clone(), nodes[i + 1..].to_vec()))
            .collect();
        if log_enabled!(Level::Info) {
            info!("Merging {} nodes", nodes.len());
        }
        self.fan_out("merge", EdgeAction::Connect, jobs).await
    }

    async fn fan_out(
        &self,
        phase: &'static str,
        action: EdgeAction,
        jobs: Vec<Job>,
    ) -> Result<Vec<EdgeChange>, TopologyError> {
        let barrier: Barrier<Vec<EdgeChange>, TopologyError> = Barrier::new();
        for (node, targets) in jobs {
            let ticket = barrier.tick();
            let controller = self.clone();
            tokio::spawn(async move {
                let result = match action {
                    EdgeAction::Connect => controller.connect(&node, &targets).await,
                    EdgeAction::Disconnect => controller.disconnect(&node, &targets).await,
                };
                ticket.complete(result);
            });
        }

        match barrier.wait().await {
            Ok(outcomes) => {
                let changes: Vec<EdgeChange> = outcomes.into_iter().flatten().collect();
                if log_enabled!(Level::Debug) {
                    let applied = changes
                        .iter()
                        .filter(|c| c.outcome == EdgeOutcome::Applied)
                        .count();
                    debug!("{}: {} of {} edge changes applied", phase, applied, changes.len());
                }
                Ok(changes)
            }
            Err(failures) => Err(PhaseError { phase, failures }.into()),
        }
    }
}
