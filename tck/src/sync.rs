//! Chain tip convergence between nodes.
//!
//! Two nodes are synced when they report the same height and the same
//! block hash at that height. The waiters here poll until that holds and
//! never treat a mismatch as an error: only request failures and the
//! deadline end a wait early.

use std::sync::Arc;

use log::{debug, info, log_enabled, warn, Level};
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};

use crate::node::{NodeHandle, NodeId};
use crate::rpc::RpcError;

pub const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Agreement between two nodes at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Synced { height: u64, hash: String },
    HeightMismatch { a: u64, b: u64 },
    HashMismatch { height: u64, a: String, b: String },
}

impl SyncState {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncState::Synced { .. })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to query {}: {}", node, source)]
    Rpc { node: NodeId, source: RpcError },
    #[error("Timeout waiting for {} and {} to sync after {:?}, last state {:?}", a, b, timeout, last)]
    Timeout {
        a: NodeId,
        b: NodeId,
        timeout: Duration,
        last: SyncState,
    },
}

fn rpc_error(node: &NodeHandle) -> impl FnOnce(RpcError) -> SyncError + '_ {
    move |source| SyncError::Rpc {
        node: node.id().clone(),
        source,
    }
}

/// Compare heights, then the block hashes at the shared height.
pub async fn get_sync_state(a: &NodeHandle, b: &NodeHandle) -> Result<SyncState, SyncError> {
    let height_a = a.rpc().get_block_count().await.map_err(rpc_error(a))?;
    let height_b = b.rpc().get_block_count().await.map_err(rpc_error(b))?;
    if height_a != height_b {
        return Ok(SyncState::HeightMismatch {
            a: height_a,
            b: height_b,
        });
    }

    let hash_a = a.rpc().get_block_hash(height_a).await.map_err(rpc_error(a))?;
    let hash_b = b.rpc().get_block_hash(height_b).await.map_err(rpc_error(b))?;
    if hash_a == hash_b {
        Ok(SyncState::Synced {
            height: height_a,
            hash: hash_a,
        })
    } else {
        Ok(SyncState::HashMismatch {
            height: height_a,
            a: hash_a,
            b: hash_b,
        })
    }
}

/// Poll every 100ms until `a` and `b` agree on their tip.
///
/// Nodes that are not connected in either direction are still waited on,
/// they may be linked through other nodes, but a warning is logged since
/// the wait is likely to time out.
pub async fn sync(a: &NodeHandle, b: &NodeHandle, timeout: Duration) -> Result<u64, SyncError> {
    if !a.is_connected(b, true) {
        warn!(
            "Syncing {} and {} which are not directly connected",
            a.id(),
            b.id()
        );
    }

    let deadline = Instant::now() + timeout;
    loop {
        let state = get_sync_state(a, b).await?;
        if let SyncState::Synced { height, .. } = state {
            if log_enabled!(Level::Debug) {
                debug!("{} and {} synced at height {}", a.id(), b.id(), height);
            }
            return Ok(height);
        }

        if Instant::now() >= deadline {
            return Err(SyncError::Timeout {
                a: a.id().clone(),
                b: b.id().clone(),
                timeout,
                last: state,
            });
        }
        sleep(SYNC_POLL_INTERVAL).await;
    }
}

/// Sync every adjacent pair of `nodes`, in order. Each pair gets the full
/// `timeout`.
pub async fn sync_all(nodes: &[Arc<NodeHandle>], timeout: Duration) -> Result<(), SyncError> {
    for pair in nodes.windows(2) {
        sync(&pair[0], &pair[1], timeout).await?;
    }
    if log_enabled!(Level::Info) && nodes.len() > 1 {
        info!("{} nodes synced", nodes.len());
    }
    Ok(())
}
