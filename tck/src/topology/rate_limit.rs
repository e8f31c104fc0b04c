//! Minimum spacing between changes to one edge.
//!
//! Rapid connect/disconnect flapping on the same pair of nodes can leave
//! the node's peer manager in an inconsistent state. Every change to an
//! edge waits until `min_spacing` has passed since the last change issued
//! from either side, and changes to one edge are serialized by a lock keyed
//! by the unordered pair.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, log_enabled, Level};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{Duration, Instant};

use crate::node::{NodeHandle, NodeId};
use crate::orchestrator::Clock;

type EdgeKey = (NodeId, NodeId);

fn edge_key(a: &NodeId, b: &NodeId) -> EdgeKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

pub struct EdgeRateLimiter {
    clock: Arc<dyn Clock>,
    min_spacing: Duration,
    locks: Mutex<HashMap<EdgeKey, Arc<AsyncMutex<()>>>>,
}

impl EdgeRateLimiter {
    pub fn new(clock: Arc<dyn Clock>, min_spacing: Duration) -> Self {
        Self {
            clock,
            min_spacing,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Exclusive access to the edge between `a` and `b`, in either
    /// direction.
    pub async fn lock_edge(&self, a: &NodeId, b: &NodeId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(edge_key(a, b))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Earliest instant the edge may change again, if it changed before.
    pub fn next_allowed(&self, a: &NodeHandle, b: &NodeHandle) -> Option<Instant> {
        let last = match (a.last_change(b.id()), b.last_change(a.id())) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        };
        last.map(|last| last + self.min_spacing)
    }

    /// Sleep until the edge may change again. Call with the edge lock held.
    pub async fn wait(&self, a: &NodeHandle, b: &NodeHandle) {
        if let Some(deadline) = self.next_allowed(a, b) {
            let now = self.clock.now();
            if now < deadline {
                if log_enabled!(Level::Debug) {
                    debug!(
                        "Delaying change of edge {} <-> {} by {:?}",
                        a.id(),
                        b.id(),
                        deadline - now
                    );
                }
                self.clock.sleep_until(deadline).await;
            }
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }
}
