//! Startup readiness polling.
//!
//! A freshly launched node refuses connections for a moment, then answers
//! with warm-up codes while it loads its block index or catches up. The
//! waiter keeps polling through those, with a different interval per
//! condition, and gives up immediately on anything it cannot wait out.

use std::collections::HashSet;

use log::{debug, info, log_enabled, Level};
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};

use super::NodeId;
use crate::rpc::{ErrorClass, NodeInfo, NodeRpc, RpcError, RpcResult};

pub const TRANSIENT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DOWNLOADING_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const LOADING_POLL_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    Polling,
    Ready,
    Failed,
    TimedOut,
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("Node {} rejected our credentials", node)]
    Unauthorized { node: NodeId },
    #[error("Node {} failed to start, make sure it is configured: {}", node, source)]
    Fatal { node: NodeId, source: RpcError },
    #[error("Timeout waiting for node {} to become ready after {:?}", node, timeout)]
    Timeout {
        node: NodeId,
        timeout: Duration,
        last_error: Option<RpcError>,
    },
}

/// What to do after one `get_info` poll.
#[derive(Debug)]
pub enum Step {
    Ready(NodeInfo),
    Retry(Duration),
    Fail(ReadinessError),
}

/// Readiness state machine of one node:
/// `Starting -> Polling -> Ready | Failed | TimedOut`.
pub struct ReadinessWaiter {
    node: NodeId,
    timeout: Duration,
    state: ReadinessState,
    logged_downloading: bool,
    logged_messages: HashSet<String>,
    last_error: Option<RpcError>,
}

impl ReadinessWaiter {
    pub fn new(node: NodeId, timeout: Duration) -> Self {
        Self {
            node,
            timeout,
            state: ReadinessState::Starting,
            logged_downloading: false,
            logged_messages: HashSet::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    /// Classify one poll result and move the state machine.
    pub fn observe(&mut self, result: RpcResult<NodeInfo>) -> Step {
        let err = match result {
            Ok(info) => {
                self.state = ReadinessState::Ready;
                return Step::Ready(info);
            }
            Err(err) => err,
        };

        let step = match err.class() {
            ErrorClass::TransientStartup => Step::Retry(TRANSIENT_POLL_INTERVAL),
            ErrorClass::Downloading => {
                if !self.logged_downloading {
                    self.logged_downloading = true;
                    info!("Node {} is syncing blocks, waiting for completion", self.node);
                }
                Step::Retry(DOWNLOADING_POLL_INTERVAL)
            }
            ErrorClass::LoadingIndex => {
                let message = match &err {
                    RpcError::Node { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                if self.logged_messages.insert(message.clone()) {
                    info!("Node {} is warming up ({}), waiting for completion", self.node, message);
                }
                Step::Retry(LOADING_POLL_INTERVAL)
            }
            ErrorClass::Unauthorized => Step::Fail(ReadinessError::Unauthorized {
                node: self.node.clone(),
            }),
            ErrorClass::Fatal => Step::Fail(ReadinessError::Fatal {
                node: self.node.clone(),
                source: err.clone(),
            }),
        };

        match step {
            Step::Fail(_) => self.state = ReadinessState::Failed,
            _ => {
                self.state = ReadinessState::Polling;
                self.last_error = Some(err);
            }
        }
        step
    }

    /// Poll `rpc` until it is ready, fails terminally, or the deadline
    /// passes. A request already in flight at the deadline is awaited; its
    /// result decides the outcome only if it arrives in time.
    pub async fn wait(&mut self, rpc: &dyn NodeRpc) -> Result<NodeInfo, ReadinessError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let result = rpc.get_info().await;
            if Instant::now() > deadline && result.is_err() {
                return Err(self.timed_out());
            }

            match self.observe(result) {
                Step::Ready(info) => {
                    if log_enabled!(Level::Debug) {
                        debug!("Node {} is ready at height {}", self.node, info.blocks);
                    }
                    return Ok(info);
                }
                Step::Fail(err) => return Err(err),
                Step::Retry(interval) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(self.timed_out());
                    }
                    sleep(interval.min(deadline - now)).await;
                }
            }
        }
    }

    fn timed_out(&mut self) -> ReadinessError {
        self.state = ReadinessState::TimedOut;
        ReadinessError::Timeout {
            node: self.node.clone(),
            timeout: self.timeout,
            last_error: self.last_error.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::error::{RPC_CLIENT_IN_INITIAL_DOWNLOAD, RPC_CLIENT_NOT_CONNECTED, RPC_IN_WARMUP};

    fn waiter() -> ReadinessWaiter {
        ReadinessWaiter::new(NodeId::new("127.0.0.1", 1, 2), Duration::from_secs(10))
    }

    fn info() -> NodeInfo {
        NodeInfo {
            version: 1,
            blocks: 0,
            connections: 0,
            warnings: String::new(),
        }
    }

    #[test]
    fn test_transient_errors_retry() {
        let mut w = waiter();
        assert_eq!(w.state(), ReadinessState::Starting);

        assert!(matches!(
            w.observe(Err(RpcError::ConnectionRefused)),
            Step::Retry(d) if d == TRANSIENT_POLL_INTERVAL
        ));
        assert_eq!(w.state(), ReadinessState::Polling);
        assert!(matches!(
            w.observe(Err(RpcError::node(RPC_CLIENT_NOT_CONNECTED, ""))),
            Step::Retry(d) if d == TRANSIENT_POLL_INTERVAL
        ));
        assert!(matches!(
            w.observe(Err(RpcError::node(RPC_CLIENT_IN_INITIAL_DOWNLOAD, "downloading"))),
            Step::Retry(d) if d == DOWNLOADING_POLL_INTERVAL
        ));
        assert!(matches!(
            w.observe(Err(RpcError::node(RPC_IN_WARMUP, "Loading block index..."))),
            Step::Retry(d) if d == LOADING_POLL_INTERVAL
        ));
        assert!(matches!(w.observe(Ok(info())), Step::Ready(_)));
        assert_eq!(w.state(), ReadinessState::Ready);
    }

    #[test]
    fn test_warmup_messages_logged_once_each() {
        let mut w = waiter();
        w.observe(Err(RpcError::node(RPC_IN_WARMUP, "Loading block index...")));
        w.observe(Err(RpcError::node(RPC_IN_WARMUP, "Loading block index...")));
        w.observe(Err(RpcError::node(RPC_IN_WARMUP, "Verifying blocks...")));
        assert_eq!(w.logged_messages.len(), 2);
    }

    #[test]
    fn test_unauthorized_is_terminal() {
        let mut w = waiter();
        assert!(matches!(
            w.observe(Err(RpcError::Unauthorized)),
            Step::Fail(ReadinessError::Unauthorized { .. })
        ));
        assert_eq!(w.state(), ReadinessState::Failed);
    }

    #[test]
    fn test_unknown_error_is_fatal() {
        let mut w = waiter();
        assert!(matches!(
            w.observe(Err(RpcError::node(-1, "unexpected"))),
            Step::Fail(ReadinessError::Fatal { .. })
        ));
        assert_eq!(w.state(), ReadinessState::Failed);
    }
}
