// Prelude
//
// `use regnet_tck::prelude::*;` brings in what a typical network test needs.

pub use crate::config::{FeeConfig, NetConfig, TopologyConfig};
pub use crate::net::{NetError, NodeNet};
pub use crate::node::{NodeHandle, NodeId, ReadinessError, TxLocation, WalletError};
pub use crate::orchestrator::{Clock, PausedClock, SystemClock};
pub use crate::process::{LaunchedNode, NodeLauncher, NodeProcess, NodeSpec};
pub use crate::rpc::{AddNodeCommand, NodeRpc, RpcError, RpcResult, Utxo};
pub use crate::sim::{SimNetwork, SimNodeOptions};
pub use crate::sync::{get_sync_state, sync, sync_all, SyncError, SyncState, DEFAULT_SYNC_TIMEOUT};
pub use crate::topology::{EdgeAction, EdgeChange, EdgeOutcome, TopologyController, TopologyError};
pub use crate::tx_builder::{fetch_block, DoubleSpendPair, TransactionBuilder, TxBuilderError};

pub use regnet_common::amount::Amount;
pub use regnet_common::block::Block;
pub use regnet_common::config::COIN;
pub use regnet_common::transaction::{OutPoint, Transaction, TxInput, TxOutput};

// Re-export commonly used external types
pub use anyhow::{anyhow, Context, Result};
pub use std::sync::Arc;
pub use tokio::time::Duration;
