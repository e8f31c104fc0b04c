// Wallet conveniences of a node handle

use log::{debug, log_enabled, Level};
use regnet_common::amount::Amount;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};

use super::NodeHandle;
use crate::rpc::{RpcError, RpcResult};

pub const DEFAULT_BALANCE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MEMPOOL_TIMEOUT: Duration = Duration::from_secs(2);
const BALANCE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MEMPOOL_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Unable to get scriptPubKey for address {}", _0)]
    MissingScriptPubKey(String),
    #[error("Invalid scriptPubKey hex for address {}", _0)]
    InvalidScriptPubKey(String),
    #[error("Timeout waiting for balance change (old = {})", old)]
    BalanceTimeout { old: Amount },
}

/// Where a transaction was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxLocation {
    Mempool,
}

impl NodeHandle {
    pub async fn get_balance(&self) -> RpcResult<Amount> {
        self.rpc.get_balance().await
    }

    /// Poll the balance every 100ms until it differs from `old`.
    pub async fn wait_for_balance_change(
        &self,
        old: Amount,
        timeout: Duration,
    ) -> Result<Amount, WalletError> {
        let deadline = Instant::now() + timeout;
        loop {
            let balance = self.rpc.get_balance().await?;
            if balance != old {
                return Ok(balance);
            }
            if Instant::now() >= deadline {
                return Err(WalletError::BalanceTimeout { old });
            }
            sleep(BALANCE_POLL_INTERVAL).await;
        }
    }

    pub async fn get_new_address(&self) -> RpcResult<String> {
        self.rpc.get_new_address().await
    }

    /// Mine `count` blocks paying a fresh address of this node.
    pub async fn generate_blocks(&self, count: u64) -> RpcResult<Vec<String>> {
        let address = self.rpc.get_new_address().await?;
        let hashes = self.rpc.generate_to_address(count, &address).await?;
        if log_enabled!(Level::Debug) {
            debug!("Node {} mined {} blocks", self.id, hashes.len());
        }
        Ok(hashes)
    }

    pub async fn send_to_address(&self, address: &str, amount: Amount) -> RpcResult<String> {
        self.rpc.send_to_address(address, amount).await
    }

    /// Pay `amount` to a fresh address owned by `other`.
    pub async fn send_to_node(&self, other: &NodeHandle, amount: Amount) -> RpcResult<String> {
        let address = other.rpc.get_new_address().await?;
        self.rpc.send_to_address(&address, amount).await
    }

    /// Poll the mempool every 200ms for `txid`. Not finding it before the
    /// deadline is `Ok(None)`; request failures are returned as is.
    pub async fn wait_for_transaction(
        &self,
        txid: &str,
        timeout: Duration,
    ) -> RpcResult<Option<TxLocation>> {
        let deadline = Instant::now() + timeout;
        loop {
            let mempool = self.rpc.get_raw_mempool().await?;
            if mempool.iter().any(|id| id == txid) {
                return Ok(Some(TxLocation::Mempool));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(MEMPOOL_POLL_INTERVAL).await;
        }
    }

    /// Output script the node associates with `address`.
    pub async fn get_script_pubkey(&self, address: &str) -> Result<Vec<u8>, WalletError> {
        let info = self.rpc.get_address_info(address).await?;
        let script = info
            .script_pub_key
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WalletError::MissingScriptPubKey(address.to_string()))?;
        hex::decode(script).map_err(|_| WalletError::InvalidScriptPubKey(address.to_string()))
    }

    /// Make `address` spendable by both nodes: whichever side owns it
    /// exports the key and the other imports it (empty label, no rescan).
    pub async fn share_address_with_node(
        &self,
        other: &NodeHandle,
        address: &str,
    ) -> RpcResult<()> {
        let info = self.rpc.get_address_info(address).await?;
        let (owner, receiver) = if info.is_mine {
            (self, other)
        } else {
            (other, self)
        };
        let key = owner.rpc.dump_priv_key(address).await?;
        receiver.rpc.import_priv_key(&key, "", false).await
    }
}
