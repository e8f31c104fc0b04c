//! Capability contract of a regtest node's JSON-RPC interface.
//!
//! Only the request surface is defined here; the transport is supplied by
//! whoever launches the node. Payload types deserialize from the node's own
//! JSON field names, amounts cross the boundary as decimal coins.

pub mod error;

pub use error::{ErrorClass, RpcError, RpcResult};

use async_trait::async_trait;
use regnet_common::{
    amount::Amount,
    serializer::ReaderError,
    transaction::OutPoint,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub version: u64,
    pub blocks: u64,
    #[serde(default)]
    pub connections: u32,
    #[serde(default)]
    pub warnings: String,
}

/// Reference to a spendable output.
///
/// `amount` and `address` are optional: when known they save a round trip
/// to resolve the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: Option<String>,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
            amount: None,
            address: None,
            script_pub_key: None,
        }
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn outpoint(&self) -> Result<OutPoint, ReaderError> {
        OutPoint::from_txid(&self.txid, self.vout)
    }
}

/// Input of `createrawtransaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInRef {
    pub txid: String,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: Option<String>,
    #[serde(rename = "ismine", default)]
    pub is_mine: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundedTransaction {
    pub hex: String,
    /// Index of the change output, -1 when none was added
    #[serde(rename = "changepos")]
    pub change_position: i32,
    pub fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedScript {
    pub hex: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInput {
    // Absent on coinbase inputs
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedOutput {
    pub value: Amount,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: DecodedScript,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedTransaction {
    pub txid: String,
    pub version: u32,
    #[serde(rename = "locktime")]
    pub lock_time: u32,
    pub vin: Vec<DecodedInput>,
    pub vout: Vec<DecodedOutput>,
}

/// Verbose `getblock` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: String,
    pub height: u64,
    pub version: u32,
    #[serde(rename = "previousblockhash", default)]
    pub previous_block_hash: Option<String>,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: u32,
    /// Compact target as hex, e.g. "207fffff"
    pub bits: String,
    pub nonce: u32,
    pub tx: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddNodeCommand {
    Add,
    Remove,
    OneTry,
}

impl AddNodeCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddNodeCommand::Add => "add",
            AddNodeCommand::Remove => "remove",
            AddNodeCommand::OneTry => "onetry",
        }
    }
}

/// Request surface of one node.
///
/// Every call may fail with a transport error or a node-reported code,
/// see [`RpcError`].
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn get_info(&self) -> RpcResult<NodeInfo>;

    async fn get_block_count(&self) -> RpcResult<u64>;

    async fn get_block_hash(&self, height: u64) -> RpcResult<String>;

    async fn get_block(&self, hash: &str) -> RpcResult<BlockInfo>;

    async fn get_balance(&self) -> RpcResult<Amount>;

    async fn get_new_address(&self) -> RpcResult<String>;

    async fn generate_to_address(&self, count: u64, address: &str) -> RpcResult<Vec<String>>;

    async fn send_to_address(&self, address: &str, amount: Amount) -> RpcResult<String>;

    async fn add_node(&self, peer: &str, command: AddNodeCommand) -> RpcResult<()>;

    async fn disconnect_node(&self, peer: &str) -> RpcResult<()>;

    async fn list_unspent(&self) -> RpcResult<Vec<Utxo>>;

    async fn get_raw_mempool(&self) -> RpcResult<Vec<String>>;

    /// Raw transaction hex
    async fn get_raw_transaction(&self, txid: &str) -> RpcResult<String>;

    async fn decode_raw_transaction(&self, hex: &str) -> RpcResult<DecodedTransaction>;

    async fn create_raw_transaction(
        &self,
        inputs: &[TxInRef],
        outputs: &[(String, Amount)],
    ) -> RpcResult<String>;

    async fn fund_raw_transaction(&self, hex: &str) -> RpcResult<FundedTransaction>;

    async fn sign_raw_transaction_with_wallet(&self, hex: &str) -> RpcResult<SignedTransaction>;

    /// Broadcast, returns the txid
    async fn send_raw_transaction(&self, hex: &str) -> RpcResult<String>;

    async fn get_address_info(&self, address: &str) -> RpcResult<AddressInfo>;

    async fn dump_priv_key(&self, address: &str) -> RpcResult<String>;

    async fn import_priv_key(&self, key: &str, label: &str, rescan: bool) -> RpcResult<()>;
}
