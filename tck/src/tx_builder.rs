//! Funded, fee-accounted and deliberately conflicting transactions.
//!
//! The builder never validates what it produces; the node does. It asks
//! nodes for outputs and previous transactions, edits raw transactions
//! with the wire codec and hands them back for signing and broadcast.

use log::{debug, log_enabled, Level};
use regnet_common::{
    amount::Amount,
    block::{Block, BlockHeader, BlockTransaction},
    crypto::Hash,
    serializer::{ReaderError, Serializer},
    transaction::{OutPoint, Transaction, TxInput, TxOutput},
};
use thiserror::Error;

use crate::config::FeeConfig;
use crate::node::{NodeHandle, WalletError};
use crate::rpc::{FundedTransaction, RpcError, Utxo};

#[derive(Debug, Error)]
pub enum TxBuilderError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Malformed transaction or block: {}", _0)]
    Codec(#[from] ReaderError),
    #[error("Unable to get scriptPubKey for address {}", _0)]
    MissingScriptPubKey(String),
    #[error("No output pays to {}", _0)]
    OutputNotFound(String),
    #[error("Output {}:{} does not exist", txid, index)]
    PrevoutMissing { txid: String, index: u32 },
    #[error("Insufficient funds: {} available, {} required", available, required)]
    InsufficientFunds { available: Amount, required: Amount },
    #[error("Transaction rejected: {}", _0)]
    Rejected(String),
}

impl From<WalletError> for TxBuilderError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Rpc(e) => TxBuilderError::Rpc(e),
            WalletError::MissingScriptPubKey(address) | WalletError::InvalidScriptPubKey(address) => {
                TxBuilderError::MissingScriptPubKey(address)
            }
            other => TxBuilderError::Rejected(other.to_string()),
        }
    }
}

/// Two transactions spending the same inputs, paying `address1` and
/// `address2` respectively. Neither is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubleSpendPair {
    pub first: String,
    pub second: String,
    pub address1: String,
    pub address2: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    fees: FeeConfig,
}

impl TransactionBuilder {
    pub fn new(fees: FeeConfig) -> Self {
        Self { fees }
    }

    pub fn fees(&self) -> &FeeConfig {
        &self.fees
    }

    /// First unspent output of the node worth at least `min_amount`.
    /// Outputs of unknown value are skipped.
    pub async fn find_spendable_output(
        &self,
        node: &NodeHandle,
        min_amount: Amount,
    ) -> Result<Option<Utxo>, TxBuilderError> {
        let unspent = node.rpc().list_unspent().await?;
        Ok(unspent
            .into_iter()
            .find(|utxo| utxo.amount.map_or(false, |amount| amount >= min_amount)))
    }

    /// Output `outpoint` refers to, read from its transaction.
    pub async fn previous_output(
        &self,
        node: &NodeHandle,
        outpoint: &OutPoint,
    ) -> Result<TxOutput, TxBuilderError> {
        let txid = outpoint.txid();
        let raw = node.rpc().get_raw_transaction(&txid).await?;
        let tx = Transaction::from_hex(&raw)?;
        tx.outputs
            .get(outpoint.index as usize)
            .cloned()
            .ok_or(TxBuilderError::PrevoutMissing {
                txid,
                index: outpoint.index,
            })
    }

    /// Append an output returning whatever the inputs hold beyond the
    /// outputs and the fee, to `change_address` or a fresh address of the
    /// node. The change never goes below zero; a zero-value change output
    /// is still appended. Returns the change amount.
    pub async fn add_change_output_to_transaction(
        &self,
        node: &NodeHandle,
        tx: &mut Transaction,
        change_address: Option<&str>,
    ) -> Result<Amount, TxBuilderError> {
        let mut total_in = Amount::ZERO;
        for input in &tx.inputs {
            total_in = total_in + self.previous_output(node, &input.prevout).await?.amount;
        }
        let fee = self.fees.fee_for(tx.size());
        let change = total_in
            .saturating_sub(tx.total_output())
            .saturating_sub(fee);

        let address = match change_address {
            Some(address) => address.to_string(),
            None => node.get_new_address().await?,
        };
        let script = node.get_script_pubkey(&address).await?;
        tx.outputs.push(TxOutput::new(change, script));

        if log_enabled!(Level::Debug) {
            debug!(
                "Change of {} to {} (inputs {}, fee {})",
                change, address, total_in, fee
            );
        }
        Ok(change)
    }

    /// Spend `utxo`, paying `amount` to `to` and the rest minus the fee back
    /// to the node. Signs with the node's wallet, broadcasts and returns the
    /// txid.
    pub async fn spend_utxo(
        &self,
        node: &NodeHandle,
        utxo: &Utxo,
        to: &str,
        amount: Amount,
    ) -> Result<String, TxBuilderError> {
        let script = node.get_script_pubkey(to).await?;
        let mut tx = Transaction::new(
            vec![TxInput::new(utxo.outpoint()?)],
            vec![TxOutput::new(amount, script)],
        );

        match utxo.amount {
            Some(value) => {
                let flat_fee = self.fees.flat_fee();
                let change = value
                    .checked_sub(amount)
                    .and_then(|rest| rest.checked_sub(flat_fee))
                    .ok_or(TxBuilderError::InsufficientFunds {
                        available: value,
                        required: amount + flat_fee,
                    })?;
                let address = node.get_new_address().await?;
                let change_script = node.get_script_pubkey(&address).await?;
                tx.outputs.push(TxOutput::new(change, change_script));
            }
            None => {
                self.add_change_output_to_transaction(node, &mut tx, None)
                    .await?;
            }
        }

        self.send_raw_transaction(node, &tx.to_hex(), true).await
    }

    /// [`TransactionBuilder::spend_utxo`] on output `from_index` of `txid`,
    /// whose value is looked up on the node.
    pub async fn spend_output(
        &self,
        node: &NodeHandle,
        txid: &str,
        from_index: u32,
        to: &str,
        amount: Amount,
    ) -> Result<String, TxBuilderError> {
        self.spend_utxo(node, &Utxo::new(txid, from_index), to, amount)
            .await
    }

    /// Let the node's wallet pick inputs and a change output for a
    /// transaction paying `recipients`.
    pub async fn fund_transaction(
        &self,
        node: &NodeHandle,
        recipients: &[(String, Amount)],
    ) -> Result<FundedTransaction, TxBuilderError> {
        let raw = node.rpc().create_raw_transaction(&[], recipients).await?;
        Ok(node.rpc().fund_raw_transaction(&raw).await?)
    }

    pub async fn create_and_fund_transaction(
        &self,
        node: &NodeHandle,
        to: &str,
        amount: Amount,
    ) -> Result<FundedTransaction, TxBuilderError> {
        self.fund_transaction(node, &[(to.to_string(), amount)])
            .await
    }

    /// Broadcast `hex`, signing it with the node's wallet first if `sign`.
    pub async fn send_raw_transaction(
        &self,
        node: &NodeHandle,
        hex: &str,
        sign: bool,
    ) -> Result<String, TxBuilderError> {
        let txid = if sign {
            let signed = node.rpc().sign_raw_transaction_with_wallet(hex).await?;
            if !signed.complete {
                return Err(TxBuilderError::Rejected(
                    "wallet could not sign every input".to_string(),
                ));
            }
            node.rpc().send_raw_transaction(&signed.hex).await?
        } else {
            node.rpc().send_raw_transaction(hex).await?
        };
        if log_enabled!(Level::Debug) {
            debug!("Node {} accepted transaction {}", node.id(), txid);
        }
        Ok(txid)
    }

    /// Build two transactions spending the same inputs: a funded payment of
    /// `amount` to `address1`, and a copy paying `address2` instead.
    /// Missing addresses are fresh addresses of the node.
    pub async fn create_double_spend_transaction(
        &self,
        node: &NodeHandle,
        address1: Option<&str>,
        address2: Option<&str>,
        amount: Amount,
    ) -> Result<DoubleSpendPair, TxBuilderError> {
        let address1 = match address1 {
            Some(address) => address.to_string(),
            None => node.get_new_address().await?,
        };
        let address2 = match address2 {
            Some(address) => address.to_string(),
            None => node.get_new_address().await?,
        };

        let funded = self
            .create_and_fund_transaction(node, &address1, amount)
            .await?;
        let mut tx = Transaction::from_hex(&funded.hex)?;

        let script1 = node.get_script_pubkey(&address1).await?;
        let script2 = node.get_script_pubkey(&address2).await?;
        let index = tx
            .find_output(&script1)
            .ok_or_else(|| TxBuilderError::OutputNotFound(address1.clone()))?;
        tx.outputs[index].script_pubkey = script2;
        let second = tx.to_hex();

        // The node must still be able to parse the edited transaction
        node.rpc().decode_raw_transaction(&second).await?;

        Ok(DoubleSpendPair {
            first: funded.hex,
            second,
            address1,
            address2,
        })
    }
}

/// Rebuild block `hash` from the node's block and transaction reports.
/// The result hashes to `hash`, otherwise the reports were inconsistent.
pub async fn fetch_block(node: &NodeHandle, hash: &str) -> Result<Block, TxBuilderError> {
    let info = node.rpc().get_block(hash).await?;
    let parse = |hex: &str| Hash::from_display_hex(hex).map_err(|_| ReaderError::InvalidHex);

    let prev_block = match &info.previous_block_hash {
        Some(prev) => parse(prev)?,
        None => Hash::zero(),
    };
    let bits = u32::from_str_radix(&info.bits, 16).map_err(|_| ReaderError::InvalidValue)?;
    let header = BlockHeader::new(
        info.version,
        prev_block,
        parse(&info.merkle_root)?,
        info.time,
        bits,
        info.nonce,
    );

    let mut transactions = Vec::with_capacity(info.tx.len());
    for txid in &info.tx {
        let raw = hex::decode(node.rpc().get_raw_transaction(txid).await?)
            .map_err(|_| ReaderError::InvalidHex)?;
        let tx = Transaction::from_bytes(&raw)?;
        transactions.push(BlockTransaction::new(tx));
    }

    let block = Block::new(header, transactions);
    if block.block_hash() != info.hash || !block.has_valid_merkle_root() {
        return Err(ReaderError::InvalidValue.into());
    }
    Ok(block)
}
