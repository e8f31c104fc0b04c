//! Block store shared by every simulated node, and per-node chain and
//! mempool views over it.

use std::collections::{HashMap, HashSet};

use regnet_common::{
    amount::Amount,
    block::{Block, BlockHeader, BlockTransaction, ProofOfWorkSolver},
    config::{COIN, COINBASE_MATURITY},
    crypto::Hash,
    serializer::Serializer,
    transaction::{OutPoint, Transaction, TxInput, TxOutput},
};

use super::wallet::{signature_hash, verify_input};
use crate::rpc::error::{RPC_VERIFY_ERROR, RPC_VERIFY_REJECTED};
use crate::rpc::{RpcError, RpcResult};

// Regtest compact target and genesis time
pub(crate) const REGTEST_BITS: u32 = 0x207f_ffff;
const GENESIS_TIME: u32 = 1_296_688_602;
const HALVING_INTERVAL: u64 = 150;
const BLOCK_VERSION: u32 = 0x2000_0000;

pub(crate) fn block_subsidy(height: u64) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return Amount::ZERO;
    }
    Amount::from_sat((50 * COIN) >> halvings)
}

pub(crate) struct StoredBlock {
    pub block: Block,
    pub height: u64,
}

/// An unspent output as seen by one node.
#[derive(Debug, Clone)]
pub(crate) struct Coin {
    pub output: TxOutput,
    // None while unconfirmed
    pub height: Option<u64>,
    pub coinbase: bool,
}

/// Every block and transaction any simulated node has produced.
pub(crate) struct Ledger {
    blocks: HashMap<Hash, StoredBlock>,
    transactions: HashMap<Hash, Transaction>,
    genesis: Hash,
    extra_nonce: u64,
}

impl Ledger {
    pub fn new() -> Self {
        // Unspendable genesis coinbase
        let coinbase = Transaction::new(
            vec![coinbase_input(0, 0)],
            vec![TxOutput::new(block_subsidy(0), vec![0x6a])],
        );
        let tx = BlockTransaction::new(coinbase.clone());
        let merkle_root = tx.hash();
        let header = BlockHeader::new(1, Hash::zero(), merkle_root, GENESIS_TIME, REGTEST_BITS, 2);
        let block = Block::new(header, vec![tx]);
        let genesis = block.hash();

        let mut ledger = Self {
            blocks: HashMap::new(),
            transactions: HashMap::new(),
            genesis,
            extra_nonce: 1,
        };
        ledger.transactions.insert(coinbase.hash(), coinbase);
        ledger.blocks.insert(genesis, StoredBlock { block, height: 0 });
        ledger
    }

    pub fn genesis(&self) -> Hash {
        self.genesis
    }

    pub fn block(&self, hash: &Hash) -> Option<&StoredBlock> {
        self.blocks.get(hash)
    }

    pub fn transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.transactions.get(hash)
    }

    pub fn remember(&mut self, tx: Transaction) -> Hash {
        let hash = tx.hash();
        self.transactions.entry(hash).or_insert(tx);
        hash
    }

    /// Mine one block on top of `chain` paying `subsidy + fees` to
    /// `payout`, including `txs` in order.
    pub fn mine(
        &mut self,
        chain: &[Hash],
        payout: Vec<u8>,
        txs: Vec<Transaction>,
        fees: Amount,
    ) -> RpcResult<Hash> {
        let tip = *chain
            .last()
            .ok_or_else(|| RpcError::node(RPC_VERIFY_ERROR, "empty chain"))?;
        let (prev_time, prev_height) = match self.blocks.get(&tip) {
            Some(stored) => (stored.block.header().timestamp, stored.height),
            None => return Err(RpcError::node(RPC_VERIFY_ERROR, "unknown tip")),
        };
        let height = prev_height + 1;

        let coinbase = Transaction::new(
            vec![coinbase_input(height, self.extra_nonce)],
            vec![TxOutput::new(block_subsidy(height) + fees, payout)],
        );
        self.extra_nonce += 1;

        let mut transactions = vec![BlockTransaction::new(coinbase.clone())];
        transactions.extend(txs.iter().cloned().map(BlockTransaction::new));
        let header = BlockHeader::new(BLOCK_VERSION, tip, Hash::zero(), 0, REGTEST_BITS, 0);
        let mut block = Block::new(header, transactions);
        let merkle_root = block.compute_merkle_root();
        block.header_mut().merkle_root = merkle_root;

        let now = chrono::Utc::now().timestamp() as u32;
        let target = block
            .header()
            .target()
            .ok_or_else(|| RpcError::node(RPC_VERIFY_ERROR, "bad target"))?;
        let solution = ProofOfWorkSolver::new()
            .with_start_time(now.max(prev_time + 1))
            .with_progress_interval(u64::MAX)
            .solve(&block.header().to_bytes(), &target)
            .map_err(|e| RpcError::node(RPC_VERIFY_ERROR, e.to_string()))?;
        if !solution.solved {
            return Err(RpcError::node(RPC_VERIFY_ERROR, "proof of work not found"));
        }
        *block.header_mut() = BlockHeader::from_bytes(&solution.header)
            .map_err(|e| RpcError::node(RPC_VERIFY_ERROR, e.to_string()))?;

        let hash = block.hash();
        self.transactions.insert(coinbase.hash(), coinbase);
        for tx in txs {
            self.transactions.insert(tx.hash(), tx);
        }
        self.blocks.insert(hash, StoredBlock { block, height });
        Ok(hash)
    }

    /// Whether a block of `chain` contains `tx`.
    pub fn chain_contains(&self, chain: &[Hash], tx: &Hash) -> bool {
        chain.iter().any(|hash| {
            self.blocks.get(hash).map_or(false, |stored| {
                stored.block.transactions().iter().any(|t| t.hash() == *tx)
            })
        })
    }

    /// Unspent outputs of `chain`, then of `mempool` applied in order.
    pub fn view(&self, chain: &[Hash], mempool: &[Hash]) -> UtxoView {
        let mut view = UtxoView::default();
        for hash in chain {
            if let Some(stored) = self.blocks.get(hash) {
                for tx in stored.block.transactions() {
                    view.apply(tx.transaction(), Some(stored.height));
                }
            }
        }
        view.tip_height = chain.len().saturating_sub(1) as u64;
        for hash in mempool {
            if let Some(tx) = self.transactions.get(hash) {
                view.apply(tx, None);
            }
        }
        view
    }
}

fn coinbase_input(height: u64, extra_nonce: u64) -> TxInput {
    let mut input = TxInput::new(OutPoint::new(Hash::zero(), u32::MAX));
    input.script_sig.push(8);
    input.script_sig.extend_from_slice(&height.to_le_bytes());
    input.script_sig.push(8);
    input.script_sig.extend_from_slice(&extra_nonce.to_le_bytes());
    input
}

#[derive(Default)]
pub(crate) struct UtxoView {
    pub coins: HashMap<OutPoint, Coin>,
    // Outputs spent by unconfirmed transactions
    pub spent_in_mempool: HashSet<OutPoint>,
    pub tip_height: u64,
}

impl UtxoView {
    fn apply(&mut self, tx: &Transaction, height: Option<u64>) {
        let coinbase = tx.is_coinbase();
        if !coinbase {
            for input in &tx.inputs {
                self.coins.remove(&input.prevout);
                if height.is_none() {
                    self.spent_in_mempool.insert(input.prevout);
                }
            }
        }
        let hash = tx.hash();
        for (index, output) in tx.outputs.iter().enumerate() {
            self.coins.insert(
                OutPoint::new(hash, index as u32),
                Coin {
                    output: output.clone(),
                    height,
                    coinbase,
                },
            );
        }
    }

    pub fn is_mature(&self, coin: &Coin) -> bool {
        match coin.height {
            Some(height) if coin.coinbase => self.tip_height + 1 - height >= COINBASE_MATURITY,
            _ => true,
        }
    }

    /// The wallet waits one block longer than consensus before it counts
    /// or spends a coinbase output.
    pub fn is_wallet_mature(&self, coin: &Coin) -> bool {
        match coin.height {
            Some(height) if coin.coinbase => self.tip_height.saturating_sub(height) >= COINBASE_MATURITY,
            _ => true,
        }
    }

    /// Check `tx` for admission on top of this view and return its fee.
    pub fn check(&self, tx: &Transaction) -> RpcResult<Amount> {
        if tx.is_coinbase() {
            return Err(RpcError::node(RPC_VERIFY_REJECTED, "coinbase"));
        }
        if tx.inputs.is_empty() {
            return Err(RpcError::node(RPC_VERIFY_REJECTED, "bad-txns-vin-empty"));
        }
        if tx.outputs.is_empty() {
            return Err(RpcError::node(RPC_VERIFY_REJECTED, "bad-txns-vout-empty"));
        }

        let mut seen = HashSet::new();
        let mut total_in = Amount::ZERO;
        for (index, input) in tx.inputs.iter().enumerate() {
            if !seen.insert(input.prevout) {
                return Err(RpcError::node(RPC_VERIFY_REJECTED, "bad-txns-inputs-duplicate"));
            }
            let coin = match self.coins.get(&input.prevout) {
                Some(coin) => coin,
                None if self.spent_in_mempool.contains(&input.prevout) => {
                    return Err(RpcError::node(RPC_VERIFY_REJECTED, "txn-mempool-conflict"))
                }
                None => {
                    return Err(RpcError::node(
                        RPC_VERIFY_ERROR,
                        "bad-txns-inputs-missingorspent",
                    ))
                }
            };
            if !self.is_mature(coin) {
                return Err(RpcError::node(
                    RPC_VERIFY_REJECTED,
                    "bad-txns-premature-spend-of-coinbase",
                ));
            }
            if !verify_input(
                &input.script_sig,
                &coin.output.script_pubkey,
                &signature_hash(tx, index),
            ) {
                return Err(RpcError::node(
                    RPC_VERIFY_REJECTED,
                    "mandatory-script-verify-flag-failed",
                ));
            }
            total_in = total_in + coin.output.amount;
        }

        total_in
            .checked_sub(tx.total_output())
            .ok_or_else(|| RpcError::node(RPC_VERIFY_REJECTED, "bad-txns-in-belowout"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::sim::wallet::{script_for_address, Wallet};

    #[test]
    fn test_subsidy_halves() {
        assert_eq!(block_subsidy(1), Amount::from_sat(50 * COIN));
        assert_eq!(block_subsidy(150), Amount::from_sat(25 * COIN));
        assert_eq!(block_subsidy(150 * 64), Amount::ZERO);
    }

    #[test]
    fn test_mined_blocks_are_valid() {
        let mut ledger = Ledger::new();
        let mut chain = vec![ledger.genesis()];
        for _ in 0..3 {
            let hash = ledger.mine(&chain, vec![0x51], Vec::new(), Amount::ZERO).unwrap();
            chain.push(hash);
        }
        let tip = ledger.block(&chain[3]).unwrap();
        assert_eq!(tip.height, 3);
        assert_eq!(tip.block.header().prev_block, chain[2]);
        assert!(tip.block.has_valid_merkle_root());
        let target = tip.block.header().target().unwrap();
        assert_eq!(
            tip.block.hash().cmp_reversed(&target),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn test_coinbase_maturity_and_spend() {
        let mut wallet = Wallet::new(&NodeId::new("127.0.0.1", 1, 2));
        let script = script_for_address(&wallet.new_address()).unwrap();
        let mut ledger = Ledger::new();
        let mut chain = vec![ledger.genesis()];
        chain.push(ledger.mine(&chain, script.clone(), Vec::new(), Amount::ZERO).unwrap());

        let coinbase = ledger.block(&chain[1]).unwrap().block.transactions()[0].hash();
        let mut tx = Transaction::new(
            vec![TxInput::new(OutPoint::new(coinbase, 0))],
            vec![TxOutput::new(Amount::from_sat(49 * COIN), vec![0x51])],
        );
        assert!(wallet.sign_input(&mut tx, 0, &script));

        let err = ledger.view(&chain, &[]).check(&tx).unwrap_err();
        assert!(err.to_string().contains("premature"));

        for _ in 0..99 {
            chain.push(ledger.mine(&chain, vec![0x51], Vec::new(), Amount::ZERO).unwrap());
        }
        let fee = ledger.view(&chain, &[]).check(&tx).unwrap();
        assert_eq!(fee, Amount::from_sat(COIN));

        // A second spend of the same output conflicts with the first
        let first = ledger.remember(tx.clone());
        tx.outputs[0].amount = Amount::from_sat(48 * COIN);
        assert!(wallet.sign_input(&mut tx, 0, &script));
        let err = ledger.view(&chain, &[first]).check(&tx).unwrap_err();
        assert_eq!(err.code(), Some(RPC_VERIFY_REJECTED));
    }
}
