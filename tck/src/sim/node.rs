// Request surface and process of one simulated node

use anyhow::Result;
use async_trait::async_trait;
use regnet_common::{
    amount::Amount,
    crypto::Hash,
    serializer::Serializer,
    transaction::{OutPoint, Transaction, TxInput, TxOutput},
};

use super::chain::UtxoView;
use super::wallet::{address_for_script, script_for_address, SIGNED_INPUT_SIZE};
use super::{NetState, SimNetwork};
use crate::node::NodeId;
use crate::process::NodeProcess;
use crate::rpc::error::{
    RPC_CLIENT_NODE_NOT_ADDED, RPC_CLIENT_NODE_NOT_CONNECTED, RPC_DESERIALIZATION_ERROR,
    RPC_INVALID_ADDRESS_OR_KEY, RPC_INVALID_PARAMETER, RPC_WALLET_ERROR,
    RPC_WALLET_INSUFFICIENT_FUNDS,
};
use crate::rpc::{
    AddNodeCommand, AddressInfo, BlockInfo, DecodedInput, DecodedOutput, DecodedScript,
    DecodedTransaction, FundedTransaction, NodeInfo, NodeRpc, RpcError, RpcResult,
    SignedTransaction, TxInRef, Utxo,
};

const SIM_VERSION: u64 = 250_000;
// Wallet fee rate in satoshis per byte
const WALLET_FEE_RATE: u64 = 10;
const CHANGE_OUTPUT_SIZE: usize = 34;
const DUST_THRESHOLD: Amount = Amount::from_sat(546);

fn invalid_address(address: &str) -> RpcError {
    RpcError::node(RPC_INVALID_ADDRESS_OR_KEY, format!("Invalid address: {}", address))
}

fn decode_tx(hex: &str) -> RpcResult<Transaction> {
    Transaction::from_hex(hex).map_err(|_| RpcError::node(RPC_DESERIALIZATION_ERROR, "TX decode failed"))
}

fn parse_hash(hex: &str) -> RpcResult<Hash> {
    Hash::from_display_hex(hex)
        .map_err(|_| RpcError::node(RPC_INVALID_PARAMETER, "must be hexadecimal string of length 64"))
}

// Fee of `tx` once every input is signed and `extra` bytes are added
fn estimate_fee(tx: &Transaction, extra: usize) -> Amount {
    let unsigned: usize = tx.inputs.iter().map(|i| i.size()).sum();
    let size = tx.size() - unsigned + tx.inputs.len() * SIGNED_INPUT_SIZE + extra;
    Amount::from_sat(size as u64 * WALLET_FEE_RATE)
}

pub struct SimNode {
    id: NodeId,
    net: SimNetwork,
}

impl SimNode {
    pub fn new(id: NodeId, net: SimNetwork) -> Self {
        Self { id, net }
    }

    // Run `f` against the network state if this node accepts requests
    fn call<R>(&self, f: impl FnOnce(&mut NetState, &NodeId) -> RpcResult<R>) -> RpcResult<R> {
        let mut state = self.net.state().lock();
        match state.node(&self.id) {
            Some(node) if node.running => {
                if node.options.unauthorized {
                    return Err(RpcError::Unauthorized);
                }
            }
            _ => return Err(RpcError::ConnectionRefused),
        }
        f(&mut state, &self.id)
    }
}

// Node lookups inside `call`, where the node is known to exist
fn this<'a>(state: &'a NetState, id: &NodeId) -> RpcResult<&'a super::NodeState> {
    state.node(id).ok_or(RpcError::ConnectionRefused)
}

fn this_mut<'a>(state: &'a mut NetState, id: &NodeId) -> RpcResult<&'a mut super::NodeState> {
    state.node_mut(id).ok_or(RpcError::ConnectionRefused)
}

fn view_of(state: &NetState, id: &NodeId) -> RpcResult<UtxoView> {
    let node = this(state, id)?;
    Ok(state.ledger.view(&node.chain, &node.mempool))
}

/// Confirmed, mature, wallet-owned outputs not spent by the mempool.
fn spendable(state: &NetState, id: &NodeId) -> RpcResult<Vec<(OutPoint, TxOutput)>> {
    let node = this(state, id)?;
    let view = state.ledger.view(&node.chain, &node.mempool);
    let mut coins: Vec<(OutPoint, TxOutput, u64)> = view
        .coins
        .iter()
        .filter_map(|(outpoint, coin)| {
            let height = coin.height?;
            (view.is_wallet_mature(coin) && node.wallet.owns_script(&coin.output.script_pubkey))
                .then(|| (*outpoint, coin.output.clone(), height))
        })
        .collect();
    coins.sort_by(|a, b| {
        (a.2, a.0.hash.to_display_hex(), a.0.index).cmp(&(b.2, b.0.hash.to_display_hex(), b.0.index))
    });
    Ok(coins.into_iter().map(|(o, out, _)| (o, out)).collect())
}

// Add wallet inputs (largest first) and a change output until `tx` pays
// its outputs and fee. Returns the change position and the fee.
fn fund(
    state: &mut NetState,
    id: &NodeId,
    tx: &mut Transaction,
    view: &UtxoView,
) -> RpcResult<(i32, Amount)> {
    if tx.outputs.is_empty() {
        return Err(RpcError::node(RPC_INVALID_PARAMETER, "TX must have at least one output"));
    }
    let mut total_in = Amount::ZERO;
    for input in &tx.inputs {
        let coin = view.coins.get(&input.prevout).ok_or_else(|| {
            RpcError::node(RPC_WALLET_ERROR, "Unable to find UTXO for external input")
        })?;
        total_in = total_in + coin.output.amount;
    }

    let mut candidates = spendable(state, id)?;
    candidates.retain(|(outpoint, _)| tx.inputs.iter().all(|i| i.prevout != *outpoint));
    candidates.sort_by(|a, b| b.1.amount.cmp(&a.1.amount));

    let out = tx.total_output();
    let mut candidates = candidates.into_iter();
    while total_in < out + estimate_fee(tx, CHANGE_OUTPUT_SIZE) {
        let (outpoint, output) = candidates.next().ok_or_else(|| {
            RpcError::node(RPC_WALLET_INSUFFICIENT_FUNDS, "Insufficient funds")
        })?;
        tx.inputs.push(TxInput::new(outpoint));
        total_in = total_in + output.amount;
    }

    let change = total_in.saturating_sub(out + estimate_fee(tx, CHANGE_OUTPUT_SIZE));
    if change > DUST_THRESHOLD {
        let address = this_mut(state, id)?.wallet.new_address();
        let script = script_for_address(&address).ok_or_else(|| invalid_address(&address))?;
        tx.outputs.push(TxOutput::new(change, script));
        let fee = total_in.saturating_sub(tx.total_output());
        Ok((tx.outputs.len() as i32 - 1, fee))
    } else {
        Ok((-1, total_in.saturating_sub(out)))
    }
}

// Sign every input the wallet can; true when all of them are signed.
// Previous outputs are looked up by transaction, spent or not.
fn sign(state: &NetState, id: &NodeId, tx: &mut Transaction) -> RpcResult<bool> {
    let node = this(state, id)?;
    let mut complete = true;
    for index in 0..tx.inputs.len() {
        let prevout = tx.inputs[index].prevout;
        let prev = state
            .ledger
            .transaction(&prevout.hash)
            .and_then(|prev| prev.outputs.get(prevout.index as usize))
            .map(|output| output.script_pubkey.clone());
        let signed = match prev {
            Some(script) => node.wallet.sign_input(tx, index, &script),
            None => false,
        };
        complete &= signed;
    }
    Ok(complete)
}

fn decode_script(script: &[u8]) -> DecodedScript {
    DecodedScript {
        hex: hex::encode(script),
        address: address_for_script(script),
    }
}

#[async_trait]
impl NodeRpc for SimNode {
    async fn get_info(&self) -> RpcResult<NodeInfo> {
        self.call(|state, id| {
            let connections = state.link_count(id) as u32;
            let node = this_mut(state, id)?;
            if let Some(err) = node.warmup.pop_front() {
                return Err(err);
            }
            Ok(NodeInfo {
                version: SIM_VERSION,
                blocks: node.chain.len() as u64 - 1,
                connections,
                warnings: String::new(),
            })
        })
    }

    async fn get_block_count(&self) -> RpcResult<u64> {
        self.call(|state, id| Ok(this(state, id)?.chain.len() as u64 - 1))
    }

    async fn get_block_hash(&self, height: u64) -> RpcResult<String> {
        self.call(|state, id| {
            this(state, id)?
                .chain
                .get(height as usize)
                .map(|hash| hash.to_display_hex())
                .ok_or_else(|| RpcError::node(RPC_INVALID_PARAMETER, "Block height out of range"))
        })
    }

    async fn get_block(&self, hash: &str) -> RpcResult<BlockInfo> {
        let hash = parse_hash(hash)?;
        self.call(|state, _| {
            let stored = state
                .ledger
                .block(&hash)
                .ok_or_else(|| RpcError::node(RPC_INVALID_ADDRESS_OR_KEY, "Block not found"))?;
            let header = stored.block.header();
            let previous = (stored.height > 0).then(|| header.prev_block.to_display_hex());
            Ok(BlockInfo {
                hash: hash.to_display_hex(),
                height: stored.height,
                version: header.version,
                previous_block_hash: previous,
                merkle_root: header.merkle_root.to_display_hex(),
                time: header.timestamp,
                bits: format!("{:08x}", header.bits),
                nonce: header.nonce,
                tx: stored
                    .block
                    .transactions()
                    .iter()
                    .map(|tx| tx.hash().to_display_hex())
                    .collect(),
            })
        })
    }

    async fn get_balance(&self) -> RpcResult<Amount> {
        self.call(|state, id| {
            let node = this(state, id)?;
            let view = state.ledger.view(&node.chain, &node.mempool);
            Ok(view
                .coins
                .values()
                .filter(|coin| {
                    coin.height.is_some()
                        && view.is_wallet_mature(coin)
                        && node.wallet.owns_script(&coin.output.script_pubkey)
                })
                .map(|coin| coin.output.amount)
                .sum())
        })
    }

    async fn get_new_address(&self) -> RpcResult<String> {
        self.call(|state, id| Ok(this_mut(state, id)?.wallet.new_address()))
    }

    async fn generate_to_address(&self, count: u64, address: &str) -> RpcResult<Vec<String>> {
        let payout = script_for_address(address).ok_or_else(|| invalid_address(address))?;
        self.call(|state, id| {
            let mut hashes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (chain, mempool) = {
                    let node = this(state, id)?;
                    (node.chain.clone(), node.mempool.clone())
                };
                let mut txs = Vec::with_capacity(mempool.len());
                let mut fees = Amount::ZERO;
                for (i, hash) in mempool.iter().enumerate() {
                    if let Some(tx) = state.ledger.transaction(hash) {
                        let fee = state.ledger.view(&chain, &mempool[..i]).check(tx)?;
                        fees = fees + fee;
                        txs.push(tx.clone());
                    }
                }
                let hash = state.ledger.mine(&chain, payout.clone(), txs, fees)?;
                let node = this_mut(state, id)?;
                node.chain.push(hash);
                node.mempool.clear();
                hashes.push(hash.to_display_hex());
            }
            state.relay();
            Ok(hashes)
        })
    }

    async fn send_to_address(&self, address: &str, amount: Amount) -> RpcResult<String> {
        let script = script_for_address(address).ok_or_else(|| invalid_address(address))?;
        if amount == Amount::ZERO {
            return Err(RpcError::node(RPC_INVALID_PARAMETER, "Invalid amount for send"));
        }
        self.call(|state, id| {
            let view = view_of(state, id)?;
            let mut tx = Transaction::new(Vec::new(), vec![TxOutput::new(amount, script)]);
            fund(state, id, &mut tx, &view)?;
            sign(state, id, &mut tx)?;
            let hash = state.accept(id, tx)?;
            state.relay();
            Ok(hash.to_display_hex())
        })
    }

    async fn add_node(&self, peer: &str, command: AddNodeCommand) -> RpcResult<()> {
        self.call(|state, id| {
            let target = state.addrs.get(peer).cloned();
            match command {
                AddNodeCommand::Add | AddNodeCommand::OneTry => {
                    // Unreachable peers are not reported back
                    if let Some(target) = target {
                        state.connect(id, &target);
                    }
                    Ok(())
                }
                AddNodeCommand::Remove => match target {
                    Some(target) if state.disconnect(id, &target) => Ok(()),
                    _ => Err(RpcError::node(
                        RPC_CLIENT_NODE_NOT_ADDED,
                        "Error: Node has not been added.",
                    )),
                },
            }
        })
    }

    async fn disconnect_node(&self, peer: &str) -> RpcResult<()> {
        self.call(|state, id| {
            let disconnected = match state.addrs.get(peer).cloned() {
                Some(target) => state.disconnect(id, &target),
                None => false,
            };
            if disconnected {
                Ok(())
            } else {
                Err(RpcError::node(
                    RPC_CLIENT_NODE_NOT_CONNECTED,
                    "Node not found in connected nodes",
                ))
            }
        })
    }

    async fn list_unspent(&self) -> RpcResult<Vec<Utxo>> {
        self.call(|state, id| {
            Ok(spendable(state, id)?
                .into_iter()
                .map(|(outpoint, output)| Utxo {
                    txid: outpoint.txid(),
                    vout: outpoint.index,
                    amount: Some(output.amount),
                    address: address_for_script(&output.script_pubkey),
                    script_pub_key: Some(hex::encode(&output.script_pubkey)),
                })
                .collect())
        })
    }

    async fn get_raw_mempool(&self) -> RpcResult<Vec<String>> {
        self.call(|state, id| {
            Ok(this(state, id)?
                .mempool
                .iter()
                .map(|hash| hash.to_display_hex())
                .collect())
        })
    }

    async fn get_raw_transaction(&self, txid: &str) -> RpcResult<String> {
        let hash = parse_hash(txid)?;
        self.call(|state, id| {
            let node = this(state, id)?;
            let known = node.mempool.contains(&hash) || state.ledger.chain_contains(&node.chain, &hash);
            match state.ledger.transaction(&hash) {
                Some(tx) if known => Ok(tx.to_hex()),
                _ => Err(RpcError::node(
                    RPC_INVALID_ADDRESS_OR_KEY,
                    "No such mempool or blockchain transaction",
                )),
            }
        })
    }

    async fn decode_raw_transaction(&self, hex: &str) -> RpcResult<DecodedTransaction> {
        self.call(|_, _| Ok(()))?;
        let tx = decode_tx(hex)?;
        let coinbase = tx.is_coinbase();
        Ok(DecodedTransaction {
            txid: tx.txid(),
            version: tx.version,
            lock_time: tx.lock_time,
            vin: tx
                .inputs
                .iter()
                .map(|input| DecodedInput {
                    txid: (!coinbase).then(|| input.prevout.txid()),
                    vout: (!coinbase).then_some(input.prevout.index),
                    sequence: input.sequence,
                })
                .collect(),
            vout: tx
                .outputs
                .iter()
                .enumerate()
                .map(|(n, output)| DecodedOutput {
                    value: output.amount,
                    n: n as u32,
                    script_pub_key: decode_script(&output.script_pubkey),
                })
                .collect(),
        })
    }

    async fn create_raw_transaction(
        &self,
        inputs: &[TxInRef],
        outputs: &[(String, Amount)],
    ) -> RpcResult<String> {
        self.call(|_, _| Ok(()))?;
        let inputs = inputs
            .iter()
            .map(|i| Ok(TxInput::new(OutPoint::new(parse_hash(&i.txid)?, i.vout))))
            .collect::<RpcResult<Vec<_>>>()?;
        let outputs = outputs
            .iter()
            .map(|(address, amount)| {
                let script = script_for_address(address).ok_or_else(|| invalid_address(address))?;
                Ok(TxOutput::new(*amount, script))
            })
            .collect::<RpcResult<Vec<_>>>()?;
        Ok(Transaction::new(inputs, outputs).to_hex())
    }

    async fn fund_raw_transaction(&self, hex: &str) -> RpcResult<FundedTransaction> {
        let mut tx = decode_tx(hex)?;
        self.call(|state, id| {
            let view = view_of(state, id)?;
            let (change_position, fee) = fund(state, id, &mut tx, &view)?;
            Ok(FundedTransaction {
                hex: tx.to_hex(),
                change_position,
                fee,
            })
        })
    }

    async fn sign_raw_transaction_with_wallet(&self, hex: &str) -> RpcResult<SignedTransaction> {
        let mut tx = decode_tx(hex)?;
        self.call(|state, id| {
            let complete = sign(state, id, &mut tx)?;
            Ok(SignedTransaction {
                hex: tx.to_hex(),
                complete,
            })
        })
    }

    async fn send_raw_transaction(&self, hex: &str) -> RpcResult<String> {
        let tx = decode_tx(hex)?;
        self.call(|state, id| {
            let hash = state.accept(id, tx)?;
            state.relay();
            Ok(hash.to_display_hex())
        })
    }

    async fn get_address_info(&self, address: &str) -> RpcResult<AddressInfo> {
        let script = script_for_address(address).ok_or_else(|| invalid_address(address))?;
        self.call(|state, id| {
            Ok(AddressInfo {
                address: address.to_string(),
                script_pub_key: Some(hex::encode(&script)),
                is_mine: this(state, id)?.wallet.owns_address(address),
            })
        })
    }

    async fn dump_priv_key(&self, address: &str) -> RpcResult<String> {
        if script_for_address(address).is_none() {
            return Err(invalid_address(address));
        }
        self.call(|state, id| {
            this(state, id)?.wallet.dump_key(address).ok_or_else(|| {
                RpcError::node(
                    RPC_WALLET_ERROR,
                    format!("Private key for address {} is not known", address),
                )
            })
        })
    }

    async fn import_priv_key(&self, key: &str, _label: &str, _rescan: bool) -> RpcResult<()> {
        self.call(|state, id| {
            this_mut(state, id)?
                .wallet
                .import_key(key)
                .map(|_| ())
                .ok_or_else(|| {
                    RpcError::node(RPC_INVALID_ADDRESS_OR_KEY, "Invalid private key encoding")
                })
        })
    }
}

/// Process of a simulated node. Stopping takes effect immediately and
/// drops every link of the node.
pub struct SimProcess {
    id: NodeId,
    net: SimNetwork,
}

impl SimProcess {
    pub fn new(id: NodeId, net: SimNetwork) -> Self {
        Self { id, net }
    }
}

#[async_trait]
impl NodeProcess for SimProcess {
    fn is_running(&self) -> bool {
        self.net
            .state()
            .lock()
            .node(&self.id)
            .map_or(false, |n| n.running)
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.net.state().lock();
        if let Some(node) = state.node_mut(&self.id) {
            node.running = false;
        }
        state.drop_links(&self.id);
        state.relay();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::chain::REGTEST_BITS;
    use regnet_common::config::{COIN, COINBASE_MATURITY};

    fn node(sim: &SimNetwork, port: u16) -> (NodeId, std::sync::Arc<dyn NodeRpc>) {
        let id = NodeId::new("127.0.0.1", port, port + 1);
        let launched = sim.spawn_node(&id);
        (id, launched.rpc)
    }

    async fn mature(rpc: &dyn NodeRpc) -> String {
        let address = rpc.get_new_address().await.unwrap();
        rpc.generate_to_address(COINBASE_MATURITY + 1, &address).await.unwrap();
        address
    }

    #[tokio::test]
    async fn test_generate_and_balance() {
        let sim = SimNetwork::new();
        let (_, rpc) = node(&sim, 100);
        assert_eq!(rpc.get_block_count().await.unwrap(), 0);
        mature(rpc.as_ref()).await;
        assert_eq!(rpc.get_block_count().await.unwrap(), 101);
        assert_eq!(rpc.get_balance().await.unwrap(), Amount::from_sat(50 * COIN));
        assert_eq!(rpc.list_unspent().await.unwrap().len(), 1);

        let hash = rpc.get_block_hash(101).await.unwrap();
        let info = rpc.get_block(&hash).await.unwrap();
        assert_eq!(info.height, 101);
        assert_eq!(info.bits, format!("{:08x}", REGTEST_BITS));
        assert_eq!(info.previous_block_hash, Some(rpc.get_block_hash(100).await.unwrap()));
    }

    #[tokio::test]
    async fn test_blocks_relay_over_links() {
        let sim = SimNetwork::new();
        let (_, a) = node(&sim, 100);
        let (b_id, b) = node(&sim, 200);
        mature(a.as_ref()).await;
        assert_eq!(b.get_block_count().await.unwrap(), 0);

        a.add_node(&b_id.peer_addr(), AddNodeCommand::OneTry).await.unwrap();
        assert_eq!(b.get_block_count().await.unwrap(), 101);
        assert_eq!(b.get_info().await.unwrap().connections, 1);

        b.disconnect_node(&NodeId::new("127.0.0.1", 100, 101).peer_addr())
            .await
            .unwrap();
        let err = b.disconnect_node("127.0.0.1:100").await.unwrap_err();
        assert_eq!(err.code(), Some(RPC_CLIENT_NODE_NOT_CONNECTED));
    }

    #[tokio::test]
    async fn test_send_and_mine() {
        let sim = SimNetwork::new();
        let (_, a) = node(&sim, 100);
        mature(a.as_ref()).await;
        let to = a.get_new_address().await.unwrap();
        let txid = a.send_to_address(&to, Amount::ONE_COIN).await.unwrap();
        assert_eq!(a.get_raw_mempool().await.unwrap(), vec![txid.clone()]);

        let raw = a.get_raw_transaction(&txid).await.unwrap();
        let decoded = a.decode_raw_transaction(&raw).await.unwrap();
        assert_eq!(decoded.txid, txid);
        assert_eq!(decoded.vout[0].value, Amount::ONE_COIN);
        assert_eq!(decoded.vout[0].script_pub_key.address, Some(to));

        a.generate_to_address(1, &a.get_new_address().await.unwrap())
            .await
            .unwrap();
        assert!(a.get_raw_mempool().await.unwrap().is_empty());
        let block = a.get_block(&a.get_block_hash(102).await.unwrap()).await.unwrap();
        assert_eq!(block.tx.len(), 2);
        assert_eq!(block.tx[1], txid);
    }

    #[tokio::test]
    async fn test_unsigned_transaction_is_rejected() {
        let sim = SimNetwork::new();
        let (_, a) = node(&sim, 100);
        mature(a.as_ref()).await;
        let to = a.get_new_address().await.unwrap();
        let raw = a
            .create_raw_transaction(&[], &[(to, Amount::ONE_COIN)])
            .await
            .unwrap();
        let funded = a.fund_raw_transaction(&raw).await.unwrap();
        assert_eq!(funded.change_position, 1);
        assert!(funded.fee > Amount::ZERO);

        let err = a.send_raw_transaction(&funded.hex).await.unwrap_err();
        assert!(err.to_string().contains("mandatory-script-verify-flag-failed"));

        let signed = a.sign_raw_transaction_with_wallet(&funded.hex).await.unwrap();
        assert!(signed.complete);
        a.send_raw_transaction(&signed.hex).await.unwrap();
    }

    #[tokio::test]
    async fn test_warmup_and_unauthorized() {
        let sim = SimNetwork::new();
        let id = NodeId::new("127.0.0.1", 100, 101);
        let launched = sim.spawn_node_with(
            &id,
            super::super::SimNodeOptions::default()
                .with_warmup(vec![RpcError::node(-28, "Loading block index...")]),
        );
        assert_eq!(launched.rpc.get_info().await.unwrap_err().code(), Some(-28));
        assert!(launched.rpc.get_info().await.is_ok());

        launched.process.stop().await.unwrap();
        assert!(!launched.process.is_running());
        assert_eq!(launched.rpc.get_info().await, Err(RpcError::ConnectionRefused));

        let other = NodeId::new("127.0.0.1", 200, 201);
        let locked = sim.spawn_node_with(&other, super::super::SimNodeOptions::default().unauthorized());
        assert_eq!(locked.rpc.get_block_count().await, Err(RpcError::Unauthorized));
    }
}
