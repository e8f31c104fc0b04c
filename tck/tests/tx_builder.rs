mod common;

use regnet_common::amount::Amount;
use regnet_common::config::{COIN, COINBASE_MATURITY, DEFAULT_DOUBLE_SPEND_AMOUNT};
use regnet_common::transaction::Transaction;
use regnet_common::serializer::Serializer;
use regnet_tck::node::TxLocation;
use regnet_tck::rpc::error::{RPC_INVALID_ADDRESS_OR_KEY, RPC_VERIFY_REJECTED};
use regnet_tck::sync::DEFAULT_SYNC_TIMEOUT;
use regnet_tck::tx_builder::{fetch_block, TxBuilderError};
use tokio::time::Duration;

use common::launch;

#[tokio::test(start_paused = true)]
async fn test_payment_reaches_peer() {
    let (_sim, net, nodes) = launch(2).await;
    let (miner, peer) = (&nodes[0], &nodes[1]);
    net.merge(&nodes).await.unwrap();
    miner.generate_blocks(COINBASE_MATURITY + 1).await.unwrap();

    let builder = net.tx_builder();
    let utxo = builder
        .find_spendable_output(miner, Amount::ONE_COIN)
        .await
        .unwrap()
        .expect("matured coinbase");
    let to = peer.get_new_address().await.unwrap();
    let amount = Amount::from_sat(10 * COIN);
    let txid = builder.spend_utxo(miner, &utxo, &to, amount).await.unwrap();

    assert_eq!(
        peer.wait_for_transaction(&txid, Duration::from_secs(2))
            .await
            .unwrap(),
        Some(TxLocation::Mempool)
    );
    assert_eq!(peer.get_balance().await.unwrap(), Amount::ZERO);

    miner.generate_blocks(1).await.unwrap();
    net.sync(miner, peer, DEFAULT_SYNC_TIMEOUT).await.unwrap();
    let balance = peer
        .wait_for_balance_change(Amount::ZERO, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(balance, amount);
}

#[tokio::test(start_paused = true)]
async fn test_missing_transaction_is_not_an_error() {
    let (_sim, _net, nodes) = launch(1).await;
    let found = nodes[0]
        .wait_for_transaction(&"00".repeat(32), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(found, None);
}

#[tokio::test(start_paused = true)]
async fn test_funded_transaction_pays_fee_and_change() {
    let (_sim, net, nodes) = launch(1).await;
    let node = &nodes[0];
    node.generate_blocks(COINBASE_MATURITY + 1).await.unwrap();

    let to = node.get_new_address().await.unwrap();
    let funded = net
        .tx_builder()
        .create_and_fund_transaction(node, &to, Amount::from_sat(3 * COIN))
        .await
        .unwrap();
    assert!(funded.change_position >= 0);
    assert!(funded.fee > Amount::ZERO);

    let tx = Transaction::from_hex(&funded.hex).unwrap();
    let paid = tx.total_output() + funded.fee;
    assert_eq!(paid, Amount::from_sat(50 * COIN));

    let txid = net
        .tx_builder()
        .send_raw_transaction(node, &funded.hex, true)
        .await
        .unwrap();
    assert_eq!(txid, tx.txid());
}

#[tokio::test(start_paused = true)]
async fn test_unfunded_wallet() {
    let (_sim, net, nodes) = launch(1).await;
    let node = &nodes[0];
    let to = node.get_new_address().await.unwrap();

    let err = net
        .tx_builder()
        .create_and_fund_transaction(node, &to, Amount::ONE_COIN)
        .await
        .unwrap_err();
    assert!(matches!(err, TxBuilderError::Rpc(ref e) if e.code() == Some(-6)));
    assert!(net
        .tx_builder()
        .find_spendable_output(node, Amount::ZERO)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_address_has_no_script() {
    let (_sim, _net, nodes) = launch(1).await;
    let err = nodes[0].get_script_pubkey("not-an-address").await.unwrap_err();
    assert!(err.to_string().contains(&RPC_INVALID_ADDRESS_OR_KEY.to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_double_spend_across_partition() {
    let (sim, net, nodes) = launch(2).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    net.merge(&nodes).await.unwrap();
    a.generate_blocks(COINBASE_MATURITY + 1).await.unwrap();
    net.sync(a, b, DEFAULT_SYNC_TIMEOUT).await.unwrap();

    let builder = net.tx_builder();
    let pair = builder
        .create_double_spend_transaction(a, None, None, Amount::from_sat(DEFAULT_DOUBLE_SPEND_AMOUNT))
        .await
        .unwrap();
    let second = a
        .rpc()
        .sign_raw_transaction_with_wallet(&pair.second)
        .await
        .unwrap();
    assert!(second.complete);

    net.partition(&nodes, 2, &[]).await.unwrap();
    assert_eq!(sim.link_count(), 0);

    let first_id = builder.send_raw_transaction(a, &pair.first, true).await.unwrap();
    // b has not seen the first spend
    let second_id = builder
        .send_raw_transaction(b, &second.hex, false)
        .await
        .unwrap();
    assert_ne!(first_id, second_id);

    // a cannot take the conflicting spend
    let err = builder
        .send_raw_transaction(a, &second.hex, false)
        .await
        .unwrap_err();
    assert!(matches!(err, TxBuilderError::Rpc(ref e) if e.code() == Some(RPC_VERIFY_REJECTED)));

    a.generate_blocks(1).await.unwrap();
    let hashes = b.generate_blocks(2).await.unwrap();

    net.merge(&nodes).await.unwrap();
    let height = net.sync(a, b, DEFAULT_SYNC_TIMEOUT).await.unwrap();
    assert_eq!(height, COINBASE_MATURITY + 3);

    // The longer side's spend survives
    let block = fetch_block(a, &hashes[0]).await.unwrap();
    let txids: Vec<String> = block.transactions().iter().map(|tx| tx.hash().to_display_hex()).collect();
    assert!(txids.contains(&second_id));
    assert!(a.rpc().get_raw_transaction(&second_id).await.is_ok());
    assert!(a.rpc().get_raw_transaction(&first_id).await.is_err());
    assert_eq!(Transaction::from_hex(&second.hex).unwrap().to_hex(), second.hex);
}
