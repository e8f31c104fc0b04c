mod common;

use regnet_tck::graph::{compare_chains, connection_matrix};
use regnet_tck::sync::{get_sync_state, sync, SyncError, SyncState, DEFAULT_SYNC_TIMEOUT};
use tokio::time::Duration;

use common::launch;

#[tokio::test(start_paused = true)]
async fn test_longer_chain_wins_after_merge() {
    let (_sim, net, nodes) = launch(2).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    a.generate_blocks(3).await.unwrap();
    b.generate_blocks(7).await.unwrap();
    assert!(matches!(
        get_sync_state(a, b).await.unwrap(),
        SyncState::HeightMismatch { a: 3, b: 7 }
    ));
    let before = compare_chains(a, b).await.unwrap();
    assert!(before.has_diverged());
    assert_eq!(before.common_height, 0);

    net.merge(&nodes).await.unwrap();
    assert_eq!(net.sync(a, b, DEFAULT_SYNC_TIMEOUT).await.unwrap(), 7);

    let after = compare_chains(a, b).await.unwrap();
    assert!(!after.has_diverged());
    assert_eq!(after.common_height, 7);
}

#[tokio::test(start_paused = true)]
async fn test_equal_heights_on_different_chains() {
    let (_sim, _net, nodes) = launch(2).await;
    nodes[0].generate_blocks(2).await.unwrap();
    nodes[1].generate_blocks(2).await.unwrap();

    let state = get_sync_state(&nodes[0], &nodes[1]).await.unwrap();
    assert!(matches!(state, SyncState::HashMismatch { height: 2, .. }));
    assert!(!state.is_synced());

    let err = sync(&nodes[0], &nodes[1], Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Timeout {
            last: SyncState::HashMismatch { height: 2, .. },
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_sync_all_over_a_line() {
    let (sim, net, nodes) = launch(5).await;
    // 1 - 2 - 3 - 4 - 5
    for pair in nodes.windows(2) {
        net.topology().connect(&pair[0], &pair[1..]).await.unwrap();
    }
    assert_eq!(sim.link_count(), 4);

    nodes[4].generate_blocks(4).await.unwrap();
    net.sync_all(DEFAULT_SYNC_TIMEOUT).await.unwrap();
    for node in &nodes {
        assert_eq!(node.rpc().get_block_count().await.unwrap(), 4);
    }

    let matrix = connection_matrix(&nodes);
    let rows: Vec<&str> = matrix.lines().collect();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[1], "   1  --  ox  xx  xx  xx");
    assert_eq!(rows[5], "   5  xx  xx  xx  xo  --");
}

#[tokio::test(start_paused = true)]
async fn test_sync_fails_fast_on_stopped_node() {
    let (_sim, net, nodes) = launch(2).await;
    net.merge(&nodes).await.unwrap();
    nodes[1].stop().await.unwrap();

    let started = tokio::time::Instant::now();
    let err = net
        .sync(&nodes[0], &nodes[1], DEFAULT_SYNC_TIMEOUT)
        .await
        .unwrap_err();
    assert!(err.to_string().contains(&nodes[1].id().to_string()));
    assert!(tokio::time::Instant::now() - started < DEFAULT_SYNC_TIMEOUT);
}
