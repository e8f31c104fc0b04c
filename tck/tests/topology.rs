mod common;

use std::collections::HashMap;

use regnet_tck::node::NodeId;
use regnet_tck::rpc::RpcError;
use regnet_tck::sim::LinkEvent;
use regnet_tck::topology::{EdgeAction, EdgeOutcome, Failure, TopologyError};
use tokio::time::Duration;

use common::launch;

const SPACING: Duration = Duration::from_millis(500);

fn applied(changes: &[regnet_tck::topology::EdgeChange]) -> usize {
    changes
        .iter()
        .filter(|c| c.outcome == EdgeOutcome::Applied)
        .count()
}

// Consecutive requests on one unordered pair must be spaced out
fn assert_spacing(events: &[LinkEvent]) {
    let mut last: HashMap<(NodeId, NodeId), tokio::time::Instant> = HashMap::new();
    for event in events {
        let key = if event.from <= event.to {
            (event.from.clone(), event.to.clone())
        } else {
            (event.to.clone(), event.from.clone())
        };
        if let Some(previous) = last.get(&key) {
            assert!(
                event.at - *previous >= SPACING,
                "edge {} <-> {} changed after {:?}",
                key.0,
                key.1,
                event.at - *previous
            );
        }
        last.insert(key, event.at);
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_nodes_is_idempotent() {
    let (sim, net, nodes) = launch(3).await;

    let changes = net.connect_nodes(&nodes).await.unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(applied(&changes), 2);
    assert!(changes.iter().all(|c| c.action == EdgeAction::Connect));
    assert!(nodes[0].is_connected(&nodes[1], false));
    assert!(!nodes[1].is_connected(&nodes[0], false));
    assert!(nodes[1].is_connected(&nodes[0], true));
    assert_eq!(sim.link_count(), 2);

    let events = sim.events().len();
    let again = net.connect_nodes(&nodes).await.unwrap();
    assert_eq!(applied(&again), 0);
    assert_eq!(sim.events().len(), events);

    // A node never connects to itself
    let change = net.topology().connect_one(&nodes[0], &nodes[0]).await.unwrap();
    assert_eq!(change.outcome, EdgeOutcome::Unchanged);
    assert!(!nodes[0].has_connection(nodes[0].id()));
}

#[tokio::test(start_paused = true)]
async fn test_merge_connects_every_pair() {
    let (sim, net, nodes) = launch(4).await;

    let changes = net.merge(&nodes).await.unwrap();
    assert_eq!(changes.len(), 4 * 3 / 2);
    assert_eq!(applied(&changes), 6);
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            assert!(a.is_connected(b, false));
            assert!(sim.is_linked(a.id(), b.id()));
        }
    }
    assert!(nodes[3].connections().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partition_then_merge() {
    let (sim, net, nodes) = launch(4).await;
    net.merge(&nodes).await.unwrap();

    // The last node is forced into the first group
    let designations = vec![vec![nodes[3].id().clone()]];
    let groups = net.partition(&nodes, 2, &designations).await.unwrap();
    assert_eq!(groups.len(), 2);
    let ids = |g: usize| groups[g].iter().map(|n| n.id().clone()).collect::<Vec<_>>();
    assert_eq!(ids(0), vec![nodes[3].id().clone(), nodes[0].id().clone()]);
    assert_eq!(ids(1), vec![nodes[1].id().clone(), nodes[2].id().clone()]);

    assert!(sim.is_linked(nodes[0].id(), nodes[3].id()));
    assert!(sim.is_linked(nodes[1].id(), nodes[2].id()));
    assert_eq!(sim.link_count(), 2);
    assert!(!nodes[0].is_connected(&nodes[1], true));
    assert!(!nodes[2].is_connected(&nodes[3], true));

    // Each side extends its own chain
    nodes[0].generate_blocks(2).await.unwrap();
    nodes[1].generate_blocks(5).await.unwrap();
    assert_eq!(sim.height(nodes[3].id()), Some(2));
    assert_eq!(sim.height(nodes[2].id()), Some(5));

    let changes = net.merge(&nodes).await.unwrap();
    assert_eq!(changes.len(), 6);
    assert_eq!(applied(&changes), 4);
    assert_eq!(sim.link_count(), 6);
    for node in &nodes {
        assert_eq!(sim.height(node.id()), Some(5));
    }

    assert_spacing(&sim.events());
}

#[tokio::test(start_paused = true)]
async fn test_edge_changes_are_spaced() {
    let (sim, net, nodes) = launch(2).await;
    let topology = net.topology();
    let start = tokio::time::Instant::now();

    for _ in 0..3 {
        topology.connect_one(&nodes[0], &nodes[1]).await.unwrap();
        topology.disconnect_one(&nodes[0], &nodes[1]).await.unwrap();
    }
    // The reverse direction shares the same edge
    topology.connect_one(&nodes[1], &nodes[0]).await.unwrap();

    let events = sim.events();
    assert_eq!(events.len(), 7);
    assert_spacing(&events);
    assert!(tokio::time::Instant::now() - start >= SPACING * 6);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_groups_keeps_inner_edges() {
    let (sim, net, nodes) = launch(4).await;
    net.merge(&nodes).await.unwrap();

    let (left, right) = nodes.split_at(2);
    let changes = net.disconnect_groups(left, right).await.unwrap();
    assert_eq!(changes.len(), 4);
    assert!(changes.iter().all(|c| c.action == EdgeAction::Disconnect));
    assert!(sim.is_linked(nodes[0].id(), nodes[1].id()));
    assert!(sim.is_linked(nodes[2].id(), nodes[3].id()));
    assert_eq!(sim.link_count(), 2);

    // Nothing left between the groups
    let changes = net.disconnect_groups(left, right).await.unwrap();
    assert!(changes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partition_rejects_bad_requests() {
    let (_sim, net, nodes) = launch(3).await;

    assert!(matches!(
        net.topology().partition(&nodes, 0, &[]).await,
        Err(TopologyError::InvalidGroupCount { nodes: 3, groups: 0 })
    ));

    let stranger = NodeId::new("127.0.0.1", 1, 2);
    assert!(matches!(
        net.topology().partition(&nodes, 2, &[vec![stranger]]).await,
        Err(TopologyError::UnknownDesignatedNode(_))
    ));

    let beyond = vec![vec![], vec![], vec![], vec![nodes[0].id().clone()]];
    assert!(matches!(
        net.topology().partition(&nodes, 5, &beyond).await,
        Err(TopologyError::InvalidDesignation(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_more_groups_than_nodes() {
    let (sim, net, nodes) = launch(3).await;
    net.merge(&nodes).await.unwrap();

    let groups = net.partition(&nodes, 10, &[]).await.unwrap();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|g| g.len() == 1));
    assert_eq!(sim.link_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_phase_reports_every_failure() {
    let (_sim, net, nodes) = launch(4).await;
    nodes[0].stop().await.unwrap();
    nodes[1].stop().await.unwrap();

    let phase = match net.topology().merge(&nodes).await {
        Err(TopologyError::Phase(phase)) => phase,
        other => panic!("expected a phase error, got {:?}", other.map(|c| c.len())),
    };
    assert_eq!(phase.phase, "merge");
    assert_eq!(phase.failures.len(), 2);
    for failure in &phase.failures {
        assert!(matches!(
            failure,
            Failure::Failed(TopologyError::Rpc {
                action: EdgeAction::Connect,
                source: RpcError::ConnectionRefused,
                ..
            })
        ));
    }
    // The surviving pair still got connected
    assert!(nodes[2].is_connected(&nodes[3], false));
}
