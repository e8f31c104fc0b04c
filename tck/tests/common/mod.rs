// Shared setup for the network tests: a simulated network behind a
// registry whose topology controller runs on tokio time.

use std::sync::Arc;

use regnet_tck::config::NetConfig;
use regnet_tck::net::NodeNet;
use regnet_tck::node::NodeHandle;
use regnet_tck::orchestrator::PausedClock;
use regnet_tck::sim::SimNetwork;

#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}

/// Registry over a fresh simulated network.
#[allow(dead_code)]
pub fn sim_net(config: NetConfig) -> (SimNetwork, NodeNet) {
    init_logging();
    let sim = SimNetwork::new();
    let net = NodeNet::with_clock(config, Arc::new(sim.clone()), Arc::new(PausedClock))
        .expect("create registry");
    (sim, net)
}

/// Launch `count` ready nodes on a fresh simulated network.
#[allow(dead_code)]
pub async fn launch(count: usize) -> (SimNetwork, NodeNet, Vec<Arc<NodeHandle>>) {
    let (sim, net) = sim_net(NetConfig::default());
    let nodes = net.launch_and_wait(count).await.expect("launch nodes");
    (sim, net, nodes)
}
