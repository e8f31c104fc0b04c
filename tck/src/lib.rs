//! # Regnet Test Kit
//!
//! Orchestration of small regtest networks for integration tests: launching
//! nodes and waiting for them to come up, rewiring the peer graph between
//! them, waiting for chains to converge, and building the transactions a
//! test needs (spends, change, double spends).
//!
//! ## Layout
//!
//! - [`net`]: node registry, batch launch and shutdown
//! - [`node`]: one node's handle, readiness polling and wallet helpers
//! - [`topology`]: connect, disconnect, partition and merge with per-edge
//!   rate limiting
//! - [`sync`]: chain tip comparison and convergence waits
//! - [`tx_builder`]: raw transaction construction over the node RPC
//! - [`sim`]: an in-process network of simulated nodes for the crate's own
//!   tests and for tests that do not need a real node binary
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use regnet_tck::prelude::*;
//!
//! #[tokio::test]
//! async fn test_partition_and_merge() -> Result<()> {
//!     let sim = Arc::new(SimNetwork::new());
//!     let net = NodeNet::new(NetConfig::default(), sim)?;
//!     let nodes = net.launch_and_wait(4).await?;
//!
//!     net.partition(&nodes, 2, &[]).await?;
//!     nodes[0].generate_blocks(3).await?;
//!     net.merge(&nodes).await?;
//!     net.sync_all(DEFAULT_SYNC_TIMEOUT).await?;
//!
//!     net.shutdown_all().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

/// Synchronous entry point for the async operations
pub mod blocking;

/// Network, topology and fee configuration
pub mod config;

/// Text renderings of the peer graph and of diverging chains
pub mod graph;

/// Node registry
pub mod net;

/// Node handles
pub mod node;

/// Clock abstraction
pub mod orchestrator;

/// Process lifecycle seam
pub mod process;

/// Node RPC surface
pub mod rpc;

/// In-process simulated nodes
pub mod sim;

/// Chain convergence
pub mod sync;

/// Peer graph control
pub mod topology;

/// Raw transaction construction
pub mod tx_builder;

/// Convenient re-exports for common usage
pub mod prelude;

pub use net::{NetError, NodeNet};
pub use node::{NodeHandle, NodeId};
pub use orchestrator::{Clock, PausedClock, SystemClock};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
