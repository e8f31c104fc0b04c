//! Configuration for node batches, topology changes and fee accounting.
//!
//! Every struct has sensible defaults, `with_*` builders, and can be
//! loaded from YAML. Durations are written in milliseconds.
//!
//! ```yaml
//! host: 127.0.0.1
//! base_port: 18444
//! base_rpc_port: 18443
//! topology:
//!   min_edge_spacing: 500
//! fees:
//!   fee_rate_per_byte: 10
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use regnet_common::{
    amount::Amount,
    config::{CHANGE_OUTPUT_OVERHEAD, DEFAULT_FEE_RATE_PER_BYTE, DEFAULT_FLAT_FEE},
};
use serde::{Deserialize, Serialize};

/// Default spacing between two changes of the same edge
pub const DEFAULT_MIN_EDGE_SPACING: Duration = Duration::from_millis(500);
/// Default readiness deadline for a freshly launched node
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on waiting for every node to stop
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Topology controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Minimum time between two connect/disconnect requests on one edge
    #[serde(with = "duration_ms")]
    pub min_edge_spacing: Duration,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            min_edge_spacing: DEFAULT_MIN_EDGE_SPACING,
        }
    }
}

impl TopologyConfig {
    /// Set the minimum spacing between changes to the same edge.
    pub fn with_min_edge_spacing(mut self, spacing: Duration) -> Self {
        self.min_edge_spacing = spacing;
        self
    }
}

/// Fee accounting used when building transactions by hand.
///
/// All values are in satoshis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub fee_rate_per_byte: u64,
    /// Bytes a change output adds to the transaction
    pub change_output_overhead: u64,
    /// Fee used when spending an output whose value is already known
    pub flat_fee: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            fee_rate_per_byte: DEFAULT_FEE_RATE_PER_BYTE,
            change_output_overhead: CHANGE_OUTPUT_OVERHEAD,
            flat_fee: DEFAULT_FLAT_FEE,
        }
    }
}

impl FeeConfig {
    pub fn with_fee_rate_per_byte(mut self, rate: u64) -> Self {
        self.fee_rate_per_byte = rate;
        self
    }

    pub fn with_flat_fee(mut self, fee: u64) -> Self {
        self.flat_fee = fee;
        self
    }

    /// Fee for a transaction of `tx_size` bytes that is about to receive a
    /// change output.
    pub fn fee_for(&self, tx_size: usize) -> Amount {
        let bytes = tx_size as u64 + self.change_output_overhead;
        Amount::from_sat(self.fee_rate_per_byte.saturating_mul(bytes))
    }

    pub fn flat_fee(&self) -> Amount {
        Amount::from_sat(self.flat_fee)
    }
}

/// Settings of a node registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Host every node listens on
    pub host: String,
    /// P2P port of the first node
    pub base_port: u16,
    /// RPC port of the first node
    pub base_rpc_port: u16,
    /// Port increment between consecutive nodes
    pub port_step: u16,
    /// Parent of the per-node data directories (None = temporary directory)
    pub data_root: Option<PathBuf>,
    pub rpc_user: String,
    pub rpc_password: String,
    /// Appended to every node's argument list
    pub extra_args: Vec<String>,
    #[serde(with = "duration_ms")]
    pub ready_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub shutdown_timeout: Duration,
    pub topology: TopologyConfig,
    pub fees: FeeConfig,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 18444,
            base_rpc_port: 18443,
            port_step: 10,
            data_root: None,
            rpc_user: "user".to_string(),
            rpc_password: "password".to_string(),
            extra_args: Vec::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            topology: TopologyConfig::default(),
            fees: FeeConfig::default(),
        }
    }
}

impl NetConfig {
    /// Parse a configuration from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse net configuration")
    }

    /// Set the first P2P and RPC ports.
    pub fn with_ports(mut self, base_port: u16, base_rpc_port: u16) -> Self {
        self.base_port = base_port;
        self.base_rpc_port = base_rpc_port;
        self
    }

    pub fn with_port_step(mut self, step: u16) -> Self {
        self.port_step = step;
        self
    }

    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.rpc_user = user.into();
        self.rpc_password = password.into();
        self
    }

    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_topology(mut self, topology: TopologyConfig) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_fees(mut self, fees: FeeConfig) -> Self {
        self.fees = fees;
        self
    }
}
