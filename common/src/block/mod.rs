mod block;
mod header;
mod merkle;
pub mod miner;

pub use block::{Block, BlockTransaction};
pub use header::{BlockHeader, NONCE_OFFSET, TIMESTAMP_OFFSET};
pub use merkle::calculate_merkle_root;
pub use miner::{PowError, PowSolution, ProofOfWorkSolver};

// Height of a block in the active chain, genesis is 0
pub type BlockHeight = u64;
