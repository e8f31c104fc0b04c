// Satoshis per coin, the node's JSON amounts are expressed in coins
pub const COIN: u64 = 100_000_000;

// Fixed block header size in bytes
pub const BLOCK_HEADER_SIZE: usize = 80;

// Default amount sent by double-spend construction (1 coin)
pub const DEFAULT_DOUBLE_SPEND_AMOUNT: u64 = COIN;

// Default fee rate used by the transaction builder, in satoshis per byte
pub const DEFAULT_FEE_RATE_PER_BYTE: u64 = 10;

// Flat fee used when spending a UTXO of known value
pub const DEFAULT_FLAT_FEE: u64 = 10_000;

// Extra bytes a P2PKH change output adds to a transaction:
// 8 (amount) + 1 (script length) + 25 (script)
pub const CHANGE_OUTPUT_OVERHEAD: u64 = 34;

// Coinbase outputs become spendable after this many confirmations
pub const COINBASE_MATURITY: u64 = 100;

// Package version with the short commit hash, set by the build script
pub const VERSION: &str = env!("BUILD_VERSION");
