use thiserror::Error;

// Node-reported error codes
pub const RPC_WALLET_ERROR: i64 = -4;
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
pub const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;
pub const RPC_INVALID_PARAMETER: i64 = -8;
pub const RPC_CLIENT_NOT_CONNECTED: i64 = -9;
pub const RPC_CLIENT_IN_INITIAL_DOWNLOAD: i64 = -10;
pub const RPC_DESERIALIZATION_ERROR: i64 = -22;
pub const RPC_CLIENT_NODE_NOT_ADDED: i64 = -24;
pub const RPC_VERIFY_ERROR: i64 = -25;
pub const RPC_VERIFY_REJECTED: i64 = -26;
pub const RPC_IN_WARMUP: i64 = -28;
pub const RPC_CLIENT_NODE_NOT_CONNECTED: i64 = -29;

pub type RpcResult<T> = Result<T, RpcError>;

/// Failure of a single request against a node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Transport error: {}", _0)]
    Transport(String),
    #[error("JSON-RPC connection rejected: 401 unauthorized")]
    Unauthorized,
    #[error("Node error {}: {}", code, message)]
    Node { code: i64, message: String },
}

/// How a readiness poll reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Node not accepting requests yet, keep polling
    TransientStartup,
    /// Node is still downloading blocks
    Downloading,
    /// Node is loading its block index or otherwise warming up
    LoadingIndex,
    /// Credentials rejected, retrying is pointless
    Unauthorized,
    Fatal,
}

impl RpcError {
    pub fn node(code: i64, message: impl Into<String>) -> Self {
        RpcError::Node {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Node { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            RpcError::ConnectionRefused => ErrorClass::TransientStartup,
            RpcError::Unauthorized => ErrorClass::Unauthorized,
            RpcError::Transport(_) => ErrorClass::Fatal,
            RpcError::Node { code, .. } => match *code {
                RPC_CLIENT_NOT_CONNECTED => ErrorClass::TransientStartup,
                RPC_CLIENT_IN_INITIAL_DOWNLOAD => ErrorClass::Downloading,
                RPC_IN_WARMUP => ErrorClass::LoadingIndex,
                _ => ErrorClass::Fatal,
            },
        }
    }
}
