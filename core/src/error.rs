//! Shared domain error type for ledger/consensus/wallet operations that
//! cross module boundaries. Infrastructure-level failures (config/PEM
//! loading, socket binding, process startup) use `anyhow::Result` instead.

#[derive(Debug)]
pub enum NodeError {
    InsufficientBalance { available: u64, needed: u64 },
    InvalidAddress(String),
    UnknownUtxo,
    SignatureInvalid,
    ChainMismatch,
    StoreIo(String),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::InsufficientBalance { available, needed } => {
                write!(f, "insufficient balance: have {available}, need {needed}")
            }
            NodeError::InvalidAddress(a) => write!(f, "invalid address: {a}"),
            NodeError::UnknownUtxo => write!(f, "referenced output is not in the utxo set"),
            NodeError::SignatureInvalid => write!(f, "signature does not verify"),
            NodeError::ChainMismatch => write!(f, "block does not match its declared hash or tip"),
            NodeError::StoreIo(e) => write!(f, "store I/O error: {e}"),
        }
    }
}

impl std::error::Error for NodeError {}
