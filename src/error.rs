use alloy::primitives::U256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FloodError>;

#[derive(Debug, Error)]
pub enum FloodError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantError),
    #[error("funder balance {available} cannot cover a single account requirement of {needed}")]
    InsufficientFunds { needed: U256, available: U256 },
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("seed cannot derive account #{index}: {reason}")]
    BadSeed { index: u32, reason: String },
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },
    #[error("transport failure during {method}: {reason}")]
    Transport { method: String, reason: String },
    #[error("node rejected {method} (code {code}): {message}")]
    Remote {
        method: String,
        code: i64,
        message: String,
    },
    #[error("malformed response for {method}: {reason}")]
    Malformed { method: String, reason: String },
}

impl RpcError {
    /// Timeouts are the only class this client retries; a node that answered
    /// with an explicit error will answer the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("nonce conflict for {address}: nonce {nonce} enqueued twice")]
    NonceConflict { address: String, nonce: u64 },
    #[error("signing worker failed: {0}")]
    SigningFailed(String),
    #[error("{0}")]
    Broken(String),
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("cannot open database at `{path}`: {reason}")]
    Open { path: String, reason: String },
    #[error("database operation failed: {0}")]
    Query(#[from] rusqlite::Error),
}
