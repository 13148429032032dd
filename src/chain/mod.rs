//! Chain access
//!
//! Everything the core reads from the chain goes through `ChainReader`:
//! contract bytecode (venue validation), `eth_call` (pair enumeration and
//! quoting) and balances (allocation sizing).

mod rpc;

pub use rpc::RpcChainReader;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use thiserror::Error;

/// Typed chain failure, so callers can tell a dead endpoint from a revert
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("network error: {0}")]
    Network(String),

    #[error("call reverted: {0}")]
    Revert(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl ChainError {
    /// Worth another attempt: transport problems, not deterministic failures
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Network(_) | ChainError::Timeout(_))
    }
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Deployed bytecode; empty when no contract lives at `address`
    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError>;

    /// Read-only call with raw ABI-encoded calldata
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError>;

    /// Native balance in wei
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;
}
