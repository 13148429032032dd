//! JSON-RPC chain reader over alloy
//!
//! Every request gets a hard timeout and goes through the shared retry policy.
//! Only transport failures are retried; reverts come back immediately.

use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::TransactionRequest;
use alloy_transport::TransportError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

use super::{ChainError, ChainReader};
use crate::config::Config;
use crate::retry::RetryPolicy;

pub struct RpcChainReader {
    /// Built once and shared by every request; an unparsable URL fails them all
    provider: Result<RootProvider, ChainError>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl RpcChainReader {
    pub fn new(rpc_url: String, timeout: Duration, retry: RetryPolicy) -> Self {
        let provider = rpc_url
            .parse::<reqwest::Url>()
            .map(RootProvider::new_http)
            .map_err(|e| ChainError::Network(format!("invalid RPC URL: {}", e)));

        Self {
            provider,
            timeout,
            retry,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.rpc_url.clone(),
            Duration::from_millis(config.rpc_timeout_ms),
            config.retry,
        )
    }

    fn provider(&self) -> Result<&RootProvider, ChainError> {
        self.provider.as_ref().map_err(Clone::clone)
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn get_code_once(&self, address: Address) -> Result<Bytes, ChainError> {
        let provider = self.provider()?;
        self.with_timeout(async move {
            provider.get_code_at(address).await.map_err(classify)
        })
        .await
    }

    async fn call_once(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let provider = self.provider()?;
        let tx = TransactionRequest::default().to(to).input(calldata.into());
        self.with_timeout(async move { provider.call(tx).await.map_err(classify) })
            .await
    }

    async fn get_balance_once(&self, address: Address) -> Result<U256, ChainError> {
        let provider = self.provider()?;
        self.with_timeout(async move {
            provider.get_balance(address).await.map_err(classify)
        })
        .await
    }
}

/// Map a transport error onto the typed chain failure
fn classify(e: TransportError) -> ChainError {
    if let Some(payload) = e.as_error_resp() {
        let message = payload.message.to_string();
        // Code 3 is the standard "execution reverted" error
        if payload.code == 3 || message.to_lowercase().contains("revert") {
            return ChainError::Revert(message);
        }
        return ChainError::Network(message);
    }
    if e.is_deser_error() || e.is_ser_error() {
        return ChainError::Malformed(e.to_string());
    }
    ChainError::Network(e.to_string())
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        trace!("eth_getCode {}", address);
        self.retry
            .run("eth_getCode", ChainError::is_transient, || self.get_code_once(address))
            .await
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        trace!("eth_call {} ({} bytes)", to, calldata.len());
        self.retry
            .run("eth_call", ChainError::is_transient, || {
                self.call_once(to, calldata.clone())
            })
            .await
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.retry
            .run("eth_getBalance", ChainError::is_transient, || {
                self.get_balance_once(address)
            })
            .await
    }
}
