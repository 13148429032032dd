//! Multicall3 batching over the chain reader

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use std::sync::Arc;
use tracing::trace;

use crate::abi::{IMulticall3, MULTICALL3};
use crate::chain::{ChainError, ChainReader};

/// Maximum calls per batch (to avoid gas limits)
const MAX_CALLS_PER_BATCH: usize = 100;

/// Call that is allowed to fail without sinking the batch
pub fn call3(target: Address, calldata: Vec<u8>) -> IMulticall3::Call3 {
    IMulticall3::Call3 {
        target,
        allowFailure: true,
        callData: calldata.into(),
    }
}

/// Decode one sub-call result, `None` when it failed or does not decode
pub fn decode<C: SolCall>(result: &IMulticall3::Result) -> Option<C::Return> {
    if !result.success {
        return None;
    }
    C::abi_decode_returns(&result.returnData).ok()
}

#[derive(Clone)]
pub struct Multicall {
    chain: Arc<dyn ChainReader>,
}

impl Multicall {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &Arc<dyn ChainReader> {
        &self.chain
    }

    /// Execute calls in chunks; results come back in call order
    pub async fn aggregate(&self, calls: Vec<IMulticall3::Call3>) -> Result<Vec<IMulticall3::Result>, ChainError> {
        let mut results = Vec::with_capacity(calls.len());

        for chunk in calls.chunks(MAX_CALLS_PER_BATCH) {
            let calldata = IMulticall3::aggregate3Call { calls: chunk.to_vec() }.abi_encode();
            let raw = self.chain.call(MULTICALL3, Bytes::from(calldata)).await?;

            let decoded = IMulticall3::aggregate3Call::abi_decode_returns(&raw)
                .map_err(|e| ChainError::Malformed(format!("multicall result: {}", e)))?;

            if decoded.len() != chunk.len() {
                return Err(ChainError::Malformed(format!(
                    "multicall returned {} results for {} calls",
                    decoded.len(),
                    chunk.len()
                )));
            }
            trace!("Multicall3 batch of {} calls", chunk.len());
            results.extend(decoded);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::IERC20;
    use crate::chain::mock::MockChain;
    use alloy_primitives::U256;

    #[tokio::test]
    async fn test_aggregate_decodes_in_order() {
        let token = Address::repeat_byte(0x11);
        let calls = vec![
            call3(token, IERC20::decimalsCall {}.abi_encode()),
            call3(token, IERC20::balanceOfCall { owner: Address::ZERO }.abi_encode()),
        ];
        let expected_calldata = IMulticall3::aggregate3Call { calls: calls.clone() }.abi_encode();

        let returned = vec![
            IMulticall3::Result {
                success: true,
                returnData: IERC20::decimalsCall::abi_encode_returns(&6u8).into(),
            },
            IMulticall3::Result {
                success: false,
                returnData: Bytes::new(),
            },
        ];
        let encoded = IMulticall3::aggregate3Call::abi_encode_returns(&returned);

        let chain = MockChain::new().with_call(MULTICALL3, expected_calldata, Ok(encoded.into()));
        let results = Multicall::new(Arc::new(chain)).aggregate(calls).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(decode::<IERC20::decimalsCall>(&results[0]), Some(6));
        assert_eq!(decode::<IERC20::balanceOfCall>(&results[1]), None::<U256>);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_call() {
        let chain = Arc::new(MockChain::new());
        let results = Multicall::new(chain.clone()).aggregate(Vec::new()).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(chain.calls_made(), 0);
    }
}
