use std::sync::atomic::{AtomicU64, Ordering};

use ethers_core::types::{Address, U256};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::chain::{ChainContext, NodeId};
use crate::error::LoaderError;
use crate::payload::{EncodesPayload, StakingOperation};
use crate::provider::{LoaderProvider, ReadonlyCall};

/// A validator node and the block at which its stake was registered.
#[derive(Debug)]
pub struct ValidatorNode {
    pub id: NodeId,
    staking_block: AtomicU64,
}

impl ValidatorNode {
    pub fn staking_block(&self) -> u64 {
        self.staking_block.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Deserialize)]
struct CandidateResponse {
    #[serde(rename = "Code")]
    code: i64,
    #[serde(rename = "Ret")]
    ret: Option<CandidateInfo>,
}

#[derive(Debug, Deserialize)]
struct CandidateInfo {
    #[serde(rename = "StakingBlockNum")]
    staking_block_num: u64,
}

/// Validator nodes targeted by the multi-phase workload, in delegation order.
#[derive(Debug, Default)]
pub struct ValidatorBook {
    nodes: Vec<ValidatorNode>,
}

impl ValidatorBook {
    pub fn new(ids: Vec<NodeId>) -> Self {
        let nodes = ids
            .into_iter()
            .map(|id| ValidatorNode {
                id,
                staking_block: AtomicU64::new(0),
            })
            .collect();
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, position: usize) -> Option<&ValidatorNode> {
        self.nodes.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorNode> {
        self.nodes.iter()
    }

    /// Looks up the staking block of every node. Nodes whose lookup fails keep their previous
    /// value (0 until resolved once).
    pub async fn refresh(
        &self,
        provider: &dyn LoaderProvider,
        encoder: &dyn EncodesPayload,
        chain: &ChainContext,
        caller: Address,
        gas_price: U256,
    ) {
        for node in &self.nodes {
            match query_staking_block(provider, encoder, chain, caller, gas_price, &node.id).await
            {
                Ok(block) => {
                    debug!(node = ?node.id, staking_block = block, "Resolved staking block");
                    node.staking_block.store(block, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(node = ?node.id, ?err, "Failed to resolve staking block");
                }
            }
        }
    }
}

/// Gas allowance for the read-only candidate query
const QUERY_GAS: u64 = 210_000;

async fn query_staking_block(
    provider: &dyn LoaderProvider,
    encoder: &dyn EncodesPayload,
    chain: &ChainContext,
    caller: Address,
    gas_price: U256,
    node: &NodeId,
) -> Result<u64, LoaderError> {
    let data = encoder.encode(&StakingOperation::QueryCandidate { node: *node })?;
    let call = ReadonlyCall {
        from: caller,
        to: chain.staking_contract,
        data,
        gas: QUERY_GAS,
        gas_price,
    };
    let response = provider.call_readonly(&call).await?;
    decode_staking_block(&response)
}

fn decode_staking_block(response: &[u8]) -> Result<u64, LoaderError> {
    let decoded: CandidateResponse = serde_json::from_slice(response)
        .map_err(|err| LoaderError::CallDecodingError(err.to_string()))?;
    if decoded.code != 0 {
        return Err(LoaderError::CallDecodingError(format!(
            "candidate query returned code {}",
            decoded.code
        )));
    }
    decoded
        .ret
        .map(|info| info.staking_block_num)
        .ok_or_else(|| LoaderError::CallDecodingError("candidate info missing".to_string()))
}

#[cfg(test)]
mod tests {
    use ethers_core::types::Bytes;

    use crate::chain::NODE_ID_LEN;
    use crate::payload::RlpPayloadEncoder;
    use crate::tests::test_utils::MockProvider;

    use super::*;

    fn chain() -> ChainContext {
        ChainContext {
            chain_id: 101,
            staking_contract: Address::repeat_byte(0x10),
        }
    }

    #[test]
    fn test_decode_staking_block() {
        let response = br#"{"Code":0,"Ret":{"StakingBlockNum":812,"NodeId":"ab"}}"#;
        assert_eq!(decode_staking_block(response).unwrap(), 812);
    }

    #[test]
    fn test_decode_rejects_error_code() {
        let response = br#"{"Code":301204,"Ret":null}"#;
        assert!(matches!(
            decode_staking_block(response),
            Err(LoaderError::CallDecodingError(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_keeps_zero_on_failure() {
        let book = ValidatorBook::new(vec![NodeId([1; NODE_ID_LEN]), NodeId([2; NODE_ID_LEN])]);
        let mut provider = MockProvider::new();
        let mut calls = 0;
        provider.expect_call_readonly().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(Bytes::from(
                    br#"{"Code":0,"Ret":{"StakingBlockNum":99}}"#.to_vec(),
                ))
            } else {
                Err(LoaderError::NetworkError("timeout".to_string()))
            }
        });

        book.refresh(
            &provider,
            &RlpPayloadEncoder,
            &chain(),
            Address::zero(),
            U256::one(),
        )
        .await;

        assert_eq!(book.node(0).unwrap().staking_block(), 99);
        assert_eq!(book.node(1).unwrap().staking_block(), 0);
    }
}
