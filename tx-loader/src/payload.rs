use std::fmt::Debug;

use ethers_core::types::{Address, Bytes, U256};
use serde::Deserialize;

use crate::chain::NodeId;
use crate::error::LoaderError;

pub use encoder::RlpPayloadEncoder;

mod encoder;

/// Parameters of a one-shot stake registration. Signatures and BLS material are supplied
/// pre-computed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StakeRegistration {
    pub benefit_address: Address,
    pub node_id: NodeId,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub details: String,
    pub amount: U256,
    #[serde(default)]
    pub reward_per: u64,
    pub program_version: u32,
    pub program_version_sign: Bytes,
    pub bls_pub_key: Bytes,
    pub bls_proof: Bytes,
}

/// Operations understood by the chain's built-in staking contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StakingOperation {
    CreateStake(Box<StakeRegistration>),
    IncreaseStake { node: NodeId, amount: U256 },
    WithdrawStake { node: NodeId },
    Delegate { node: NodeId, amount: U256 },
    WithdrawDelegate {
        node: NodeId,
        staking_block: u64,
        amount: U256,
    },
    QueryCandidate { node: NodeId },
}

impl StakingOperation {
    pub fn function_code(&self) -> u16 {
        match self {
            StakingOperation::CreateStake(_) => 1000,
            StakingOperation::IncreaseStake { .. } => 1002,
            StakingOperation::WithdrawStake { .. } => 1003,
            StakingOperation::Delegate { .. } => 1004,
            StakingOperation::WithdrawDelegate { .. } => 1005,
            StakingOperation::QueryCandidate { .. } => 1105,
        }
    }
}

/// Turns a staking operation into transaction call data.
pub trait EncodesPayload: Send + Sync + Debug {
    fn encode(&self, operation: &StakingOperation) -> Result<Bytes, LoaderError>;
}
