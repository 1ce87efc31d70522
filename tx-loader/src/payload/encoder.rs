use ethers_core::types::{Bytes, U256};
use rlp::RlpStream;

use crate::error::LoaderError;

use super::{EncodesPayload, StakingOperation};

/// Free-balance funding type used for stake creation and delegation
const FREE_BALANCE: u16 = 0;

/// Encodes operations as an RLP list whose items are themselves RLP encodings of each field.
#[derive(Debug, Clone, Default)]
pub struct RlpPayloadEncoder;

fn uint(value: u64) -> Vec<u8> {
    rlp::encode(&value).to_vec()
}

fn bytes(value: &[u8]) -> Vec<u8> {
    rlp::encode(&value.to_vec()).to_vec()
}

fn amount(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let first = buf.iter().position(|b| *b != 0).unwrap_or(buf.len());
    bytes(&buf[first..])
}

impl EncodesPayload for RlpPayloadEncoder {
    fn encode(&self, operation: &StakingOperation) -> Result<Bytes, LoaderError> {
        let code = uint(operation.function_code().into());
        let fields = match operation {
            StakingOperation::CreateStake(registration) => {
                if registration.program_version_sign.is_empty() {
                    return Err(LoaderError::PayloadEncodingError(
                        "program version signature is empty".to_string(),
                    ));
                }
                vec![
                    code,
                    uint(FREE_BALANCE.into()),
                    bytes(registration.benefit_address.as_bytes()),
                    bytes(registration.node_id.as_bytes()),
                    bytes(registration.external_id.as_bytes()),
                    bytes(registration.node_name.as_bytes()),
                    bytes(registration.website.as_bytes()),
                    bytes(registration.details.as_bytes()),
                    amount(registration.amount),
                    uint(registration.reward_per),
                    uint(registration.program_version.into()),
                    bytes(&registration.program_version_sign),
                    bytes(&registration.bls_pub_key),
                    bytes(&registration.bls_proof),
                ]
            }
            StakingOperation::IncreaseStake { node, amount: value } => vec![
                code,
                bytes(node.as_bytes()),
                uint(FREE_BALANCE.into()),
                amount(*value),
            ],
            StakingOperation::WithdrawStake { node } => vec![code, bytes(node.as_bytes())],
            StakingOperation::Delegate { node, amount: value } => vec![
                code,
                uint(FREE_BALANCE.into()),
                bytes(node.as_bytes()),
                amount(*value),
            ],
            StakingOperation::WithdrawDelegate {
                node,
                staking_block,
                amount: value,
            } => vec![
                code,
                uint(*staking_block),
                bytes(node.as_bytes()),
                amount(*value),
            ],
            StakingOperation::QueryCandidate { node } => vec![code, bytes(node.as_bytes())],
        };

        let mut stream = RlpStream::new_list(fields.len());
        for field in &fields {
            stream.append(field);
        }
        Ok(Bytes::from(stream.out().to_vec()))
    }
}
