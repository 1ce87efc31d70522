use std::fmt;
use std::str::FromStr;

use ethers_core::types::{Address, H160};
use serde::{Deserialize, Deserializer};

use crate::error::LoaderError;

pub const DEFAULT_CHAIN_ID: u64 = 101;

/// Built-in staking contract, `0x1000000000000000000000000000000000000002`
pub const STAKING_CONTRACT: Address = H160([
    0x10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x02,
]);

/// Chain-wide constants shared by every component of the engine.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChainContext {
    pub chain_id: u64,
    /// Address of the built-in staking contract that receives delegate/withdraw payloads
    pub staking_contract: Address,
}

impl Default for ChainContext {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            staking_contract: STAKING_CONTRACT,
        }
    }
}

/// A node of the target chain. Ports are kept as strings because that is how node lists are
/// distributed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub ws_port: String,
    pub rpc_port: String,
}

impl Endpoint {
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.rpc_port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.ws_port)
    }

    /// Short form used as a metrics label and log field
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }
}

pub const NODE_ID_LEN: usize = 64;

/// 64-byte identifier of a validator node (its uncompressed public key without prefix).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(trimmed)
            .map_err(|err| LoaderError::ConfigError(format!("invalid node id {s:?}: {err}")))?;
        let id: [u8; NODE_ID_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            LoaderError::ConfigError(format!(
                "node id must be {NODE_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(NodeId(id))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.0);
        let tail = encoded.len().saturating_sub(8);
        write!(f, "NodeId({}..{})", &encoded[..8], &encoded[tail..])
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parses_with_and_without_prefix() {
        let hex_id = "ab".repeat(NODE_ID_LEN);
        let plain: NodeId = hex_id.parse().unwrap();
        let prefixed: NodeId = format!("0x{hex_id}\n").parse().unwrap();
        assert_eq!(plain, prefixed);
        assert_eq!(plain.to_string(), hex_id);
    }

    #[test]
    fn test_node_id_rejects_wrong_length() {
        let err = "abcd".parse::<NodeId>().unwrap_err();
        assert!(matches!(err, LoaderError::ConfigError(_)));
    }

    #[test]
    fn test_default_staking_contract() {
        let expected: Address = "0x1000000000000000000000000000000000000002".parse().unwrap();
        assert_eq!(ChainContext::default().staking_contract, expected);
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoint = Endpoint {
            host: "10.0.0.1".into(),
            ws_port: "6790".into(),
            rpc_port: "6789".into(),
        };
        assert_eq!(endpoint.http_url(), "http://10.0.0.1:6789");
        assert_eq!(endpoint.ws_url(), "ws://10.0.0.1:6790");
        assert_eq!(endpoint.label(), "10.0.0.1:6789");
    }
}
