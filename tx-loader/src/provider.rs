use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::{Address, Bytes, H256, U256};

use crate::chain::Endpoint;
use crate::error::LoaderError;

pub use ethers::{EthersConnector, EthersProvider};

mod ethers;

/// A signed transaction ready for broadcast. Sender and nonce travel with the raw bytes so
/// the engine can log them without decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: H256,
    pub from: Address,
    pub nonce: u64,
}

/// The parts of a transaction receipt the engine inspects.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxReceipt {
    pub status: Option<u64>,
    /// Data of each emitted log, in order
    pub logs: Vec<Bytes>,
}

impl TxReceipt {
    /// Text carried by the first log, after its 2-byte encoding prefix.
    pub fn first_log_message(&self) -> Option<String> {
        let data = self.logs.first()?;
        let message = data.get(2..)?;
        Some(String::from_utf8_lossy(message).into_owned())
    }
}

/// Read-only contract call, executed against the latest state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadonlyCall {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub gas: u64,
    pub gas_price: U256,
}

/// RPC capability of a single endpoint.
#[async_trait]
pub trait LoaderProvider: Send + Sync {
    /// Next nonce of `address` as of the latest block
    async fn next_nonce(&self, address: Address) -> Result<u64, LoaderError>;

    /// Broadcast a signed transaction
    async fn submit(&self, tx: &SignedTx) -> Result<(), LoaderError>;

    /// `Ok(None)` while the transaction is unknown or not yet mined
    async fn receipt(&self, hash: H256) -> Result<Option<TxReceipt>, LoaderError>;

    async fn call_readonly(&self, call: &ReadonlyCall) -> Result<Bytes, LoaderError>;

    /// Whether the node currently takes part in consensus
    async fn is_node_active(&self) -> Result<bool, LoaderError>;

    async fn block_number(&self) -> Result<u64, LoaderError>;
}

/// Opens a provider for an endpoint.
#[async_trait]
pub trait ConnectsProvider: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn LoaderProvider>, LoaderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_log_message_skips_prefix() {
        let mut data = vec![0x01, 0x02];
        data.extend_from_slice(b"Delegate failed: Account of Candidate(Validator)");
        let receipt = TxReceipt {
            status: Some(1),
            logs: vec![Bytes::from(data), Bytes::from(vec![0xff])],
        };
        assert_eq!(
            receipt.first_log_message().as_deref(),
            Some("Delegate failed: Account of Candidate(Validator)")
        );
    }

    #[test]
    fn test_first_log_message_handles_short_or_missing_logs() {
        assert_eq!(TxReceipt::default().first_log_message(), None);
        let short = TxReceipt {
            status: None,
            logs: vec![Bytes::from(vec![0x01])],
        };
        assert_eq!(short.first_log_message(), None);
    }
}
