use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::{
    transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes,
    TransactionRequest, H256,
};
use ethers_providers::{Http, Middleware, Provider, ProviderError};
use tracing::{debug, instrument};

use crate::chain::Endpoint;
use crate::error::LoaderError;

use super::{ConnectsProvider, LoaderProvider, ReadonlyCall, SignedTx, TxReceipt};

const CONSENSUS_NODE_METHOD: &str = "debug_isConsensusNode";

/// JSON-RPC provider over HTTP.
#[derive(Debug, Clone)]
pub struct EthersProvider {
    provider: Provider<Http>,
    endpoint: String,
}

impl EthersProvider {
    pub fn new(endpoint: &Endpoint) -> Result<Self, LoaderError> {
        let url = endpoint.http_url();
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|err| LoaderError::ConfigError(format!("invalid endpoint {url}: {err}")))?;
        Ok(Self {
            provider,
            endpoint: endpoint.label(),
        })
    }
}

fn network_error(err: ProviderError) -> LoaderError {
    LoaderError::NetworkError(err.to_string())
}

#[async_trait]
impl LoaderProvider for EthersProvider {
    async fn next_nonce(&self, address: Address) -> Result<u64, LoaderError> {
        let nonce = self
            .provider
            .get_transaction_count(address, Some(BlockId::Number(BlockNumber::Latest)))
            .await
            .map_err(|err| LoaderError::NonceQueryError {
                address,
                reason: err.to_string(),
            })?;
        Ok(nonce.low_u64())
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoint, hash = ?tx.hash, nonce = tx.nonce))]
    async fn submit(&self, tx: &SignedTx) -> Result<(), LoaderError> {
        self.provider
            .send_raw_transaction(tx.raw.clone())
            .await
            .map_err(|err| LoaderError::TxSubmissionError(err.to_string()))?;
        debug!("Transaction accepted by node");
        Ok(())
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TxReceipt>, LoaderError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(network_error)?;
        Ok(receipt.map(|receipt| TxReceipt {
            status: receipt.status.map(|status| status.as_u64()),
            logs: receipt.logs.into_iter().map(|log| log.data).collect(),
        }))
    }

    async fn call_readonly(&self, call: &ReadonlyCall) -> Result<Bytes, LoaderError> {
        let request = TransactionRequest::new()
            .from(call.from)
            .to(call.to)
            .data(call.data.clone())
            .gas(call.gas)
            .gas_price(call.gas_price);
        let tx: TypedTransaction = request.into();
        self.provider
            .call(&tx, Some(BlockId::Number(BlockNumber::Latest)))
            .await
            .map_err(network_error)
    }

    async fn is_node_active(&self) -> Result<bool, LoaderError> {
        self.provider
            .request::<_, bool>(CONSENSUS_NODE_METHOD, ())
            .await
            .map_err(network_error)
    }

    async fn block_number(&self) -> Result<u64, LoaderError> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(network_error)?;
        Ok(number.as_u64())
    }
}

/// Connects to endpoints over HTTP. A connection counts as established once the node answers
/// a chain id query.
#[derive(Debug, Clone, Default)]
pub struct EthersConnector;

#[async_trait]
impl ConnectsProvider for EthersConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn LoaderProvider>, LoaderError> {
        let provider = EthersProvider::new(endpoint)?;
        let chain_id = provider
            .provider
            .get_chainid()
            .await
            .map_err(network_error)?;
        debug!(endpoint = %endpoint.label(), %chain_id, "Connected to endpoint");
        Ok(Arc::new(provider))
    }
}
