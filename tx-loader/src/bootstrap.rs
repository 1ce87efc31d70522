//! Steps that run once before the load starts.

use std::time::Duration;

use ethers_core::types::{TransactionRequest, H256};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::account::Account;
use crate::chain::{ChainContext, Endpoint};
use crate::dispatcher::{call_until_success_or_nonretryable_error, sign_request};
use crate::error::LoaderError;
use crate::payload::{EncodesPayload, StakeRegistration, StakingOperation};
use crate::provider::{ConnectsProvider, LoaderProvider};
use crate::settings::TxSettings;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STAKE_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocks until `endpoint` reports a block height of at least `target`. Connection and query
/// failures are retried until `cancel` fires.
#[instrument(skip(connector, endpoint, cancel), fields(endpoint = %endpoint.label()))]
pub async fn wait_for_block(
    connector: &dyn ConnectsProvider,
    endpoint: &Endpoint,
    target: u64,
    cancel: &CancellationToken,
) -> Result<u64, LoaderError> {
    let provider = call_until_success_or_nonretryable_error(
        || connector.connect(endpoint),
        "Connecting to endpoint",
        POLL_INTERVAL,
        cancel,
    )
    .await?;
    loop {
        match provider.block_number().await {
            Ok(height) if height >= target => {
                info!(height, "Chain reached ready block");
                return Ok(height);
            }
            Ok(height) => debug!(height, "Waiting for ready block"),
            Err(err) => warn!(?err, "Failed to query block number"),
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(LoaderError::Cancelled),
            _ = sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Submits a stake-create transaction from `account` and waits for it to be mined.
#[instrument(skip_all, fields(account = ?account.address()))]
pub async fn register_stake(
    provider: &dyn LoaderProvider,
    encoder: &dyn EncodesPayload,
    chain: &ChainContext,
    tx: &TxSettings,
    account: &Account,
    registration: StakeRegistration,
) -> Result<H256, LoaderError> {
    let node_id = registration.node_id;
    let nonce = provider.next_nonce(account.address()).await?;
    let data = encoder.encode(&StakingOperation::CreateStake(Box::new(registration)))?;
    let request = TransactionRequest::new()
        .from(account.address())
        .to(chain.staking_contract)
        .value(tx.contract_value())
        .gas(tx.contract_gas_limit)
        .gas_price(tx.gas_price())
        .nonce(nonce)
        .chain_id(chain.chain_id)
        .data(data);
    let signed = sign_request(account, request, nonce)?;
    provider.submit(&signed).await?;
    info!(hash = ?signed.hash, %node_id, "Stake registration submitted");

    let receipt = timeout(STAKE_CONFIRMATION_TIMEOUT, async {
        loop {
            match provider.receipt(signed.hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {}
                Err(err) => warn!(?err, "Failed to query stake registration receipt"),
            }
            sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .map_err(|_| {
        LoaderError::TxSubmissionError(format!(
            "stake registration {:?} not confirmed within {STAKE_CONFIRMATION_TIMEOUT:?}",
            signed.hash
        ))
    })?;

    if receipt.status == Some(0) {
        return Err(LoaderError::TxSubmissionError(format!(
            "stake registration {:?} reverted: {}",
            signed.hash,
            receipt.first_log_message().unwrap_or_default()
        )));
    }
    info!(hash = ?signed.hash, "Stake registration confirmed");
    Ok(signed.hash)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use ethers_core::types::U256;

    use crate::payload::RlpPayloadEncoder;
    use crate::provider::TxReceipt;
    use crate::tests::test_utils::{test_account, test_endpoints, test_node, FakeLedger, MockProvider};

    use super::*;

    fn registration() -> StakeRegistration {
        StakeRegistration {
            benefit_address: test_account(3).address(),
            node_id: test_node(9),
            external_id: String::new(),
            node_name: "node-9".to_string(),
            website: "https://example.org".to_string(),
            details: String::new(),
            amount: U256::from(10u64).pow(U256::from(24u64)),
            reward_per: 500,
            program_version: 3840,
            program_version_sign: vec![0xaa; 65].into(),
            bls_pub_key: vec![0xbb; 96].into(),
            bls_proof: vec![0xcc; 64].into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_block_polls_until_height() {
        let mut provider = MockProvider::new();
        let height = Arc::new(AtomicU64::new(0));
        let polled = height.clone();
        provider
            .expect_block_number()
            .returning(move || Ok(polled.fetch_add(1, Ordering::SeqCst)));
        let provider: Arc<dyn LoaderProvider> = Arc::new(provider);

        struct Connector(Arc<dyn LoaderProvider>);

        #[async_trait::async_trait]
        impl ConnectsProvider for Connector {
            async fn connect(&self, _: &Endpoint) -> Result<Arc<dyn LoaderProvider>, LoaderError> {
                Ok(self.0.clone())
            }
        }

        let reached = wait_for_block(
            &Connector(provider),
            &test_endpoints(1)[0],
            5,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(reached, 5);
        assert_eq!(height.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_block_can_be_cancelled() {
        let ledger = FakeLedger::new();
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let result = wait_for_block(
            ledger.connector().as_ref(),
            &test_endpoints(1)[0],
            1_000,
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(LoaderError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_stake_waits_for_receipt() {
        let ledger = FakeLedger::new();
        let account = test_account(0);
        let hash = register_stake(
            &ledger,
            &RlpPayloadEncoder,
            &ChainContext::default(),
            &TxSettings::default(),
            &account,
            registration(),
        )
        .await
        .unwrap();

        let accepted = ledger.accepted();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].hash, hash);
        assert_eq!(accepted[0].from, account.address());
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_stake_times_out() {
        let ledger = FakeLedger::new().without_mining();
        let result = register_stake(
            &ledger,
            &RlpPayloadEncoder,
            &ChainContext::default(),
            &TxSettings::default(),
            &test_account(0),
            registration(),
        )
        .await;
        assert!(matches!(result, Err(LoaderError::TxSubmissionError(_))));
    }

    #[tokio::test]
    async fn test_register_stake_reports_revert() {
        let mut provider = MockProvider::new();
        provider.expect_next_nonce().returning(|_| Ok(0));
        provider.expect_submit().returning(|_| Ok(()));
        provider.expect_receipt().returning(|_| {
            Ok(Some(TxReceipt {
                status: Some(0),
                logs: Vec::new(),
            }))
        });
        let result = register_stake(
            &provider,
            &RlpPayloadEncoder,
            &ChainContext::default(),
            &TxSettings::default(),
            &test_account(0),
            registration(),
        )
        .await;
        assert!(matches!(result, Err(LoaderError::TxSubmissionError(_))));
    }
}
