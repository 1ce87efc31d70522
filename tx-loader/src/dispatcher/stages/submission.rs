use ethers_core::types::{
    transaction::eip2718::TypedTransaction, TransactionRequest, H256,
};
use ethers_core::utils::keccak256;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

use crate::account::{Account, ReceiptTask};
use crate::dispatcher::reporter::LoaderCounters;
use crate::dispatcher::WorkerState;
use crate::error::LoaderError;
use crate::payload::StakingOperation;
use crate::provider::SignedTx;
use crate::workload::Action;

use super::nonce::resolve_nonce;

/// Where the account goes after a dispatch attempt.
#[derive(Debug)]
pub(crate) enum SubmissionOutcome {
    /// The last transaction of the action was accepted and should be polled for a receipt
    Submitted(ReceiptTask),
    /// The transaction could not be built or signed; the account goes straight back to the
    /// shared intake
    Rejected(Account),
    /// The node refused the transaction or no nonce was available; retry after the retry delay
    RetryLater(Account),
}

/// Submits the account's next action. A transfer burst uses consecutive nonces; only the hash of
/// its last transaction is kept for confirmation.
#[instrument(
    skip_all,
    name = "Submission::dispatch",
    fields(endpoint = %state.endpoint, account = ?account.address())
)]
pub(crate) async fn dispatch(state: &WorkerState, mut account: Account) -> SubmissionOutcome {
    let shared = &state.shared;
    let action = match shared.workload.next_action(&account) {
        Ok(action) => action,
        Err(err) => {
            error!(?err, "Failed to pick next action");
            return SubmissionOutcome::Rejected(account);
        }
    };
    let Some(mut nonce) = resolve_nonce(state, &account).await else {
        account.last_sent = Instant::now();
        return SubmissionOutcome::RetryLater(account);
    };

    let kind = action.kind();
    let first_sent = Instant::now();
    let mut last_hash: Option<H256> = None;
    for _ in 0..action.tx_count() {
        let signed = match sign_action(state, &account, &action, nonce) {
            Ok(signed) => signed,
            Err(err) => {
                warn!(?err, nonce, "Failed to build transaction");
                LoaderCounters::record(&shared.counters.sign_failures);
                shared.metrics.update_sign_failures_metric(&state.endpoint);
                return SubmissionOutcome::Rejected(account);
            }
        };

        account.last_sent = Instant::now();
        if let Err(err) = state.provider.submit(&signed).await {
            warn!(?err, nonce, ?kind, "Failed to submit transaction");
            LoaderCounters::record(&shared.counters.submit_failures);
            shared
                .metrics
                .update_submit_failures_metric(&err, &state.endpoint);
            return SubmissionOutcome::RetryLater(account);
        }
        debug!(hash = ?signed.hash, nonce, ?kind, "Transaction submitted");

        nonce = nonce.saturating_add(1);
        account.nonce = nonce;
        shared.workload.record_success(&mut account.workload, &action);
        shared.counters.record_sent(kind);
        shared
            .metrics
            .update_submitted_metric(kind.as_str(), &state.endpoint);
        last_hash = Some(signed.hash);
    }

    match last_hash {
        Some(hash) => SubmissionOutcome::Submitted(ReceiptTask {
            account,
            hash,
            first_sent,
            kind,
        }),
        None => SubmissionOutcome::RetryLater(account),
    }
}

fn sign_action(
    state: &WorkerState,
    account: &Account,
    action: &Action,
    nonce: u64,
) -> Result<SignedTx, LoaderError> {
    let shared = &state.shared;
    let tx = &shared.tx;
    let request = match action {
        Action::Transfer { to, .. } => TransactionRequest::new()
            .to(*to)
            .value(tx.transfer_value())
            .gas(tx.transfer_gas_limit),
        Action::Delegate { node } => {
            let data = shared.encoder.encode(&StakingOperation::Delegate {
                node: *node,
                amount: tx.delegate_amount(),
            })?;
            TransactionRequest::new()
                .to(shared.chain.staking_contract)
                .value(tx.contract_value())
                .gas(tx.contract_gas_limit)
                .data(data)
        }
        Action::WithdrawDelegate {
            node,
            staking_block,
        } => {
            let data = shared.encoder.encode(&StakingOperation::WithdrawDelegate {
                node: *node,
                staking_block: *staking_block,
                amount: tx.delegate_amount(),
            })?;
            TransactionRequest::new()
                .to(shared.chain.staking_contract)
                .value(tx.contract_value())
                .gas(tx.contract_gas_limit)
                .data(data)
        }
    };
    let request = request
        .from(account.address())
        .nonce(nonce)
        .gas_price(tx.gas_price())
        .chain_id(shared.chain.chain_id);
    sign_request(account, request, nonce)
}

pub(crate) fn sign_request(
    account: &Account,
    request: TransactionRequest,
    nonce: u64,
) -> Result<SignedTx, LoaderError> {
    let typed: TypedTransaction = request.into();
    let signature = account.sign(&typed)?;
    let raw = typed.rlp_signed(&signature);
    let hash = H256::from(keccak256(&raw));
    Ok(SignedTx {
        raw,
        hash,
        from: account.address(),
        nonce,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use ethers_core::types::{Bytes, Transaction};

    use crate::account::TxKind;
    use crate::payload::EncodesPayload;
    use crate::tests::test_utils::{
        test_account, test_accounts, worker_state, worker_state_with_workload, MockProvider,
    };
    use crate::workload::{Destinations, Phase, WorkloadPolicy};

    use super::*;

    fn recording_provider(chain_nonce: u64) -> (MockProvider, Arc<Mutex<Vec<SignedTx>>>) {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut provider = MockProvider::new();
        provider
            .expect_next_nonce()
            .returning(move |_| Ok(chain_nonce));
        let sink = submitted.clone();
        provider.expect_submit().returning(move |tx| {
            sink.lock().unwrap().push(tx.clone());
            Ok(())
        });
        (provider, submitted)
    }

    #[tokio::test]
    async fn test_burst_uses_consecutive_nonces_and_keeps_last_hash() {
        let (provider, submitted) = recording_provider(40);
        let state = worker_state_with_workload(
            provider,
            WorkloadPolicy::Transfer {
                burst: 5,
                destinations: Destinations::Adjacent,
            },
        );

        let outcome = dispatch(&state, test_account(0)).await;
        let SubmissionOutcome::Submitted(task) = outcome else {
            panic!("expected submission, got {outcome:?}");
        };

        let submitted = submitted.lock().unwrap();
        let nonces: Vec<_> = submitted.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![40, 41, 42, 43, 44]);
        assert_eq!(task.hash, submitted[4].hash);
        assert_eq!(task.kind, TxKind::Transfer);
        assert_eq!(task.account.nonce(), 45);
        assert!(submitted.iter().all(|tx| tx.from == test_account(0).address()));
        assert_eq!(
            LoaderCounters::total(&state.shared.counters.total_submitted),
            5
        );
    }

    #[tokio::test]
    async fn test_transfer_goes_to_adjacent_account() {
        let (provider, submitted) = recording_provider(0);
        let state = worker_state_with_workload(
            provider,
            WorkloadPolicy::Transfer {
                burst: 1,
                destinations: Destinations::Adjacent,
            },
        );
        dispatch(&state, test_account(1)).await;

        let submitted = submitted.lock().unwrap();
        let decoded = rlp::decode::<Transaction>(&submitted[0].raw).unwrap();
        assert_eq!(decoded.to, Some(test_accounts(4)[2].address()));
        assert_eq!(decoded.nonce, 0.into());
        assert_eq!(decoded.gas, 21_000.into());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_failure_records_attempt_and_retries_later() {
        let mut provider = MockProvider::new();
        provider.expect_next_nonce().returning(|_| Ok(3));
        provider
            .expect_submit()
            .times(1)
            .returning(|_| Err(LoaderError::TxSubmissionError("txpool is full".to_string())));
        let state = worker_state(provider, |_| {});

        let mut account = test_account(0);
        account.nonce = 3;
        tokio::time::advance(Duration::from_secs(5)).await;
        let outcome = dispatch(&state, account).await;
        let SubmissionOutcome::RetryLater(account) = outcome else {
            panic!("expected retry, got {outcome:?}");
        };
        assert_eq!(account.last_sent, Instant::now());
        assert_eq!(account.nonce(), 3);
        assert_eq!(
            LoaderCounters::total(&state.shared.counters.submit_failures),
            1
        );
        assert_eq!(
            LoaderCounters::total(&state.shared.counters.total_submitted),
            0
        );
    }

    #[tokio::test]
    async fn test_partial_burst_keeps_progress_of_accepted_transactions() {
        let mut provider = MockProvider::new();
        provider.expect_next_nonce().returning(|_| Ok(0));
        let mut calls = 0;
        provider.expect_submit().returning(move |_| {
            calls += 1;
            if calls <= 2 {
                Ok(())
            } else {
                Err(LoaderError::TxSubmissionError("rejected".to_string()))
            }
        });
        let state = worker_state_with_workload(
            provider,
            WorkloadPolicy::Phased {
                transfers_per_cycle: 10,
                burst: 4,
                destinations: Destinations::Adjacent,
            },
        );

        let outcome = dispatch(&state, test_account(0)).await;
        let SubmissionOutcome::RetryLater(account) = outcome else {
            panic!("expected retry, got {outcome:?}");
        };
        assert_eq!(account.workload().transfers, 2);
        assert_eq!(account.workload().phase, Phase::Transfer);
        assert_eq!(account.nonce(), 2);
    }

    #[derive(Debug)]
    struct FailingEncoder;

    impl EncodesPayload for FailingEncoder {
        fn encode(&self, _: &StakingOperation) -> Result<Bytes, LoaderError> {
            Err(LoaderError::PayloadEncodingError("unsupported".to_string()))
        }
    }

    #[tokio::test]
    async fn test_encoding_failure_rejects_without_submitting() {
        let mut provider = MockProvider::new();
        provider.expect_next_nonce().returning(|_| Ok(0));
        provider.expect_submit().never();
        let state = crate::tests::test_utils::worker_state_with(
            provider,
            WorkloadPolicy::Delegate,
            Arc::new(FailingEncoder),
            |_| {},
        );

        let outcome = dispatch(&state, test_account(0)).await;
        assert!(matches!(outcome, SubmissionOutcome::Rejected(_)));
        assert_eq!(
            LoaderCounters::total(&state.shared.counters.sign_failures),
            1
        );
    }

    #[tokio::test]
    async fn test_delegation_targets_staking_contract() {
        let (provider, submitted) = recording_provider(8);
        let state = worker_state_with_workload(provider, WorkloadPolicy::Delegate);

        let outcome = dispatch(&state, test_account(0)).await;
        let SubmissionOutcome::Submitted(task) = outcome else {
            panic!("expected submission, got {outcome:?}");
        };
        assert_eq!(task.kind, TxKind::Delegate);

        let submitted = submitted.lock().unwrap();
        let decoded = rlp::decode::<Transaction>(&submitted[0].raw).unwrap();
        assert_eq!(decoded.to, Some(state.shared.chain.staking_contract));
        assert_eq!(decoded.gas, 103_496.into());
        assert!(!decoded.input.is_empty());
    }
}
