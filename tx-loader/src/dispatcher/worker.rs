use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::account::{Account, ReceiptTask};
use crate::chain::Endpoint;
use crate::error::LoaderError;
use crate::provider::{ConnectsProvider, LoaderProvider};

use super::scheduler::DelayedTasks;
use super::stages::utils::call_until_success_or_nonretryable_error;
use super::stages::{check_receipt, dispatch, ReceiptOutcome, SubmissionOutcome};
use super::throttle::{ActivityDriver, ThrottleGate};
use super::{EngineShared, WorkerState};

pub const TASK_NAME: &str = "EndpointWorker";

/// The intake queue every worker takes fresh and retried accounts from.
#[derive(Clone, Debug)]
pub(crate) struct Intake {
    pub sender: mpsc::Sender<Account>,
    receiver: Arc<Mutex<mpsc::Receiver<Account>>>,
}

impl Intake {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub async fn recv(&self) -> Option<Account> {
        self.receiver.lock().await.recv().await
    }

    pub fn len(&self) -> usize {
        self.sender
            .max_capacity()
            .saturating_sub(self.sender.capacity())
    }

    /// Removes every account still waiting
    pub async fn drain(&self) -> Vec<Account> {
        let mut receiver = self.receiver.lock().await;
        let mut accounts = Vec::new();
        while let Ok(account) = receiver.try_recv() {
            accounts.push(account);
        }
        accounts
    }
}

/// Work a worker holds back until a deadline.
#[derive(Debug)]
enum Deferred {
    /// Submit again
    Send(Account),
    /// Poll for the receipt again
    Poll(ReceiptTask),
}

impl Deferred {
    fn into_account(self) -> Account {
        match self {
            Deferred::Send(account) => account,
            Deferred::Poll(task) => task.account,
        }
    }
}

/// Waits `delay` before the next receipt poll, but never past the account's timeout.
fn poll_delay(task: &ReceiptTask, delay: Duration) -> Duration {
    delay.min(task.account.until_timeout(Instant::now()))
}

/// Drives accounts through submission and confirmation against one endpoint.
pub(crate) struct EndpointWorker {
    pub endpoint: Endpoint,
    pub shared: Arc<EngineShared>,
    pub connector: Arc<dyn ConnectsProvider>,
    pub intake: Intake,
    pub gate: ThrottleGate,
}

impl EndpointWorker {
    /// Runs until `cancel` fires. Returns the number of accounts still held at shutdown.
    pub async fn run(self, cancel: CancellationToken) -> usize {
        let label = self.endpoint.label();
        let Some(provider) = self.connect(&cancel).await else {
            return 0;
        };
        info!("Connected to endpoint");
        let state = WorkerState::new(provider.clone(), self.shared.clone(), label.clone());
        self.resolve_staking_blocks(&state).await;

        let driver = self.shared.settings.only_active.then(|| {
            let driver = ActivityDriver {
                provider,
                gate: self.gate.clone(),
                poll_interval: self.shared.settings.activity_poll(),
                metrics: self.shared.metrics.clone(),
                endpoint: label.clone(),
            };
            tokio::spawn(driver.run(cancel.child_token()))
        });

        let mut deferred = DelayedTasks::new(self.shared.settings.local_capacity);
        let mut abandoned: usize = 0;
        loop {
            self.update_metrics(&deferred, &label);
            if self.gate.is_paused() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.gate.wait_until_open() => continue,
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.gate.wait_until_paused() => {
                    debug!("Endpoint paused");
                }
                entry = deferred.next_due() => {
                    let dropped = match entry {
                        Deferred::Send(account) => {
                            self.submit(&state, &mut deferred, account, &cancel).await
                        }
                        Deferred::Poll(task) => {
                            self.poll(&state, &mut deferred, task, &cancel).await
                        }
                    };
                    abandoned = abandoned.saturating_add(dropped);
                }
                account = self.intake.recv() => {
                    let Some(account) = account else {
                        error!("Intake queue closed");
                        break;
                    };
                    let dropped = self.submit(&state, &mut deferred, account, &cancel).await;
                    abandoned = abandoned.saturating_add(dropped);
                }
            }
        }

        if !deferred.is_empty() {
            info!(count = deferred.len(), "Abandoning delayed tasks on shutdown");
        }
        let remaining = deferred.drain();
        if let Some(driver) = driver {
            if let Err(err) = driver.await {
                error!(?err, "Activity driver failed");
            }
        }
        abandoned.saturating_add(remaining.len())
    }

    async fn connect(&self, cancel: &CancellationToken) -> Option<Arc<dyn LoaderProvider>> {
        let result = call_until_success_or_nonretryable_error(
            || self.connector.connect(&self.endpoint),
            "Connecting to endpoint",
            self.shared.settings.reconnect_delay(),
            cancel,
        )
        .await;
        match result {
            Ok(provider) => Some(provider),
            Err(LoaderError::Cancelled) => None,
            Err(err) => {
                error!(?err, "Giving up on endpoint");
                None
            }
        }
    }

    async fn resolve_staking_blocks(&self, state: &WorkerState) {
        let shared = &self.shared;
        let validators = shared.workload.validators();
        if validators.is_empty() {
            return;
        }
        let caller = shared
            .workload
            .registry()
            .addresses()
            .first()
            .copied()
            .unwrap_or_default();
        validators
            .refresh(
                state.provider.as_ref(),
                shared.encoder.as_ref(),
                &shared.chain,
                caller,
                shared.tx.gas_price(),
            )
            .await;
    }

    /// Returns the number of accounts dropped because of shutdown.
    async fn submit(
        &self,
        state: &WorkerState,
        deferred: &mut DelayedTasks<Deferred>,
        account: Account,
        cancel: &CancellationToken,
    ) -> usize {
        let settings = &self.shared.settings;
        match dispatch(state, account).await {
            SubmissionOutcome::Submitted(task) => {
                let delay = poll_delay(&task, settings.settle_delay());
                self.defer(deferred, Deferred::Poll(task), delay, cancel)
                    .await
            }
            SubmissionOutcome::Rejected(account) => self.requeue(account, cancel).await,
            SubmissionOutcome::RetryLater(account) => {
                let delay = settings.submit_retry.delay(&account);
                self.defer(deferred, Deferred::Send(account), delay, cancel)
                    .await
            }
        }
    }

    async fn poll(
        &self,
        state: &WorkerState,
        deferred: &mut DelayedTasks<Deferred>,
        task: ReceiptTask,
        cancel: &CancellationToken,
    ) -> usize {
        match check_receipt(state, task).await {
            ReceiptOutcome::Pending(task) => {
                let delay = poll_delay(&task, self.shared.settings.receipt_poll());
                self.defer(deferred, Deferred::Poll(task), delay, cancel)
                    .await
            }
            ReceiptOutcome::TimedOut(account) => self.requeue(account, cancel).await,
            ReceiptOutcome::Confirmed(account) => {
                let delay = self.shared.send_interval();
                self.defer(deferred, Deferred::Send(account), delay, cancel)
                    .await
            }
        }
    }

    async fn defer(
        &self,
        deferred: &mut DelayedTasks<Deferred>,
        entry: Deferred,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> usize {
        match deferred.push(entry, delay) {
            Ok(()) => 0,
            Err(entry) => {
                warn!(
                    capacity = self.shared.settings.local_capacity,
                    "Delayed tasks full, handing account back to the intake"
                );
                self.requeue(entry.into_account(), cancel).await
            }
        }
    }

    /// Hands the account back to the shared intake. Returns 1 if it was dropped instead.
    async fn requeue(&self, account: Account, cancel: &CancellationToken) -> usize {
        tokio::select! {
            _ = cancel.cancelled() => 1,
            result = self.intake.sender.send(account) => match result {
                Ok(()) => 0,
                Err(err) => {
                    let err = LoaderError::from(err);
                    error!(?err, "Failed to hand account back to the intake");
                    1
                }
            }
        }
    }

    fn update_metrics(&self, deferred: &DelayedTasks<Deferred>, label: &str) {
        let metrics = &self.shared.metrics;
        metrics.update_liveness_metric(TASK_NAME, label);
        metrics.update_queue_lengths(self.intake.len(), deferred.len(), label);
        metrics.update_endpoint_paused_metric(self.gate.is_paused(), label);
    }
}
