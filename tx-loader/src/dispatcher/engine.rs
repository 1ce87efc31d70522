use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::account::Account;
use crate::chain::{ChainContext, Endpoint};
use crate::error::LoaderError;
use crate::payload::EncodesPayload;
use crate::provider::ConnectsProvider;
use crate::settings::{EngineSettings, TxSettings};
use crate::workload::Workload;

use super::metrics::LoaderMetrics;
use super::reporter::{LoaderCounters, RateReporter};
use super::throttle::ThrottleGate;
use super::worker::{EndpointWorker, Intake};
use super::EngineShared;

/// Collaborators injected into the engine.
#[derive(Clone)]
pub struct EngineComponents {
    pub connector: Arc<dyn ConnectsProvider>,
    pub encoder: Arc<dyn EncodesPayload>,
    pub metrics: LoaderMetrics,
}

/// Runtime controls of a running engine.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    gates: Arc<Vec<ThrottleGate>>,
    send_interval_ms: Arc<AtomicU64>,
    counters: Arc<LoaderCounters>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Stops dispatching on every endpoint. In-flight work is finished but nothing new starts.
    pub fn pause(&self) {
        for gate in self.gates.iter() {
            gate.pause();
        }
        info!("Load engine paused");
    }

    pub fn resume(&self) {
        for gate in self.gates.iter() {
            gate.resume();
        }
        info!("Load engine resumed");
    }

    /// Whether every endpoint is paused
    pub fn is_paused(&self) -> bool {
        self.gates.iter().all(ThrottleGate::is_paused)
    }

    /// Sets the cooldown between a confirmation and the account's next submission.
    pub fn set_send_interval(&self, interval: Duration) {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.send_interval_ms.store(millis, Ordering::Relaxed);
        info!(?interval, "Send interval updated");
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.load(Ordering::Relaxed))
    }

    pub fn counters(&self) -> Arc<LoaderCounters> {
        self.counters.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Summary of a finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub duration: Duration,
    pub submitted: u64,
    pub confirmed: u64,
    pub submit_failures: u64,
    pub sign_failures: u64,
    pub nonce_failures: u64,
    pub receipt_timeouts: u64,
    pub application_failures: u64,
    /// Accounts that were waiting in a queue when the engine stopped
    pub abandoned_tasks: usize,
}

impl fmt::Display for EngineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.duration.as_secs_f64();
        let tps = if secs > 0.0 {
            self.submitted as f64 / secs
        } else {
            0.0
        };
        writeln!(f, "=== Load Report ===")?;
        writeln!(f, "Duration: {:?}", self.duration)?;
        writeln!(f, "Submitted: {}", self.submitted)?;
        writeln!(f, "Confirmed: {}", self.confirmed)?;
        writeln!(f, "Submit failures: {}", self.submit_failures)?;
        writeln!(f, "Sign failures: {}", self.sign_failures)?;
        writeln!(f, "Nonce query failures: {}", self.nonce_failures)?;
        writeln!(f, "Receipt timeouts: {}", self.receipt_timeouts)?;
        writeln!(f, "Application failures: {}", self.application_failures)?;
        writeln!(f, "Abandoned tasks: {}", self.abandoned_tasks)?;
        write!(f, "Avg TPS: {tps:.2}")
    }
}

/// Keeps every account cycling through submit, confirm and resubmit across all endpoints.
pub struct LoadEngine {
    shared: Arc<EngineShared>,
    accounts: Vec<Account>,
    endpoints: Vec<Endpoint>,
    connector: Arc<dyn ConnectsProvider>,
    handle: EngineHandle,
}

impl LoadEngine {
    pub fn new(
        chain: ChainContext,
        settings: EngineSettings,
        tx: TxSettings,
        accounts: Vec<Account>,
        endpoints: Vec<Endpoint>,
        workload: Workload,
        components: EngineComponents,
    ) -> Result<Self, LoaderError> {
        settings.validate(accounts.len(), endpoints.len())?;
        let registered = workload.registry().addresses();
        if registered.len() != accounts.len()
            || registered
                .iter()
                .zip(&accounts)
                .any(|(address, account)| *address != account.address())
        {
            return Err(LoaderError::ConfigError(
                "workload registry does not match the accounts".to_string(),
            ));
        }

        let send_interval_ms = Arc::new(AtomicU64::new(settings.send_interval_ms));
        let counters = Arc::new(LoaderCounters::default());
        let gates = endpoints.iter().map(|_| ThrottleGate::new()).collect();
        let handle = EngineHandle {
            gates: Arc::new(gates),
            send_interval_ms: send_interval_ms.clone(),
            counters: counters.clone(),
            cancel: CancellationToken::new(),
        };
        let shared = Arc::new(EngineShared {
            chain,
            settings,
            tx,
            workload,
            encoder: components.encoder,
            counters,
            metrics: components.metrics,
            send_interval_ms,
        });
        Ok(Self {
            shared,
            accounts,
            endpoints,
            connector: components.connector,
            handle,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Runs until [`EngineHandle::stop`] is called.
    pub async fn run(self) -> EngineReport {
        let start = Instant::now();
        let Self {
            shared,
            accounts,
            endpoints,
            connector,
            handle,
        } = self;
        let cancel = handle.cancel.clone();
        let intake = Intake::new(shared.settings.intake_capacity);
        info!(
            accounts = accounts.len(),
            endpoints = endpoints.len(),
            policy = ?shared.workload.policy(),
            "Starting load engine"
        );

        let workers: Vec<_> = endpoints
            .into_iter()
            .zip(handle.gates.iter().cloned())
            .map(|(endpoint, gate)| {
                let span = info_span!("EndpointWorker", endpoint = %endpoint.label());
                let worker = EndpointWorker {
                    endpoint,
                    shared: shared.clone(),
                    connector: connector.clone(),
                    intake: intake.clone(),
                    gate,
                };
                tokio::spawn(worker.run(cancel.clone()).instrument(span))
            })
            .collect();

        let reporter = RateReporter {
            counters: shared.counters.clone(),
            interval: shared.settings.report_interval(),
        };
        let reporter = tokio::spawn(reporter.run(cancel.clone()));

        let seeder = tokio::spawn(seed_intake(
            accounts,
            intake.sender.clone(),
            shared.settings.seed_stagger(),
            cancel.clone(),
        ));

        cancel.cancelled().await;
        info!("Stopping load engine");

        let mut abandoned = match seeder.await {
            Ok(unseeded) => unseeded,
            Err(err) => {
                error!(?err, "Seeding task failed");
                0
            }
        };
        for result in join_all(workers).await {
            match result {
                Ok(held) => abandoned = abandoned.saturating_add(held),
                Err(err) => error!(?err, "Endpoint worker failed"),
            }
        }
        abandoned = abandoned.saturating_add(intake.drain().await.len());
        if let Err(err) = reporter.await {
            error!(?err, "Rate reporter failed");
        }

        let counters = &shared.counters;
        let report = EngineReport {
            duration: start.elapsed(),
            submitted: LoaderCounters::total(&counters.total_submitted),
            confirmed: LoaderCounters::total(&counters.total_confirmed),
            submit_failures: LoaderCounters::total(&counters.submit_failures),
            sign_failures: LoaderCounters::total(&counters.sign_failures),
            nonce_failures: LoaderCounters::total(&counters.nonce_failures),
            receipt_timeouts: LoaderCounters::total(&counters.receipt_timeouts),
            application_failures: LoaderCounters::total(&counters.application_failures),
            abandoned_tasks: abandoned,
        };
        info!(?report, "Load engine stopped");
        report
    }
}

/// Puts every account into the intake, `stagger` apart. Returns how many were never seeded.
async fn seed_intake(
    accounts: Vec<Account>,
    intake: mpsc::Sender<Account>,
    stagger: Duration,
    cancel: CancellationToken,
) -> usize {
    let total = accounts.len();
    for (seeded, account) in accounts.into_iter().enumerate() {
        let remaining = total.saturating_sub(seeded);
        tokio::select! {
            _ = cancel.cancelled() => return remaining,
            result = intake.send(account) => {
                if result.is_err() {
                    return remaining;
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return remaining.saturating_sub(1),
            _ = sleep(stagger) => {}
        }
    }
    info!(count = total, "All accounts seeded");
    0
}

#[cfg(test)]
mod tests {
    use crate::tests::test_utils::test_accounts;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_seeding_is_staggered() {
        let (sender, mut receiver) = mpsc::channel(10);
        let start = Instant::now();
        let seeded = seed_intake(
            test_accounts(3),
            sender,
            Duration::from_millis(100),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(seeded, 0);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        for expected in test_accounts(3) {
            assert_eq!(receiver.recv().await.unwrap().address(), expected.address());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeding_stops_on_cancel() {
        let (sender, _receiver) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });
        let unseeded = seed_intake(
            test_accounts(4),
            sender,
            Duration::from_millis(100),
            cancel,
        )
        .await;
        assert_eq!(unseeded, 2);
    }

    #[test]
    fn test_report_renders_tps() {
        let report = EngineReport {
            duration: Duration::from_secs(10),
            submitted: 250,
            ..Default::default()
        };
        let rendered = report.to_string();
        assert!(rendered.contains("Submitted: 250"));
        assert!(rendered.contains("Avg TPS: 25.00"));
    }
}
