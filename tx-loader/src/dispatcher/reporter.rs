use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::account::TxKind;

/// Counts of a single reporting interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateSnapshot {
    pub transfers: u64,
    pub delegates: u64,
    pub withdrawals: u64,
    pub confirmed: u64,
}

impl RateSnapshot {
    pub fn sent(&self) -> u64 {
        self.transfers
            .saturating_add(self.delegates)
            .saturating_add(self.withdrawals)
    }
}

/// Counters shared by every worker.
///
/// The interval counters are swapped to zero by the reporter on each tick, so an increment is
/// attributed to exactly one interval. The totals only grow.
#[derive(Debug, Default)]
pub struct LoaderCounters {
    transfers: AtomicU64,
    delegates: AtomicU64,
    withdrawals: AtomicU64,
    confirmed: AtomicU64,

    pub total_submitted: AtomicU64,
    pub total_confirmed: AtomicU64,
    pub submit_failures: AtomicU64,
    pub sign_failures: AtomicU64,
    pub nonce_failures: AtomicU64,
    pub receipt_timeouts: AtomicU64,
    pub application_failures: AtomicU64,
}

impl LoaderCounters {
    pub fn record_sent(&self, kind: TxKind) {
        let counter = match kind {
            TxKind::Transfer => &self.transfers,
            TxKind::Delegate => &self.delegates,
            TxKind::WithdrawDelegate => &self.withdrawals,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
        self.total_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads and resets the interval counters
    pub fn take(&self) -> RateSnapshot {
        RateSnapshot {
            transfers: self.transfers.swap(0, Ordering::Relaxed),
            delegates: self.delegates.swap(0, Ordering::Relaxed),
            withdrawals: self.withdrawals.swap(0, Ordering::Relaxed),
            confirmed: self.confirmed.swap(0, Ordering::Relaxed),
        }
    }

    pub fn total(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Logs the interval counters once per `interval`.
#[derive(Debug)]
pub struct RateReporter {
    pub counters: Arc<LoaderCounters>,
    pub interval: Duration,
}

impl RateReporter {
    #[instrument(skip_all, name = "RateReporter::run")]
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let snapshot = self.counters.take();
            info!(
                sent = snapshot.sent(),
                transfers = snapshot.transfers,
                delegates = snapshot.delegates,
                withdrawals = snapshot.withdrawals,
                receipts = snapshot.confirmed,
                "Load rate"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_take_resets_interval_counters_only() {
        let counters = LoaderCounters::default();
        counters.record_sent(TxKind::Transfer);
        counters.record_sent(TxKind::Transfer);
        counters.record_sent(TxKind::Delegate);
        counters.record_confirmed();

        let first = counters.take();
        assert_eq!(
            first,
            RateSnapshot {
                transfers: 2,
                delegates: 1,
                withdrawals: 0,
                confirmed: 1
            }
        );
        assert_eq!(counters.take(), RateSnapshot::default());
        assert_eq!(LoaderCounters::total(&counters.total_submitted), 3);
        assert_eq!(LoaderCounters::total(&counters.total_confirmed), 1);
    }

    #[test]
    fn test_snapshots_sum_to_recorded_events_under_contention() {
        const THREADS: usize = 4;
        const EVENTS: usize = 10_000;
        let counters = Arc::new(LoaderCounters::default());

        let writers: Vec<_> = (0..THREADS)
            .map(|_| {
                let counters = counters.clone();
                thread::spawn(move || {
                    for _ in 0..EVENTS {
                        counters.record_sent(TxKind::Transfer);
                    }
                })
            })
            .collect();

        let mut observed = 0;
        while writers.iter().any(|writer| !writer.is_finished()) {
            observed += counters.take().transfers;
        }
        for writer in writers {
            writer.join().unwrap();
        }
        observed += counters.take().transfers;

        assert_eq!(observed, (THREADS * EVENTS) as u64);
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_reporter_logs_each_interval() {
        let counters = Arc::new(LoaderCounters::default());
        let cancel = CancellationToken::new();
        let reporter = RateReporter {
            counters: counters.clone(),
            interval: Duration::from_secs(1),
        };
        let handle = tokio::spawn(reporter.run(cancel.clone()));

        counters.record_sent(TxKind::WithdrawDelegate);
        counters.record_confirmed();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counters.take(), RateSnapshot::default());
        assert!(logs_contain("Load rate"));
        assert!(logs_contain("withdrawals=1"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
