use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::account::{Account, ReceiptTask};
use crate::dispatcher::reporter::LoaderCounters;
use crate::dispatcher::WorkerState;
use crate::provider::TxReceipt;

#[derive(Debug)]
pub(crate) enum ReceiptOutcome {
    /// Not mined yet and still within the account timeout; poll again later
    Pending(ReceiptTask),
    /// Not mined within the account timeout; resubmit through the shared intake
    TimedOut(Account),
    /// Mined; send again after the cooldown
    Confirmed(Account),
}

/// Polls once for the receipt of the task's transaction.
#[instrument(
    skip_all,
    name = "Receipt::check",
    fields(endpoint = %state.endpoint, account = ?task.account.address(), hash = ?task.hash)
)]
pub(crate) async fn check_receipt(state: &WorkerState, task: ReceiptTask) -> ReceiptOutcome {
    match state.provider.receipt(task.hash).await {
        Ok(Some(receipt)) => {
            let shared = &state.shared;
            shared.counters.record_confirmed();
            shared.metrics.update_confirmed_metric(&state.endpoint);
            debug!(
                kind = ?task.kind,
                status = ?receipt.status,
                latency = ?task.first_sent.elapsed(),
                "Transaction confirmed"
            );
            inspect_logs(state, &task, &receipt);
            ReceiptOutcome::Confirmed(task.account)
        }
        Ok(None) => still_pending(state, task),
        Err(err) => {
            debug!(?err, "Failed to query receipt");
            still_pending(state, task)
        }
    }
}

fn still_pending(state: &WorkerState, task: ReceiptTask) -> ReceiptOutcome {
    if !task.account.timed_out(Instant::now()) {
        return ReceiptOutcome::Pending(task);
    }
    warn!(
        kind = ?task.kind,
        waited = ?task.account.last_sent.elapsed(),
        "Transaction not confirmed in time, resubmitting"
    );
    LoaderCounters::record(&state.shared.counters.receipt_timeouts);
    state
        .shared
        .metrics
        .update_receipt_timeouts_metric(&state.endpoint);
    ReceiptOutcome::TimedOut(task.account)
}

/// Reports receipts whose first log carries a known failure message. The account keeps going.
fn inspect_logs(state: &WorkerState, task: &ReceiptTask, receipt: &TxReceipt) {
    let Some(message) = receipt.first_log_message() else {
        return;
    };
    let markers = &state.shared.settings.failure_markers;
    if markers.iter().any(|marker| message.contains(marker.as_str())) {
        warn!(kind = ?task.kind, %message, "Transaction failed on chain");
        LoaderCounters::record(&state.shared.counters.application_failures);
        state
            .shared
            .metrics
            .update_application_failures_metric(&state.endpoint);
    }
}
