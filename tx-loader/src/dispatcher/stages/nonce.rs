use tracing::warn;

use crate::account::Account;
use crate::dispatcher::reporter::LoaderCounters;
use crate::dispatcher::WorkerState;
use crate::settings::NonceFallback;

/// Nonce for the account's next submission, or `None` if the submission should be retried
/// later.
pub(crate) async fn resolve_nonce(state: &WorkerState, account: &Account) -> Option<u64> {
    match state.provider.next_nonce(account.address()).await {
        Ok(nonce) => Some(nonce),
        Err(err) => {
            let fallback = state.shared.settings.nonce_fallback;
            warn!(
                ?err,
                account = ?account.address(),
                cached_nonce = account.nonce(),
                ?fallback,
                "Failed to query nonce"
            );
            LoaderCounters::record(&state.shared.counters.nonce_failures);
            state
                .shared
                .metrics
                .update_nonce_query_failures_metric(&state.endpoint);
            match fallback {
                NonceFallback::Cached => Some(account.nonce()),
                NonceFallback::Zero => Some(0),
                NonceFallback::Retry => None,
            }
        }
    }
}
