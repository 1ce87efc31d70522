use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use derive_new::new;

use crate::chain::ChainContext;
use crate::payload::EncodesPayload;
use crate::provider::LoaderProvider;
use crate::settings::{EngineSettings, TxSettings};
use crate::workload::Workload;

pub use engine::{EngineComponents, EngineHandle, EngineReport, LoadEngine};
pub use metrics::LoaderMetrics;
pub use reporter::{LoaderCounters, RateSnapshot};

pub(crate) use stages::sign_request;
pub(crate) use stages::utils::call_until_success_or_nonretryable_error;

mod engine;
mod metrics;
mod reporter;
mod scheduler;
mod stages;
mod throttle;
mod worker;

/// Everything the workers of one engine share.
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub chain: ChainContext,
    pub settings: EngineSettings,
    pub tx: TxSettings,
    pub workload: Workload,
    pub encoder: Arc<dyn EncodesPayload>,
    pub counters: Arc<LoaderCounters>,
    pub metrics: LoaderMetrics,
    /// Cooldown after a confirmation, in milliseconds. Adjustable at runtime.
    pub send_interval_ms: Arc<AtomicU64>,
}

impl EngineShared {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.load(Ordering::Relaxed))
    }
}

/// State of one endpoint worker, handed to each stage.
#[derive(Clone, new)]
pub(crate) struct WorkerState {
    pub provider: Arc<dyn LoaderProvider>,
    pub shared: Arc<EngineShared>,
    pub endpoint: String,
}
