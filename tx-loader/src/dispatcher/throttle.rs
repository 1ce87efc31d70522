use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::provider::LoaderProvider;

use super::metrics::LoaderMetrics;

/// Open/closed switch a worker checks before taking on more work.
#[derive(Clone, Debug)]
pub struct ThrottleGate {
    open: Arc<watch::Sender<bool>>,
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleGate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self {
            open: Arc::new(open),
        }
    }

    /// Returns whether the gate was open before.
    pub fn pause(&self) -> bool {
        self.set_open(false)
    }

    /// Returns whether the gate was closed before.
    pub fn resume(&self) -> bool {
        self.set_open(true)
    }

    fn set_open(&self, open: bool) -> bool {
        self.open.send_if_modified(|current| {
            let changed = *current != open;
            *current = open;
            changed
        })
    }

    pub fn is_paused(&self) -> bool {
        !*self.open.borrow()
    }

    pub async fn wait_until_open(&self) {
        self.wait_for(true).await
    }

    pub async fn wait_until_paused(&self) {
        self.wait_for(false).await
    }

    async fn wait_for(&self, open: bool) {
        let mut receiver = self.open.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = receiver.wait_for(|current| *current == open).await;
    }
}

/// Opens and closes one endpoint's gate depending on whether its node takes part in consensus.
pub struct ActivityDriver {
    pub provider: Arc<dyn LoaderProvider>,
    pub gate: ThrottleGate,
    pub poll_interval: Duration,
    pub metrics: LoaderMetrics,
    pub endpoint: String,
}

impl ActivityDriver {
    #[instrument(skip_all, name = "ActivityDriver::run", fields(endpoint = %self.endpoint))]
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let active = match self.provider.is_node_active().await {
                Ok(active) => active,
                Err(err) => {
                    warn!(?err, "Failed to query node activity, treating node as inactive");
                    false
                }
            };
            let changed = if active {
                self.gate.resume()
            } else {
                self.gate.pause()
            };
            if changed {
                info!(active, "Node activity changed");
            }
            self.metrics
                .update_endpoint_paused_metric(!active, &self.endpoint);
        }
    }
}
