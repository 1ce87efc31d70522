use std::fmt;
use std::time::UNIX_EPOCH;

use prometheus::{
    opts, register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, Encoder,
    IntCounterVec, IntGaugeVec, Registry,
};

use crate::error::LoaderError;

const METRICS_NAMESPACE: &str = "tx_loader";

fn namespaced(name: &str) -> String {
    format!("{}_{}", METRICS_NAMESPACE, name)
}

/// Metrics of the load engine, labelled by endpoint
#[derive(Clone)]
pub struct LoaderMetrics {
    registry: Registry,
    // with a label for the task, e.g. "EndpointWorker", "RateReporter"
    pub task_liveness: IntGaugeVec,

    pub intake_queue_length: IntGaugeVec,
    pub scheduled_tasks: IntGaugeVec,

    pub submitted_transactions: IntCounterVec,
    pub confirmed_transactions: IntCounterVec,

    pub submit_failures: IntCounterVec,
    pub sign_failures: IntCounterVec,
    pub nonce_query_failures: IntCounterVec,
    pub receipt_timeouts: IntCounterVec,
    // receipts whose logs carry a known failure message
    pub application_failures: IntCounterVec,

    pub endpoint_paused: IntGaugeVec,
}

impl fmt::Debug for LoaderMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderMetrics").finish_non_exhaustive()
    }
}

impl LoaderMetrics {
    pub fn new(registry: Registry) -> eyre::Result<Self> {
        let task_liveness = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced("task_liveness"),
                "The liveness of the engine tasks, expressed as a timestamp since the epoch",
            ),
            &["endpoint", "task",],
            registry.clone()
        )?;
        let intake_queue_length = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced("intake_queue_length"),
                "The number of accounts waiting in the shared intake queue",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let scheduled_tasks = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced("scheduled_tasks"),
                "The number of delayed submissions and receipt polls held by a worker",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let submitted_transactions = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("submitted_transactions"),
                "The number of transactions accepted by a node",
            ),
            &["endpoint", "kind",],
            registry.clone()
        )?;
        let confirmed_transactions = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("confirmed_transactions"),
                "The number of receipts observed",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let submit_failures = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("submit_failures"),
                "The number of transactions rejected on submission",
            ),
            &["endpoint", "error"],
            registry.clone()
        )?;
        let sign_failures = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("sign_failures"),
                "The number of transactions that could not be encoded or signed",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let nonce_query_failures = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("nonce_query_failures"),
                "The number of failed nonce queries",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let receipt_timeouts = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("receipt_timeouts"),
                "The number of transactions that were not confirmed within the account timeout",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let application_failures = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("application_failures"),
                "The number of receipts reporting an application level failure",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        let endpoint_paused = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced("endpoint_paused"),
                "Whether dispatching to the endpoint is paused (1) or running (0)",
            ),
            &["endpoint",],
            registry.clone()
        )?;
        Ok(Self {
            registry: registry.clone(),
            task_liveness,
            intake_queue_length,
            scheduled_tasks,
            submitted_transactions,
            confirmed_transactions,
            submit_failures,
            sign_failures,
            nonce_query_failures,
            receipt_timeouts,
            application_failures,
            endpoint_paused,
        })
    }

    pub fn update_liveness_metric(&self, task: &str, endpoint: &str) {
        self.task_liveness.with_label_values(&[endpoint, task]).set(
            UNIX_EPOCH
                .elapsed()
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        );
    }

    pub fn update_queue_lengths(&self, intake: usize, scheduled: usize, endpoint: &str) {
        self.intake_queue_length
            .with_label_values(&[endpoint])
            .set(intake as i64);
        self.scheduled_tasks
            .with_label_values(&[endpoint])
            .set(scheduled as i64);
    }

    pub fn update_submitted_metric(&self, kind: &str, endpoint: &str) {
        self.submitted_transactions
            .with_label_values(&[endpoint, kind])
            .inc();
    }

    pub fn update_confirmed_metric(&self, endpoint: &str) {
        self.confirmed_transactions
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn update_submit_failures_metric(&self, error: &LoaderError, endpoint: &str) {
        self.submit_failures
            .with_label_values(&[endpoint, &error.to_metrics_label()])
            .inc();
    }

    pub fn update_sign_failures_metric(&self, endpoint: &str) {
        self.sign_failures.with_label_values(&[endpoint]).inc();
    }

    pub fn update_nonce_query_failures_metric(&self, endpoint: &str) {
        self.nonce_query_failures
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn update_receipt_timeouts_metric(&self, endpoint: &str) {
        self.receipt_timeouts.with_label_values(&[endpoint]).inc();
    }

    pub fn update_application_failures_metric(&self, endpoint: &str) {
        self.application_failures
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn update_endpoint_paused_metric(&self, paused: bool, endpoint: &str) {
        self.endpoint_paused
            .with_label_values(&[endpoint])
            .set(i64::from(paused));
    }

    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(64 * 1024);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }

    #[cfg(test)]
    pub fn dummy_instance() -> Self {
        let registry = Registry::new();
        let instance = Self::new(registry.clone());
        instance.unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_renders_namespaced_metrics() {
        let metrics = LoaderMetrics::dummy_instance();
        metrics.update_submitted_metric("transfer", "node-0");
        metrics.update_endpoint_paused_metric(true, "node-0");
        metrics.update_submit_failures_metric(
            &LoaderError::TxSubmissionError("txpool is full".to_string()),
            "node-0",
        );
        let rendered = String::from_utf8(metrics.gather().unwrap()).unwrap();
        assert!(rendered
            .contains(r#"tx_loader_submitted_transactions{endpoint="node-0",kind="transfer"} 1"#));
        assert!(rendered.contains(r#"tx_loader_endpoint_paused{endpoint="node-0"} 1"#));
        assert!(rendered.contains(
            r#"tx_loader_submit_failures{endpoint="node-0",error="TxSubmissionError"} 1"#
        ));
    }
}
