use std::net::SocketAddr;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use derive_new::new;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dispatcher::LoaderMetrics;

/// Serves the loader's Prometheus metrics on `/metrics`.
#[derive(new, Debug)]
pub struct MetricsServer {
    listen_port: u16,
    metrics: LoaderMetrics,
}

impl MetricsServer {
    /// Binds the listen port and serves in a background task. Returns the bound address.
    pub async fn run(self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(("0.0.0.0", self.listen_port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "Starting metrics server");

        let metrics = self.metrics;
        let app = Router::new().route("/metrics", get(move || gather_metrics(metrics)));
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!(?err, "Metrics server failed");
            }
        });
        Ok((addr, handle))
    }
}

async fn gather_metrics(metrics: LoaderMetrics) -> impl IntoResponse {
    debug!("Serving /metrics");
    match metrics.gather().map(String::from_utf8) {
        Ok(Ok(report)) => (StatusCode::OK, report),
        Ok(Err(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".into(),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to gather metrics".into(),
        ),
    }
}
