//! Keeps a fixed set of accounts continuously submitting transactions to a chain's RPC nodes.

#![forbid(unsafe_code)]

use std::sync::Arc;

use eyre::{eyre, Result, WrapErr};
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tx_loader::server::MetricsServer;
use tx_loader::{
    load_settings, register_stake, wait_for_block, Account, ConnectsProvider, EngineComponents,
    EthersConnector, LoadEngine, LoaderError, LoaderMetrics, RlpPayloadEncoder,
};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // Logging is not initialised at this point, so, using `println!`
    println!("Transaction loader starting up...");

    let settings = load_settings()?;
    settings.tracing.start_tracing()?;

    let metrics = LoaderMetrics::new(Registry::new())?;
    if let Some(port) = settings.metrics_port {
        MetricsServer::new(port, metrics.clone())
            .run()
            .await
            .wrap_err("Failed to start metrics server")?;
    }

    let accounts = settings.load_accounts()?;
    let endpoints = settings.load_endpoints()?;
    let workload = settings.build_workload(&accounts)?;
    info!(
        accounts = accounts.len(),
        endpoints = endpoints.len(),
        "Loaded accounts and endpoints"
    );

    let connector: Arc<dyn ConnectsProvider> = Arc::new(EthersConnector);
    let encoder = Arc::new(RlpPayloadEncoder);
    let first_endpoint = endpoints
        .first()
        .ok_or_else(|| eyre!("No endpoints configured"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    if let Some(block) = settings.ready_block {
        match wait_for_block(connector.as_ref(), first_endpoint, block, &shutdown).await {
            Err(LoaderError::Cancelled) => return Ok(()),
            result => result?,
        };
    }

    if let Some(staking) = &settings.staking {
        let account = Account::from_private_key(
            0,
            &staking.private_key,
            std::time::Duration::from_millis(settings.account_timeout_ms),
        )?;
        let provider = connector.connect(first_endpoint).await?;
        register_stake(
            provider.as_ref(),
            encoder.as_ref(),
            &settings.chain,
            &settings.tx,
            &account,
            staking.registration.clone(),
        )
        .await?;
    }

    let engine = LoadEngine::new(
        settings.chain.clone(),
        settings.engine.clone(),
        settings.tx.clone(),
        accounts,
        endpoints,
        workload,
        EngineComponents {
            connector,
            encoder,
            metrics,
        },
    )?;
    let handle = engine.handle();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        handle.stop();
    });

    let report = engine.run().await;
    println!("{report}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(?err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
