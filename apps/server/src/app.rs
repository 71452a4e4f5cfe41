//! Application orchestrator: wires the store, the WebSocket server and the
//! expiry sweep together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chunkup_server::{ServerError, StoreHandler, UploadServer};
use chunkup_store::ChunkStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("SIGINT received, shutting down"),
            Err(e) => tracing::error!("failed to listen for Ctrl-C: {e}"),
        }
        signal.cancel();
    });

    serve(config, shutdown).await
}

/// Serves uploads until `shutdown` is cancelled or the server fails.
pub async fn serve(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.root)
        .await
        .with_context(|| format!("creating {}", config.root.display()))?;

    // -- Store --
    let store = Arc::new(ChunkStore::new(config.store_config()));

    // -- WS server --
    let server = UploadServer::new(
        config.server_config(),
        StoreHandler::new(Arc::clone(&store)),
    );
    let server_run = Arc::clone(&server);
    let mut server_task: JoinHandle<Result<(), ServerError>> =
        tokio::spawn(async move { server_run.run().await });

    let addr = tokio::select! {
        addr = wait_for_bind(&server) => addr,
        result = &mut server_task => return server_exit(result),
    };
    tracing::info!(%addr, root = %config.root.display(), "upload server ready");

    // -- Expiry sweep --
    let sweeper = config.sweep_interval().map(|every| {
        tokio::spawn(sweep_loop(Arc::clone(&store), every, shutdown.clone()))
    });

    // -- Main loop: wait for shutdown --
    let outcome = tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        result = &mut server_task => server_exit(result),
    };

    // -- Graceful shutdown --
    tracing::info!(connections = server.connection_count(), "stopping server");
    shutdown.cancel();
    server.shutdown();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    outcome
}

async fn wait_for_bind<H: chunkup_server::Handler>(server: &UploadServer<H>) -> SocketAddr {
    loop {
        if let Some(addr) = server.local_addr().await {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn server_exit(
    result: Result<Result<(), ServerError>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("upload server failed")),
        Err(e) => Err(anyhow::Error::new(e).context("upload server task panicked")),
    }
}

/// Periodically removes abandoned staging sets and merge leftovers.
async fn sweep_loop(store: Arc<ChunkStore>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match store.sweep_expired().await {
            Ok(report) if report.is_empty() => tracing::debug!("sweep found nothing to remove"),
            Ok(report) => tracing::info!(
                staging_removed = report.staging_removed,
                temporaries_removed = report.temporaries_removed,
                "expired uploads swept"
            ),
            Err(e) => tracing::warn!("sweep failed: {e}"),
        }
    }
}
