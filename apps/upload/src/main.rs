//! chunkup upload client entry point.

mod bridge;
mod report;

use std::path::PathBuf;

use anyhow::Context;
use chunkup_protocol::constants::MAX_CHUNK_SIZE_MB;
use chunkup_uploader::{UploadConfig, UploadOrchestrator};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::bridge::WsConnection;

#[derive(Parser)]
#[command(name = "chunkup-upload", version, about = "Upload a file to a chunkup server")]
struct Cli {
    /// File to upload.
    file: PathBuf,

    /// Server WebSocket URL, e.g. ws://127.0.0.1:9400.
    #[arg(short, long)]
    server: String,

    /// Chunk size in MiB.
    #[arg(
        long,
        default_value_t = 4,
        value_parser = clap::value_parser!(u64).range(1..=MAX_CHUNK_SIZE_MB)
    )]
    chunk_size_mb: u64,

    /// Chunk uploads kept in flight.
    #[arg(long, default_value_t = chunkup_uploader::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Extra attempts of the whole upload after a failure.
    #[arg(long, default_value_t = 0)]
    retries: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    let address = rt.block_on(run(cli))?;
    println!("{address}");
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    anyhow::ensure!(
        cli.file.is_file(),
        "{} is not a readable file",
        cli.file.display()
    );

    let config = UploadConfig::new(&cli.file)
        .with_chunk_size((cli.chunk_size_mb as usize) * 1024 * 1024)
        .with_concurrency(cli.concurrency.max(1));

    let conn = WsConnection::connect(&cli.server)
        .await
        .with_context(|| format!("connecting to {}", cli.server))?;

    let mut orchestrator = UploadOrchestrator::new().with_retries(cli.retries);
    let events = orchestrator
        .take_events()
        .context("event receiver already taken")?;
    let reporter = tokio::spawn(report::log_events(events));

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling upload");
            cancel.cancel();
        }
    });

    let result = orchestrator.upload(&config, &conn).await;
    conn.close().await;
    drop(orchestrator);
    let _ = reporter.await;

    let outcome = result.with_context(|| format!("uploading {}", cli.file.display()))?;
    Ok(outcome.address)
}
