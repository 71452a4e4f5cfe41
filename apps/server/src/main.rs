//! chunkup upload server entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chunkup-server", version, about = "Resumable chunked upload server")]
struct Cli {
    /// Path to the TOML config file; created with defaults when absent.
    #[arg(short, long, default_value = "chunkup-server.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chunkup server");

    let config = config::Config::load(&cli.config)?;
    tracing::info!(
        path = %cli.config.display(),
        root = %config.root.display(),
        listen = %config.listen,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}
