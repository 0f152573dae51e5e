use anyhow::{Context, Result};
use iskonnect::cli;
use rustls::crypto::ring;

#[tokio::main]
async fn main() -> Result<()> {
    // sqlx, lettre and tonic all pull in rustls; pin one provider for the process.
    ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))
        .context("TLS crypto provider initialization failed")?;

    let action = cli::start()?;

    let result = action.execute().await;

    cli::telemetry::shutdown_tracer();

    result
}
