//! Point ledger node binary

use anyhow::Context;
use point_ledger::{Config, PointService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting point ledger node");

    // Load configuration
    let config = match std::env::var("POINT_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => Config::from_env().context("loading config from environment")?,
    };

    let service = PointService::open(&config).context("opening point service")?;
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        max_balance = service.max_balance(),
        "Point service ready"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!(
        active_keys = service.gate().active_keys(),
        "Shutting down point ledger node"
    );
    println!("{}", service.metrics().gather_text()?);
    Ok(())
}
