use ingest_core::{Config, Supervisor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        watch_dir = %config.watch_dir.display(),
        destination_dir = %config.destination_dir.display(),
        "starting ingest daemon"
    );

    let supervisor = Supervisor::new(config).await?;
    supervisor.run().await?;

    Ok(())
}
