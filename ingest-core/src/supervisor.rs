//! Wires the watcher and the three worker loops together, runs pending
//! migrations, and drains in-flight work on shutdown.

use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::emby::EmbyClient;
use crate::queue::PgQueueStore;
use crate::watch::StabilityChecker;
use crate::workers::{file_processor::FileProcessor, retry::RetryScheduler, updater::Updater};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Supervisor {
    store: Arc<PgQueueStore>,
    config: Arc<Config>,
    catalog: Arc<CatalogClient>,
    emby: Arc<EmbyClient>,
}

impl Supervisor {
    pub async fn new(config: Config) -> crate::error::Result<Self> {
        config.ensure_directories()?;

        let pool = PgPoolOptions::new()
            .min_connections(config.db_pool_min)
            .max_connections(config.db_pool_max)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let store = Arc::new(PgQueueStore::new(pool));
        let catalog = Arc::new(CatalogClient::new(
            config.catalog.base_url.clone(),
            config.catalog.token.clone(),
        ));
        let emby = Arc::new(EmbyClient::new(
            config.media_server.base_url.clone(),
            config.media_server.api_key.clone(),
        ));

        Ok(Self {
            store,
            config: Arc::new(config),
            catalog,
            emby,
        })
    }

    /// Start the watcher and worker loops, and block until a shutdown
    /// signal (SIGINT/SIGTERM, or the process's Ctrl-C handler) arrives.
    /// Every loop is given the shutdown signal and polled to completion
    /// before returning, so an in-flight file move or media-server write
    /// is never torn down mid-step.
    pub async fn run(&self) -> crate::error::Result<()> {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let mut checker = StabilityChecker::new(self.store.clone(), self.config.clone());
        let watcher_rx = shutdown_rx.clone();
        let watcher_handle = tokio::spawn(async move { checker.run(watcher_rx).await });

        let processor = FileProcessor::new(self.store.clone(), self.catalog.clone(), self.config.clone());
        let processor_rx = shutdown_rx.clone();
        let processor_handle = tokio::spawn(async move { processor.run(processor_rx).await });

        let updater = Updater::new(self.store.clone(), self.emby.clone(), self.config.clone());
        let updater_rx = shutdown_rx.clone();
        let updater_handle = tokio::spawn(async move { updater.run(updater_rx).await });

        let retry = RetryScheduler::new(
            self.store.clone(),
            self.config.max_retries,
            self.config.error_dir.clone(),
        );
        let retry_rx = shutdown_rx.clone();
        let retry_handle = tokio::spawn(async move { retry.run(retry_rx).await });

        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining workers");
        let _ = shutdown_tx.send(true);

        let _ = tokio::join!(watcher_handle, processor_handle, updater_handle, retry_handle);
        info!("all workers drained, exiting");
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
