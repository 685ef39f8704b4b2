//! Promotes `error` rows whose backoff window has elapsed back to `pending`,
//! and quarantines rows that have exhausted their retry budget into the
//! configured error directory so they stop cluttering the watch directory.

use crate::queue::PgQueueStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct RetryScheduler {
    store: Arc<PgQueueStore>,
    max_retries: u32,
    error_dir: Option<std::path::PathBuf>,
}

impl RetryScheduler {
    pub fn new(store: Arc<PgQueueStore>, max_retries: u32, error_dir: Option<std::path::PathBuf>) -> Self {
        Self {
            store,
            max_retries,
            error_dir,
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("retry scheduler shutting down");
                        return;
                    }
                }
                _ = tokio::time::sleep(super::RETRY_POLL_INTERVAL) => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "retry scheduler tick failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> crate::error::Result<()> {
        let due = self.store.list_retryable_errors(self.max_retries).await?;
        for item in due {
            if item
                .last_error
                .as_deref()
                .is_some_and(|msg| msg.starts_with("No movie code"))
            {
                continue;
            }
            info!(id = %item.id, retry_count = item.retry_count, "promoting errored item for retry");
            self.store.reset_for_retry(item.id).await?;
        }

        if let Some(error_dir) = &self.error_dir {
            let exhausted = self.store.list_exhausted_errors(self.max_retries).await?;
            for item in exhausted {
                let source = item.path();
                if !source.exists() {
                    continue;
                }
                match quarantine(&source, error_dir) {
                    Ok(quarantined) => {
                        info!(id = %item.id, path = %quarantined.display(), "quarantined exhausted item");
                        self.store
                            .mark_quarantined(item.id, &quarantined.to_string_lossy())
                            .await?;
                    }
                    Err(err) => warn!(id = %item.id, error = %err, "failed to quarantine exhausted item"),
                }
            }
        }
        Ok(())
    }
}

fn quarantine(source: &Path, error_dir: &Path) -> crate::error::Result<std::path::PathBuf> {
    std::fs::create_dir_all(error_dir)?;
    let basename = source
        .file_name()
        .ok_or_else(|| crate::error::IngestError::InvalidInput(source.to_string_lossy().to_string()))?;
    crate::renamer::move_file(source, error_dir, &basename.to_string_lossy())
}
