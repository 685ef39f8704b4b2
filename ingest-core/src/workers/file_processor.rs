//! Claims `pending` rows, resolves catalog metadata, composes the
//! destination filename, and moves the file into the library.

use crate::config::Config;
use crate::queue::{PgQueueStore, WorkItem};
use crate::{catalog::CatalogClient, parser, renamer};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct FileProcessor {
    store: Arc<PgQueueStore>,
    catalog: Arc<CatalogClient>,
    config: Arc<Config>,
}

impl FileProcessor {
    pub fn new(store: Arc<PgQueueStore>, catalog: Arc<CatalogClient>, config: Arc<Config>) -> Self {
        Self { store, catalog, config }
    }

    /// Run until `shutdown` resolves, polling for claimable rows in between.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("file processor shutting down");
                        return;
                    }
                }
                _ = tokio::time::sleep(super::FILE_PROCESSOR_POLL_INTERVAL) => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "file processor tick failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> crate::error::Result<()> {
        while let Some(item) = self.store.claim_pending().await? {
            if let Err(err) = self.process(&item).await {
                warn!(id = %item.id, path = %item.file_path, error = %err, "processing failed");
                let retry_count = item.retry_count + 1;
                let next_retry_at = chrono::Utc::now()
                    + chrono::Duration::seconds(self.config.backoff_for(retry_count).as_secs() as i64);
                self.store.mark_error(item.id, &err.to_string(), next_retry_at).await?;
            }
        }
        Ok(())
    }

    async fn process(&self, item: &WorkItem) -> crate::error::Result<()> {
        let path = item.path();

        // A claim that already carries a destination means a prior attempt
        // moved the file but crashed before the row advanced to `moved` —
        // re-running the catalog lookup and move would double-move a file
        // that already sits at its destination.
        if let Some(destination) = item.destination_path.as_ref() {
            self.store.set_destination_path(item.id, destination).await?;
            info!(id = %item.id, destination, "row already moved, skipping to moved");
            return Ok(());
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| crate::error::IngestError::InvalidInput(item.file_path.clone()))?;

        let code = parser::extract_code(filename)
            .ok_or_else(|| crate::error::IngestError::NoMovieCode(filename.to_string()))?;
        self.store.set_movie_code(item.id, &code).await?;

        let record = self
            .catalog
            .search(&code, &self.config.catalog.search_order)
            .await
            .ok_or_else(|| crate::error::IngestError::NoMetadata(code.clone()))?;

        let subtitle = parser::detect_subtitle(filename);
        let actress = record.actress.first().cloned().unwrap_or_else(|| "Unknown".to_string());
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        if let Some(image_url) = record.image_cropped.as_ref().or(record.raw_image_url.as_ref()) {
            self.store.set_image_url(item.id, image_url).await?;
        }

        let metadata_json = serde_json::to_string(&record)?;
        self.store
            .set_metadata(item.id, &metadata_json, &actress, &subtitle)
            .await?;

        let basename = renamer::compose_filename(&actress, &subtitle, &code, &record.title, &ext);
        let actress_dir = renamer::locate_actress_dir(&self.config.destination_dir, &actress)?;
        let destination = renamer::move_file(&path, &actress_dir, &basename)?;

        self.store
            .set_destination_path(item.id, &destination.to_string_lossy())
            .await?;

        info!(id = %item.id, destination = %destination.display(), "file moved into library");
        Ok(())
    }
}
