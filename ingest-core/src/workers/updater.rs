//! Claims `moved` rows, triggers a media-server scan, waits for the item to
//! index, and writes metadata and images before marking the row completed.

use crate::catalog::CatalogRecord;
use crate::config::Config;
use crate::emby::{EmbyClient, ImageType};
use crate::queue::{PgQueueStore, WorkItem};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Updater {
    store: Arc<PgQueueStore>,
    emby: Arc<EmbyClient>,
    config: Arc<Config>,
    http: reqwest::Client,
}

impl Updater {
    pub fn new(store: Arc<PgQueueStore>, emby: Arc<EmbyClient>, config: Arc<Config>) -> Self {
        Self {
            store,
            emby,
            config,
            http: reqwest::Client::new(),
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("updater shutting down");
                        return;
                    }
                }
                _ = tokio::time::sleep(super::UPDATER_POLL_INTERVAL) => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "updater tick failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> crate::error::Result<()> {
        while let Some(item) = self.store.claim_moved().await? {
            if let Err(err) = self.process(&item).await {
                warn!(id = %item.id, path = %item.file_path, error = %err, "media-server sync failed");
                let retry_count = item.retry_count + 1;
                let next_retry_at = chrono::Utc::now()
                    + chrono::Duration::seconds(self.config.backoff_for(retry_count).as_secs() as i64);
                self.store.mark_error(item.id, &err.to_string(), next_retry_at).await?;
            }
        }
        Ok(())
    }

    async fn process(&self, item: &WorkItem) -> crate::error::Result<()> {
        let destination = item
            .destination_path
            .as_ref()
            .ok_or_else(|| crate::error::IngestError::Internal("moved row missing destination_path".into()))?;
        let destination_path = std::path::PathBuf::from(destination);

        self.emby
            .trigger_scan(&self.config.media_server.parent_folder_id)
            .await?;

        let indexed = self
            .emby
            .wait_for_index(&destination_path)
            .await?
            .ok_or(crate::error::IngestError::ItemNotIndexed)?;

        let basename = destination_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let metadata: Option<CatalogRecord> = item
            .metadata_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        self.emby
            .update_metadata(&indexed, &basename, metadata.as_ref())
            .await?;

        // Image upload is best-effort: a failed fetch or upload should not
        // block completion, since the metadata write already succeeded.
        if let Some(image_url) = item.image_url.as_ref() {
            if let Err(err) = self.upload_images(&indexed.id, image_url).await {
                warn!(id = %item.id, error = %err, "image upload step failed, continuing");
            }
        }

        self.store.mark_completed(item.id, &indexed.id).await?;
        info!(id = %item.id, item_id = %indexed.id, "media-server sync complete");
        Ok(())
    }

    /// Fetch the catalog's image once, derive a width-800 variant for the
    /// Backdrop and Banner slots, and push Primary=original, Backdrop=w800,
    /// Banner=w800.
    async fn upload_images(&self, item_id: &str, image_url: &str) -> crate::error::Result<()> {
        let (bytes, content_type) = self.download_image(image_url).await?;
        let w800_url = derive_w800_url(image_url);
        let (w800_bytes, w800_content_type) = if w800_url == image_url {
            (bytes.clone(), content_type.clone())
        } else {
            self.download_image(&w800_url).await?
        };

        self.emby
            .upload_image(item_id, ImageType::Primary, &bytes, &content_type, None)
            .await?;
        self.emby
            .upload_image(
                item_id,
                ImageType::Backdrop,
                &w800_bytes,
                &w800_content_type,
                Some(0),
            )
            .await?;
        self.emby
            .upload_image(item_id, ImageType::Banner, &w800_bytes, &w800_content_type, None)
            .await?;
        Ok(())
    }

    /// Download an image and validate it's actually an image: a non-empty
    /// body whose `Content-Type` starts with `image/`. Catalog image URLs
    /// occasionally 200 with an HTML error page instead of 404ing.
    async fn download_image(&self, url: &str) -> crate::error::Result<(Vec<u8>, String)> {
        let response = self.http.get(url).send().await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let body = response.bytes().await?.to_vec();

        if body.is_empty() {
            return Err(crate::error::IngestError::Internal(format!(
                "image download from {url} returned an empty body"
            )));
        }
        if !content_type.starts_with("image/") {
            return Err(crate::error::IngestError::Internal(format!(
                "image download from {url} returned content-type {content_type}"
            )));
        }

        Ok((body, content_type))
    }
}

/// Derive the width-800 thumbnail variant of a catalog image URL: set the
/// `w` query parameter to `800` and drop any `horizontal` parameter, which
/// otherwise selects a landscape crop unsuited to the Backdrop/Banner slots.
fn derive_w800_url(image_url: &str) -> String {
    let Ok(mut url) = reqwest::Url::parse(image_url) else {
        return image_url.to_string();
    };

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "horizontal" && k != "w")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &pairs {
            query.append_pair(k, v);
        }
        query.append_pair("w", "800");
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_w800_url_sets_width_and_drops_horizontal() {
        let derived = derive_w800_url("https://img.example.com/cover.jpg?horizontal=1&crop=1");
        assert!(derived.contains("w=800"));
        assert!(!derived.contains("horizontal"));
        assert!(derived.contains("crop=1"));
    }

    #[test]
    fn derive_w800_url_falls_back_to_original_on_unparseable_input() {
        assert_eq!(derive_w800_url("not a url"), "not a url");
    }
}
