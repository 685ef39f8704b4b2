//! Media-server client: triggers library scans, waits for an item to be
//! indexed, and patches its metadata and images once it is.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Exponential backoff schedule (seconds) for waiting on the media server to
/// finish indexing a freshly-moved file.
const INDEX_WAIT_BACKOFF_SECS: &[u64] = &[2, 4, 8, 16, 32, 64];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbyItem {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Path")]
    pub path: Option<String>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(rename = "Items", default)]
    items: Vec<EmbyItem>,
}

/// Which image slot to upload. Upload order for a fully-populated catalog
/// record is Primary, then Backdrop, then Banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Primary,
    Backdrop,
    Banner,
}

impl ImageType {
    fn as_str(&self) -> &'static str {
        match self {
            ImageType::Primary => "Primary",
            ImageType::Backdrop => "Backdrop",
            ImageType::Banner => "Banner",
        }
    }
}

pub struct EmbyClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EmbyClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds");

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Ask the media server to rescan `parent_folder_id` for new content.
    pub async fn trigger_scan(&self, parent_folder_id: &str) -> crate::error::Result<()> {
        let url = self.url(&format!("/Items/{}/Refresh?Recursive=true", parent_folder_id));
        let response = self.client.post(&url).header("X-Emby-Token", &self.api_key).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "library refresh request returned non-2xx");
        }
        Ok(())
    }

    pub async fn get_item(&self, item_id: &str) -> crate::error::Result<Option<EmbyItem>> {
        let url = self.url(&format!("/Items/{}", item_id));
        let response = self.client.get(&url).header("X-Emby-Token", &self.api_key).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let item = response.json::<EmbyItem>().await?;
        Ok(Some(item))
    }

    /// Look up the indexed item whose on-disk `Path` matches `path` exactly.
    pub async fn find_by_path(&self, path: &Path) -> crate::error::Result<Option<EmbyItem>> {
        let target = path.to_string_lossy().to_string();
        let url = self.url("/Items?Recursive=true&Fields=Path");
        let response = self.client.get(&url).header("X-Emby-Token", &self.api_key).send().await?;
        let body: ItemsResponse = response.json().await?;

        Ok(body
            .items
            .into_iter()
            .find(|item| item.path.as_deref() == Some(target.as_str())))
    }

    /// Fall back to matching by basename when a path lookup misses, since
    /// some media-server installs normalize path separators or mount
    /// prefixes differently than the watcher sees them.
    pub async fn find_by_filename(&self, filename: &str) -> crate::error::Result<Option<EmbyItem>> {
        let url = self.url(&format!(
            "/Items?Recursive=true&Fields=Path&SearchTerm={}",
            urlencoding_lite(filename),
        ));
        let response = self.client.get(&url).header("X-Emby-Token", &self.api_key).send().await?;
        let body: ItemsResponse = response.json().await?;

        Ok(body.items.into_iter().find(|item| {
            item.path
                .as_deref()
                .and_then(|p| Path::new(p).file_name())
                .map(|n| n.to_string_lossy() == filename)
                .unwrap_or(false)
        }))
    }

    /// Poll for the item at `path` to appear in the index, using the
    /// exponential backoff schedule. Returns `None` if it never appears.
    pub async fn wait_for_index(&self, path: &Path) -> crate::error::Result<Option<EmbyItem>> {
        for (attempt, secs) in INDEX_WAIT_BACKOFF_SECS.iter().enumerate() {
            if let Some(item) = self.find_by_path(path).await? {
                return Ok(Some(item));
            }
            if let Some(filename) = path.file_name().and_then(|f| f.to_str()) {
                if let Some(item) = self.find_by_filename(filename).await? {
                    return Ok(Some(item));
                }
            }
            debug!(attempt, wait_secs = secs, "item not indexed yet, backing off");
            tokio::time::sleep(Duration::from_secs(*secs)).await;
        }
        Ok(None)
    }

    /// Patch an item's metadata: forces `LockData=true` so the media server
    /// never overwrites our values on its own refresh pass, derives
    /// `Name`/`SortName`/`ForcedSortName` from the on-disk basename, and (when
    /// a catalog record is available) fills in the full field set the
    /// catalog resolved — overview, original title, genre, studio, release
    /// date, and cast.
    pub async fn update_metadata(
        &self,
        item: &EmbyItem,
        basename: &str,
        metadata: Option<&crate::catalog::CatalogRecord>,
    ) -> crate::error::Result<()> {
        let current = self.get_item(&item.id).await?.ok_or(crate::error::IngestError::ItemNotIndexed)?;
        let mut payload = serde_json::to_value(&current).unwrap_or_else(|_| serde_json::json!({}));

        if let Value::Object(ref mut map) = payload {
            map.insert("LockData".into(), Value::Bool(true));
            map.insert("Name".into(), Value::String(basename.to_string()));
            map.insert("SortName".into(), Value::String(basename.to_string()));
            map.insert("ForcedSortName".into(), Value::String(basename.to_string()));
            map.insert(
                "PreferredMetadataLanguage".into(),
                Value::String("en".to_string()),
            );
            map.insert(
                "PreferredMetadataCountryCode".into(),
                Value::String("JP".to_string()),
            );

            if let Some(record) = metadata {
                if let Some(original_title) = record.original_title.as_ref() {
                    map.insert("OriginalTitle".into(), Value::String(original_title.clone()));
                }
                if let Some(overview) = record.overview.as_ref() {
                    map.insert("Overview".into(), Value::String(overview.clone()));
                }
                if let Some(release_date) = record.release_date.as_ref() {
                    if let Some(year) = release_date.split('-').next().and_then(|y| y.parse::<i64>().ok()) {
                        map.insert("ProductionYear".into(), Value::Number(year.into()));
                    }
                    map.insert("PremiereDate".into(), Value::String(release_date.clone()));
                }
                if !record.actress.is_empty() {
                    let people: Vec<Value> = record
                        .actress
                        .iter()
                        .map(|name| {
                            serde_json::json!({ "Name": name, "Type": "Actor" })
                        })
                        .collect();
                    map.insert("People".into(), Value::Array(people));
                }
                if !record.genre.is_empty() {
                    let genres: Vec<Value> = record
                        .genre
                        .iter()
                        .map(|g| serde_json::json!({ "Name": g }))
                        .collect();
                    map.insert("GenreItems".into(), Value::Array(genres));
                }
                if let Some(label) = record.label.as_ref() {
                    map.insert(
                        "Studios".into(),
                        Value::Array(vec![serde_json::json!({ "Name": label })]),
                    );
                }
            }
        }

        let url = self.url(&format!("/Items/{}", item.id));
        let response = self
            .client
            .post(&url)
            .header("X-Emby-Token", &self.api_key)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), item_id = %item.id, "metadata update returned non-2xx");
        }
        Ok(())
    }

    /// Upload an image of the given type. A 404 response accompanied by a
    /// non-empty body is treated as success — some media-server versions
    /// echo back the stored image bytes with a stale status code.
    pub async fn upload_image(
        &self,
        item_id: &str,
        image_type: ImageType,
        image_bytes: &[u8],
        content_type: &str,
        backdrop_index: Option<u8>,
    ) -> crate::error::Result<()> {
        let mut url = self.url(&format!(
            "/Items/{}/Images/{}",
            item_id,
            image_type.as_str()
        ));
        if let Some(index) = backdrop_index {
            url = format!("{}/{}", url, index);
        }
        url = format!("{}?api_key={}", url, self.api_key);

        if image_type == ImageType::Backdrop {
            self.delete_existing_backdrops(item_id).await?;
        }

        let response = self
            .client
            .post(&url)
            .header("Content-Type", content_type)
            .body(image_bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();

        if status.is_success() || (status == StatusCode::NOT_FOUND && !body.is_empty()) {
            info!(item_id, image_type = image_type.as_str(), "image uploaded");
            return Ok(());
        }

        warn!(%status, item_id, image_type = image_type.as_str(), "image upload failed");
        Ok(())
    }

    /// Clear backdrop indices 0-4 before uploading a fresh one, since the
    /// media server appends rather than replaces by default.
    async fn delete_existing_backdrops(&self, item_id: &str) -> crate::error::Result<()> {
        for index in 0..5u8 {
            let url = self.url(&format!(
                "/Items/{}/Images/Backdrop/{}?api_key={}",
                item_id, index, self.api_key
            ));
            let _ = self.client.delete(&url).send().await;
        }
        Ok(())
    }
}

fn urlencoding_lite(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles() {
        for pair in INDEX_WAIT_BACKOFF_SECS.windows(2) {
            assert_eq!(pair[1], pair[0] * 2);
        }
    }

    #[test]
    fn urlencoding_lite_escapes_spaces() {
        assert_eq!(urlencoding_lite("a b"), "a%20b");
        assert_eq!(urlencoding_lite("SONE-760"), "SONE-760");
    }
}
