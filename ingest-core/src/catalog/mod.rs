//! Catalog client: searches an ordered list of named external sources for
//! metadata about a movie code, returning the first hit.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A metadata record as returned by the catalog, carrying at minimum the
/// fields the renamer and media-server writer depend on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub movie_code: String,
    pub title: String,
    /// Ordered actress list; the first entry is authoritative.
    pub actress: Vec<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    /// ISO `YYYY-MM-DD`.
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub genre: Vec<String>,
    #[serde(default)]
    pub maker: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub image_cropped: Option<String>,
    #[serde(default)]
    pub raw_image_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    moviecode: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

pub struct CatalogClient {
    client: Client,
    base_url: String,
    token: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds");

        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Search the given ordered sources for `code`, retrying the whole
    /// sequence once if every source misses on the first pass.
    pub async fn search(&self, code: &str, sources: &[String]) -> Option<CatalogRecord> {
        if let Some(record) = self.search_once(code, sources).await {
            return Some(record);
        }

        info!(%code, "catalog search missed on all sources, retrying sequence once");
        self.search_once(code, sources).await
    }

    async fn search_once(&self, code: &str, sources: &[String]) -> Option<CatalogRecord> {
        for source in sources {
            match self.search_source(source, code).await {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {
                    debug!(%source, %code, "catalog source miss");
                }
                Err(err) => {
                    warn!(%source, %code, error = %err, "catalog source request failed");
                }
            }
        }
        None
    }

    async fn search_source(
        &self,
        source: &str,
        code: &str,
    ) -> reqwest::Result<Option<CatalogRecord>> {
        let url = format!("{}/{}/search", self.base_url.trim_end_matches('/'), source);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&SearchRequest { moviecode: code })
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(status = %response.status(), %source, "catalog source returned non-2xx");
            return Ok(None);
        }

        let body: SearchResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(%source, error = %err, "catalog response failed to parse");
                return Ok(None);
            }
        };

        if !body.success {
            return Ok(None);
        }

        let data = match body.data {
            Some(value) if !value.is_null() => value,
            _ => return Ok(None),
        };

        match serde_json::from_value::<CatalogRecord>(data) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(%source, error = %err, "catalog data did not match expected shape");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_record_deserializes_minimal_shape() {
        let json = serde_json::json!({
            "movie_code": "SONE-760",
            "title": "The Same Commute Train As Always",
            "actress": ["Ruri Saijo"],
        });
        let record: CatalogRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.movie_code, "SONE-760");
        assert_eq!(record.actress, vec!["Ruri Saijo".to_string()]);
        assert!(record.genre.is_empty());
    }
}
