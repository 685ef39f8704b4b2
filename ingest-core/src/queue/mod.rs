//! The durable work queue: one row per ingested file, moving through a
//! fixed state machine from discovery to completion.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub use store::PgQueueStore;

/// Lifecycle state of a queued file. Stored as plain `TEXT` in Postgres
/// (hand-mapped through `as_str`/`FromStr`, not a Postgres enum type) so the
/// column stays legible from `psql` and the schema never needs an `ALTER
/// TYPE` migration to add a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Seen by the watcher, not yet confirmed stable.
    Pending,
    /// Stable and claimed by a file-processor worker.
    Processing,
    /// Renamed and relocated to the library; awaiting a media-server write.
    Moved,
    /// Media-server write issued; awaiting confirmation it indexed the item.
    EmbyPending,
    /// Fully processed.
    Completed,
    /// A step failed; eligible for a backoff-scheduled retry.
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Moved => "moved",
            Status::EmbyPending => "emby_pending",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }
}

impl std::str::FromStr for Status {
    type Err = crate::error::IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "moved" => Ok(Status::Moved),
            "emby_pending" => Ok(Status::EmbyPending),
            "completed" => Ok(Status::Completed),
            "error" => Ok(Status::Error),
            other => Err(crate::error::IngestError::Internal(format!(
                "unknown work item status: {other}"
            ))),
        }
    }
}

/// One row of the work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub file_path: String,
    pub status: Status,
    pub movie_code: Option<String>,
    pub destination_path: Option<String>,
    pub image_url: Option<String>,
    /// The catalog record fetched for this row, serialized as JSON.
    /// Persisted by the file processor so the updater worker can write the
    /// full metadata set without re-querying the catalog.
    pub metadata_json: Option<String>,
    pub actress: Option<String>,
    pub subtitle: Option<String>,
    /// Media-server item id, populated once the updater worker confirms
    /// the file has been indexed.
    pub emby_item_id: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.file_path)
    }
}
