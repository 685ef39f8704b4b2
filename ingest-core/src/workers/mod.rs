//! The three consumer loops that drain the work queue: the file processor
//! (rename + catalog lookup + move), the updater (media-server sync), and
//! the retry scheduler (promotes backed-off `error` rows back to `pending`).

pub mod file_processor;
pub mod retry;
pub mod updater;

use std::time::Duration;

/// Loops poll on a fixed interval rather than listening for a notification
/// channel, matching this codebase's queue-service polling cadence. Each
/// worker gets its own cadence: the file processor drains the watcher's
/// output quickly, the updater waits on a slower external indexing
/// process, and the retry scheduler only needs to notice backoff windows
/// elapsing.
pub const FILE_PROCESSOR_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const UPDATER_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const RETRY_POLL_INTERVAL: Duration = Duration::from_secs(30);
