//! Library for the media ingestion pipeline: watches a directory for newly
//! arrived video files, resolves their metadata against an external
//! catalog, renames and relocates them into a library tree, and syncs the
//! result into a media server — all driven by a durable Postgres-backed
//! queue so the daemon can crash and resume without losing or
//! double-processing a file.

pub mod catalog;
pub mod config;
pub mod emby;
pub mod error;
pub mod parser;
pub mod queue;
pub mod renamer;
pub mod supervisor;
pub mod watch;
pub mod workers;

pub use config::Config;
pub use error::{IngestError, Result};
pub use supervisor::Supervisor;
