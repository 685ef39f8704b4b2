use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Filename carried no recognizable movie code. The leading phrase is
    /// load-bearing: the retry scheduler matches on it to permanently park
    /// rows that will never resolve no matter how many times they're retried.
    #[error("No movie code found in {0}")]
    NoMovieCode(String),

    /// Catalog search missed on every configured source.
    #[error("No metadata found for {0}")]
    NoMetadata(String),

    #[error("move failed for {path}: {source}")]
    MoveFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("item not indexed")]
    ItemNotIndexed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
