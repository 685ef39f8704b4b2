use clap::{Parser, Subcommand};
use ingest_core::queue::{PgQueueStore, Status};
use ingest_core::Config;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ingestctl", about = "Inspect and manage the ingest work queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a count of work items per state.
    Status,
    /// List work items in a given state.
    List {
        #[arg(long, value_enum)]
        status: StatusArg,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Reset a single errored item back to pending immediately.
    Retry { id: Uuid },
    /// Reset every retryable errored item back to pending immediately.
    RetryAll,
    /// Delete completed rows older than the given number of days.
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: i32,
    },
    /// Force a single item back to pending, bypassing the retry-count cap.
    Reset { id: Uuid },
}

#[derive(Clone, clap::ValueEnum)]
enum StatusArg {
    Pending,
    Processing,
    Moved,
    EmbyPending,
    Completed,
    Error,
}

impl From<StatusArg> for Status {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Status::Pending,
            StatusArg::Processing => Status::Processing,
            StatusArg::Moved => Status::Moved,
            StatusArg::EmbyPending => Status::EmbyPending,
            StatusArg::Completed => Status::Completed,
            StatusArg::Error => Status::Error,
        }
    }
}

const ALL_STATUSES: &[Status] = &[
    Status::Pending,
    Status::Processing,
    Status::Moved,
    Status::EmbyPending,
    Status::Completed,
    Status::Error,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max)
        .connect(&config.database_url)
        .await?;
    let store = PgQueueStore::new(pool);

    match cli.command {
        Command::Status => {
            for status in ALL_STATUSES {
                let count = store.count_by_status(*status).await?;
                println!("{}\t{}", status.as_str(), count);
            }
        }
        Command::List { status, limit } => {
            let items = store.list_by_status(status.into(), limit).await?;
            for item in items {
                println!(
                    "{}\t{}\t{}\tretries={}",
                    item.id,
                    item.status.as_str(),
                    item.file_path,
                    item.retry_count
                );
            }
        }
        Command::Retry { id } => {
            store.reset_for_retry(id).await?;
            println!("reset {} to pending", id);
        }
        Command::RetryAll => {
            let due = store.list_retryable_errors(config.max_retries).await?;
            let count = due.len();
            for item in due {
                store.reset_for_retry(item.id).await?;
            }
            println!("reset {} item(s) to pending", count);
        }
        Command::Cleanup { days } => {
            let deleted = store.cleanup_completed(days).await?;
            println!("deleted {} completed item(s) older than {} days", deleted, days);
        }
        Command::Reset { id } => {
            store.reset_for_retry(id).await?;
            println!("force-reset {} to pending", id);
        }
    }

    Ok(())
}
