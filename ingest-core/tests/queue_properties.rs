//! Integration tests against a real Postgres instance. Gated behind
//! `#[ignore]` since they require `DATABASE_URL` to point at a disposable
//! database; run with `cargo test -- --ignored`.

use ingest_core::queue::{PgQueueStore, Status};
use sqlx::postgres::PgPoolOptions;

async fn test_store() -> PgQueueStore {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");
    PgQueueStore::new(pool)
}

#[tokio::test]
#[ignore]
async fn adding_the_same_path_twice_is_idempotent() {
    let store = test_store().await;
    let path = format!("/watch/idempotent-{}.mp4", uuid::Uuid::new_v4());

    let first = store.add(&path).await.unwrap();
    let second = store.add(&path).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(store.count_by_status(Status::Pending).await.unwrap() >= 1, true);
}

#[tokio::test]
#[ignore]
async fn claim_pending_is_exclusive_under_concurrency() {
    let store = std::sync::Arc::new(test_store().await);
    let path = format!("/watch/exclusive-{}.mp4", uuid::Uuid::new_v4());
    store.add(&path).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.claim_pending().await.unwrap() }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one concurrent claimant should win the row");
}

#[tokio::test]
#[ignore]
async fn error_to_pending_to_processing_transition_closes() {
    let store = test_store().await;
    let path = format!("/watch/state-machine-{}.mp4", uuid::Uuid::new_v4());
    let item = store.add(&path).await.unwrap();

    let claimed = store.claim_pending().await.unwrap().unwrap();
    assert_eq!(claimed.id, item.id);
    assert_eq!(claimed.status, Status::Processing);

    let next_retry = chrono::Utc::now() - chrono::Duration::seconds(1);
    store.mark_error(item.id, "boom", next_retry).await.unwrap();

    let retryable = store.list_retryable_errors(3).await.unwrap();
    assert!(retryable.iter().any(|r| r.id == item.id));

    store.reset_for_retry(item.id).await.unwrap();
    let reset = store.get(item.id).await.unwrap();
    assert_eq!(reset.status, Status::Pending);

    let reclaimed = store.claim_pending().await.unwrap().unwrap();
    assert_eq!(reclaimed.id, item.id);
    assert_eq!(reclaimed.status, Status::Processing);
}
