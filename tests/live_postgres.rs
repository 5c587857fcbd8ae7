//! Live tests against a running Postgres.
//!
//! - Marked `#[ignore]`; run with `DATABASE_URL=postgres://... cargo test -- --ignored`.
//! - Each test works in its own table so runs do not interfere.

use std::sync::Arc;

use scopekit::session::{self, SessionError, SessionRouter, Transactional};
use scopekit::store::{BackingStore, PgStore, PgStoreConnection, StoreError};
use sqlx::{Row, query};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, thiserror::Error)]
enum LiveError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("rejected")]
    Rejected,
}

fn database_url() -> TestResult<String> {
    Ok(std::env::var("DATABASE_URL")?)
}

async fn setup(table: &str) -> TestResult<(PgStore, Transactional)> {
    let store = PgStore::connect_lazy("writer", &database_url()?, 4)?;
    query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (id BIGINT PRIMARY KEY, name TEXT NOT NULL)"
    ))
    .execute(store.pool())
    .await?;
    query(&format!("TRUNCATE {table}"))
        .execute(store.pool())
        .await?;

    let writer: Arc<dyn BackingStore> = Arc::new(store.clone());
    let tx = Transactional::new(Arc::new(SessionRouter::single(writer)));
    Ok((store, tx))
}

async fn insert(table: &str, id: i64, name: &str) -> Result<(), LiveError> {
    let current = session::current()?;
    let mut connection = current.connection().await?;
    let pg = connection
        .downcast_mut::<PgStoreConnection>()
        .ok_or(LiveError::Rejected)?;
    query(&format!("INSERT INTO {table} (id, name) VALUES ($1, $2)"))
        .bind(id)
        .bind(name)
        .execute(pg.executor().await?)
        .await?;
    Ok(())
}

async fn count(store: &PgStore, table: &str) -> TestResult<i64> {
    let row = query(&format!("SELECT COUNT(*) AS n FROM {table}"))
        .fetch_one(store.pool())
        .await?;
    Ok(row.try_get("n")?)
}

#[tokio::test]
#[ignore]
async fn live_nested_writes_commit_together() -> TestResult<()> {
    let table = "scopekit_live_commit";
    let (store, tx) = setup(table).await?;

    let result: Result<(), LiveError> = tx
        .run(|| async {
            insert(table, 1, "ada").await?;
            tx.run(|| insert(table, 2, "grace")).await
        })
        .await;

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(count(&store, table).await?, 2);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_failure_rolls_back_every_write() -> TestResult<()> {
    let table = "scopekit_live_rollback";
    let (store, tx) = setup(table).await?;

    let result: Result<(), LiveError> = tx
        .run(|| async {
            insert(table, 1, "ada").await?;
            tx.run(|| async {
                insert(table, 2, "grace").await?;
                Err(LiveError::Rejected)
            })
            .await
        })
        .await;

    assert!(matches!(result, Err(LiveError::Rejected)));
    assert_eq!(count(&store, table).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_health_check_reaches_the_server() -> TestResult<()> {
    let store = PgStore::connect_lazy("writer", &database_url()?, 1)?;
    store.health_check().await?;
    Ok(())
}
