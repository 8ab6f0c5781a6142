mod common;

use std::time::Duration;

use db_lifecycle::{lifecycle_counters, Lifecycle, LifecycleError, RetrySettings};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use serial_test::serial;

use common::{count_rows, notes_schema, sqlite_config, temp_sqlite};

fn insert_user(id: i64) -> Statement {
    Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "INSERT INTO users (id, email) VALUES (?, ?)",
        [id.into(), format!("user{id}@example.test").into()],
    )
}

#[tokio::test]
#[serial]
async fn test_locked_database_write_retries_until_the_lock_clears() {
    let file = temp_sqlite();

    let mut holder = Lifecycle::builder(sqlite_config(&file))
        .register(notes_schema)
        .build()
        .unwrap();
    let holder_ctx = holder.start().await.unwrap().unwrap();

    let mut cfg = sqlite_config(&file);
    cfg.session.busy_timeout = Duration::from_millis(20);
    cfg.retry = RetrySettings {
        max_attempts: 10,
        ..RetrySettings::default()
    };
    let mut writer = Lifecycle::builder(cfg).build().unwrap();
    let writer_ctx = writer.start().await.unwrap().unwrap();

    let lock = holder_ctx.db.acquire().await.unwrap();
    lock.execute_unprepared("BEGIN EXCLUSIVE").await.unwrap();

    let before = lifecycle_counters::snapshot();
    let db = writer_ctx.db.clone();
    let write = tokio::spawn(async move { db.execute(insert_user(1)).await });

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!write.is_finished(), "write must wait for the exclusive lock");
    lock.execute_unprepared("COMMIT").await.unwrap();
    drop(lock);

    write.await.unwrap().unwrap();
    let after = lifecycle_counters::snapshot();
    assert!(after.retry_attempts_total > before.retry_attempts_total);
    assert_eq!(after.retry_exhausted_total, before.retry_exhausted_total);
    assert_eq!(count_rows(&writer_ctx.db, "users").await, 1);

    writer.stop().await;
    holder.stop().await;
}

#[tokio::test]
#[serial]
async fn test_locked_database_write_fails_at_once_without_matchers() {
    let file = temp_sqlite();

    let mut holder = Lifecycle::builder(sqlite_config(&file))
        .register(notes_schema)
        .build()
        .unwrap();
    let holder_ctx = holder.start().await.unwrap().unwrap();

    let mut cfg = sqlite_config(&file);
    cfg.session.busy_timeout = Duration::from_millis(20);
    cfg.retry = RetrySettings {
        max_attempts: 10,
        matchers: Vec::new(),
    };
    let mut writer = Lifecycle::builder(cfg).build().unwrap();
    let writer_ctx = writer.start().await.unwrap().unwrap();

    let lock = holder_ctx.db.acquire().await.unwrap();
    lock.execute_unprepared("BEGIN EXCLUSIVE").await.unwrap();

    let before = lifecycle_counters::snapshot();
    let err = writer_ctx.db.execute(insert_user(2)).await.unwrap_err();
    let after = lifecycle_counters::snapshot();

    assert!(matches!(err, LifecycleError::Db(_)));
    assert!(err.to_string().contains("database is locked"), "{err}");
    assert_eq!(after.retry_attempts_total, before.retry_attempts_total);

    lock.execute_unprepared("ROLLBACK").await.unwrap();
    drop(lock);
    writer.stop().await;
    holder.stop().await;
}
