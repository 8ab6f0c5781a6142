#![allow(dead_code)]

use std::time::Duration;

use db_lifecycle::{DbConfig, DbHandle, PoolBounds, SchemaModel};
use sea_orm::sea_query::{Alias, ColumnDef, ForeignKey, Index, Table};
use sea_orm::{DatabaseBackend, Statement};
use test_support::sqlite::TempSqlite;

#[ctor::ctor]
fn init_logging() {
    test_support::logging::init();
}

pub fn temp_sqlite() -> TempSqlite {
    TempSqlite::new("db-lifecycle").expect("create temp dir")
}

pub fn sqlite_config(file: &TempSqlite) -> DbConfig {
    DbConfig {
        pool: PoolBounds {
            max: 3,
            acquire_timeout: Duration::from_secs(5),
            ..PoolBounds::default()
        },
        ..DbConfig::sqlite(file.path_str())
    }
}

/// `users`, `notes` (FK to users) and an index on `notes.user_id`.
pub fn notes_schema(_db: &DbHandle, dm: &mut SchemaModel) {
    dm.define_table(
        "users",
        Table::create()
            .col(
                ColumnDef::new(Alias::new("id"))
                    .integer()
                    .not_null()
                    .primary_key(),
            )
            .col(ColumnDef::new(Alias::new("email")).string().not_null())
            .to_owned(),
    );
    dm.define_table(
        "notes",
        Table::create()
            .col(
                ColumnDef::new(Alias::new("id"))
                    .integer()
                    .not_null()
                    .primary_key(),
            )
            .col(ColumnDef::new(Alias::new("user_id")).integer().not_null())
            .col(ColumnDef::new(Alias::new("body")).text().not_null())
            .foreign_key(
                ForeignKey::create()
                    .name("fk_notes_user")
                    .from(Alias::new("notes"), Alias::new("user_id"))
                    .to(Alias::new("users"), Alias::new("id")),
            )
            .to_owned(),
    );
    dm.define_index(
        "idx_notes_user_id",
        "notes",
        Index::create().col(Alias::new("user_id")).to_owned(),
    );
}

pub async fn seed_user(db: &DbHandle, id: i64, email: &str) {
    db.execute(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "INSERT INTO users (id, email) VALUES (?, ?)",
        [id.into(), email.into()],
    ))
    .await
    .expect("insert user");
}

pub async fn count_rows(db: &DbHandle, table: &str) -> i64 {
    let row = db
        .query_one(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!("SELECT COUNT(*) AS n FROM \"{table}\""),
        ))
        .await
        .expect("count query")
        .expect("count row");
    row.try_get::<i64>("", "n").expect("count column")
}

pub async fn table_exists(db: &DbHandle, name: &str) -> bool {
    catalog_has(db, "table", name).await
}

pub async fn index_exists(db: &DbHandle, name: &str) -> bool {
    catalog_has(db, "index", name).await
}

async fn catalog_has(db: &DbHandle, kind: &str, name: &str) -> bool {
    let rows = db
        .query_all(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT name FROM sqlite_master WHERE type = ? AND name = ?",
            [kind.into(), name.into()],
        ))
        .await
        .expect("catalog query");
    !rows.is_empty()
}
