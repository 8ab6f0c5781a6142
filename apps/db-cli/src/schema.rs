//! Schema the CLI contributes when it runs `sync`.

use db_lifecycle::{DbHandle, Dialect, SchemaModel, SchemaParticipant};
use sea_orm::sea_query::{Alias, ColumnDef, Index, Table};

pub struct OperatorSchema;

impl SchemaParticipant for OperatorSchema {
    fn name(&self) -> &str {
        "operator"
    }

    fn extend_schema(&self, db: &DbHandle, dm: &mut SchemaModel) {
        // jsonb where the backend has it
        let mut value = ColumnDef::new(Alias::new("value"));
        match db.dialect() {
            Dialect::Postgres => value.json_binary(),
            _ => value.text(),
        };

        dm.define_table(
            "app_settings",
            Table::create()
                .col(
                    ColumnDef::new(Alias::new("name"))
                        .string_len(128)
                        .not_null()
                        .primary_key(),
                )
                .col(value.not_null())
                .to_owned(),
        );
        dm.define_table(
            "audit_events",
            Table::create()
                .col(
                    ColumnDef::new(Alias::new("id"))
                        .integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(ColumnDef::new(Alias::new("kind")).string_len(64).not_null())
                .col(ColumnDef::new(Alias::new("recorded_at")).timestamp().not_null())
                .to_owned(),
        );
        dm.define_index(
            "idx_audit_events_kind",
            "audit_events",
            Index::create().col(Alias::new("kind")).to_owned(),
        );
    }
}
