//! Schema model ("dm") filled by hook participants and consumed by sync.

pub mod hook;
pub mod sync;

use sea_orm::sea_query::{Alias, IndexCreateStatement, TableCreateStatement};
use sea_orm::{DatabaseBackend, Statement};

pub use hook::{SchemaHook, SchemaParticipant};
pub use sync::{sync_schema, SyncReport};

#[derive(Debug, Clone)]
pub enum SchemaObject {
    Table(TableCreateStatement),
    /// An index together with the table it belongs to.
    Index {
        table: String,
        stmt: IndexCreateStatement,
    },
}

impl SchemaObject {
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaObject::Table(_) => "table",
            SchemaObject::Index { .. } => "index",
        }
    }

    /// Create statement for `backend`, marked `IF NOT EXISTS`.
    ///
    /// MySQL ignores `IF NOT EXISTS` on `CREATE INDEX`; sync checks the
    /// catalog for those instead.
    pub fn create_statement(&self, backend: DatabaseBackend) -> Statement {
        match self {
            SchemaObject::Table(stmt) => {
                let mut stmt = stmt.clone();
                stmt.if_not_exists();
                backend.build(&stmt)
            }
            SchemaObject::Index { stmt, .. } => {
                let mut stmt = stmt.clone();
                stmt.if_not_exists();
                backend.build(&stmt)
            }
        }
    }
}

/// Ordered name → definition mapping.
///
/// Definition order is creation order; drops run in reverse. Redefining a
/// name replaces the definition in place.
#[derive(Debug, Clone, Default)]
pub struct SchemaModel {
    objects: Vec<(String, SchemaObject)>,
}

impl SchemaModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table named `name`; the statement's own table name is
    /// overwritten so the two never disagree.
    pub fn define_table(&mut self, name: impl Into<String>, mut stmt: TableCreateStatement) {
        let name = name.into();
        stmt.table(Alias::new(name.as_str()));
        self.define(name, SchemaObject::Table(stmt));
    }

    /// Declare an index named `name` on `table`; both override whatever the
    /// statement already carries.
    pub fn define_index(
        &mut self,
        name: impl Into<String>,
        table: impl Into<String>,
        mut stmt: IndexCreateStatement,
    ) {
        let name = name.into();
        let table = table.into();
        stmt.name(name.as_str()).table(Alias::new(table.as_str()));
        self.define(name, SchemaObject::Index { table, stmt });
    }

    pub fn define(&mut self, name: impl Into<String>, object: SchemaObject) {
        let name = name.into();
        match self.objects.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = object,
            None => self.objects.push((name, object)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SchemaObject> {
        self.objects
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, object)| object)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &SchemaObject)> {
        self.objects.iter().map(|(n, o)| (n.as_str(), o))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
