use std::time::Instant;

use sea_orm::sea_query::{Alias, Index, Table};
use sea_orm::{DatabaseBackend, Statement};
use tracing::{debug, info};

use crate::error::LifecycleError;
use crate::infra::db::diagnostics::lifecycle_counters;
use crate::infra::db::DbHandle;
use crate::schema::{SchemaModel, SchemaObject};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Objects dropped or confirmed absent, in drop order.
    pub dropped: Vec<String>,
    /// Objects created or confirmed present, in creation order.
    pub ensured: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Drop,
    Ensure,
}

#[derive(Debug, Clone)]
struct PlannedStep {
    step: Step,
    name: String,
    stmt: Statement,
    /// Catalog lookup returning a row when the object exists. A drop runs
    /// only when it does, a create only when it does not.
    presence: Option<Statement>,
}

fn mysql_index_presence(table: &str, index: &str) -> Statement {
    Statement::from_sql_and_values(
        DatabaseBackend::MySql,
        "SELECT 1 FROM information_schema.statistics \
         WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ? LIMIT 1",
        [table.into(), index.into()],
    )
}

fn drop_step(backend: DatabaseBackend, name: &str, object: &SchemaObject) -> PlannedStep {
    let (stmt, presence) = match object {
        SchemaObject::Table(_) => {
            let mut stmt = Table::drop();
            stmt.table(Alias::new(name)).if_exists();
            if backend == DatabaseBackend::Postgres {
                stmt.cascade();
            }
            (backend.build(&stmt), None)
        }
        SchemaObject::Index { table, .. } => {
            let mut stmt = Index::drop();
            stmt.name(name);
            if backend == DatabaseBackend::MySql {
                // MySQL drops by (table, name) and has no DROP INDEX IF EXISTS.
                stmt.table(Alias::new(table.as_str()));
                (backend.build(&stmt), Some(mysql_index_presence(table, name)))
            } else {
                stmt.if_exists();
                (backend.build(&stmt), None)
            }
        }
    };
    PlannedStep {
        step: Step::Drop,
        name: name.to_string(),
        stmt,
        presence,
    }
}

fn ensure_step(backend: DatabaseBackend, name: &str, object: &SchemaObject) -> PlannedStep {
    let presence = match object {
        SchemaObject::Index { table, .. } if backend == DatabaseBackend::MySql => {
            Some(mysql_index_presence(table, name))
        }
        _ => None,
    };
    PlannedStep {
        step: Step::Ensure,
        name: name.to_string(),
        stmt: object.create_statement(backend),
        presence,
    }
}

/// Statements `sync_schema` runs, in order.
///
/// With `drop`, every modelled object is dropped in reverse definition order
/// first, so indexes go before the tables they were defined after. Creates
/// never touch an object that already exists.
fn plan(backend: DatabaseBackend, dm: &SchemaModel, drop: bool) -> Vec<PlannedStep> {
    let mut steps = Vec::new();
    if drop {
        steps.extend(dm.iter().rev().map(|(name, object)| drop_step(backend, name, object)));
    }
    steps.extend(dm.iter().map(|(name, object)| ensure_step(backend, name, object)));
    steps
}

/// Bring the database in line with `dm`.
///
/// Any failure aborts the sync and is reported as
/// [`LifecycleError::SchemaSync`] naming the object that failed.
pub async fn sync_schema(
    db: &DbHandle,
    dm: &SchemaModel,
    drop: bool,
) -> Result<SyncReport, LifecycleError> {
    let started = Instant::now();
    let url = db.url();
    let mut report = SyncReport::default();

    info!(
        "schema_sync=start url={} objects={} drop={}",
        url,
        dm.len(),
        drop
    );

    for planned in plan(db.backend(), dm, drop) {
        let PlannedStep {
            step,
            name,
            stmt,
            presence,
        } = planned;
        let failed = |e: LifecycleError| LifecycleError::SchemaSync {
            url: url.clone(),
            object: name.clone(),
            message: e.to_string(),
        };

        let run = match presence {
            Some(lookup) => {
                let exists = db.query_one(lookup).await.map_err(failed)?.is_some();
                match step {
                    Step::Drop => exists,
                    Step::Ensure => !exists,
                }
            }
            None => true,
        };

        if run {
            debug!("schema_sync=step kind={:?} object={}", step, name);
            db.execute(stmt).await.map_err(failed)?;
        } else {
            debug!("schema_sync=step kind={:?} object={} skipped=catalog", step, name);
        }
        match step {
            Step::Drop => report.dropped.push(name),
            Step::Ensure => report.ensured.push(name),
        }
    }

    lifecycle_counters::schema_sync_ran();
    info!(
        "schema_sync=done url={} dropped={} ensured={} elapsed_ms={}",
        url,
        report.dropped.len(),
        report.ensured.len(),
        started.elapsed().as_millis()
    );
    Ok(report)
}
