use std::fmt;
use std::sync::Arc;

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, ExecResult, QueryResult,
    Statement, StatementBuilder,
};
use tracing::debug;

use crate::config::db::{ConnectionParams, DbConfig, Dialect};
use crate::error::LifecycleError;
use crate::infra::db::connector::SeaOrmConnector;
use crate::infra::db::pool::{Pool, PoolStatus, PooledConnection};
use crate::infra::db::retry::RetryPolicy;

pub type DbConnection = PooledConnection<SeaOrmConnector>;

struct HandleInner {
    params: ConnectionParams,
    backend: DatabaseBackend,
    pool: Pool<SeaOrmConnector>,
    retry: RetryPolicy,
}

/// Shared handle to the pooled database connection.
///
/// Cheap to clone. Every clone talks to the same pool; once the owning
/// lifecycle stops, all clones fail with [`LifecycleError::PoolClosed`].
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<HandleInner>,
}

impl DbHandle {
    /// Build the pool for `config`. Opens nothing yet.
    pub(crate) fn open(config: &DbConfig) -> Result<Self, LifecycleError> {
        let params = config.connection_params();
        let backend = params.dialect.backend().ok_or_else(|| {
            LifecycleError::config(format!(
                "no driver backend for dialect '{}'",
                params.dialect
            ))
        })?;
        let connector =
            SeaOrmConnector::new(params.clone(), config.pool.acquire_timeout, &config.session);
        let pool = Pool::new(connector, config.pool.clone())?;

        Ok(Self {
            inner: Arc::new(HandleInner {
                params,
                backend,
                pool,
                retry: RetryPolicy::from_settings(&config.retry),
            }),
        })
    }

    pub fn dialect(&self) -> &Dialect {
        &self.inner.params.dialect
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.inner.backend
    }

    /// Credential-free URL of the target database.
    pub fn url(&self) -> String {
        self.inner.params.display_url()
    }

    pub fn status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    /// Render a query-builder statement for this handle's backend.
    pub fn build<S: StatementBuilder>(&self, stmt: &S) -> Statement {
        self.inner.backend.build(stmt)
    }

    /// Check out a connection. It returns to the pool when dropped.
    pub async fn acquire(&self) -> Result<DbConnection, LifecycleError> {
        Ok(self.inner.pool.acquire().await?)
    }

    pub async fn execute(&self, stmt: Statement) -> Result<ExecResult, LifecycleError> {
        let conn = self.acquire().await?;
        let db: &DatabaseConnection = &conn;
        Ok(self
            .inner
            .retry
            .execute(move || db.execute(stmt.clone()))
            .await?)
    }

    pub async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, LifecycleError> {
        let conn = self.acquire().await?;
        let db: &DatabaseConnection = &conn;
        Ok(self
            .inner
            .retry
            .execute(move || db.execute_unprepared(sql))
            .await?)
    }

    pub async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, LifecycleError> {
        let conn = self.acquire().await?;
        let db: &DatabaseConnection = &conn;
        Ok(self
            .inner
            .retry
            .execute(move || db.query_one(stmt.clone()))
            .await?)
    }

    pub async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, LifecycleError> {
        let conn = self.acquire().await?;
        let db: &DatabaseConnection = &conn;
        Ok(self
            .inner
            .retry
            .execute(move || db.query_all(stmt.clone()))
            .await?)
    }

    /// Prove the credentials work: open one connection and ping it.
    ///
    /// Failures are reported as [`LifecycleError::Connection`] and never retried.
    pub(crate) async fn authenticate(&self) -> Result<(), LifecycleError> {
        let url = self.url();
        let conn = self.acquire().await.map_err(|e| LifecycleError::Connection {
            url: url.clone(),
            message: e.to_string(),
        })?;
        conn.ping()
            .await
            .map_err(|e: DbErr| LifecycleError::Connection {
                url: url.clone(),
                message: e.to_string(),
            })?;
        drop(conn);

        let opened = self
            .inner
            .pool
            .warm_up()
            .await
            .map_err(|e| LifecycleError::Connection {
                url,
                message: e.to_string(),
            })?;
        debug!("db=authenticated warmed_up={}", opened);
        Ok(())
    }

    /// Close the pool. Connections in use close as they are returned.
    pub(crate) async fn close(&self) {
        self.inner.pool.close().await;
    }
}

impl fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbHandle")
            .field("url", &self.url())
            .field("status", &self.status())
            .finish()
    }
}
