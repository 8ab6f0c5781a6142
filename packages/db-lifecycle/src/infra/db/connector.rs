//! Physical connections for the pool.
//!
//! Each pooled connection is a single-connection driver pool (min = max = 1),
//! so sizing, idling and eviction are decided by [`Pool`](super::pool::Pool)
//! alone.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::{debug, warn};

use crate::config::db::{ConnectionParams, Dialect, SessionSettings};
use crate::infra::db::diagnostics::statement_log;
use crate::infra::db::pool::ManageConnection;

/// Statements run once on every freshly opened connection.
pub fn build_session_statements(dialect: &Dialect, session: &SessionSettings) -> Vec<String> {
    match dialect {
        Dialect::Sqlite => vec![
            "PRAGMA foreign_keys = ON;".to_string(),
            format!("PRAGMA busy_timeout = {};", session.busy_timeout.as_millis()),
        ],
        Dialect::Postgres => vec![
            format!(
                "SET application_name = '{}';",
                session.app_name.replace('\'', "''")
            ),
            "SET timezone = 'UTC';".to_string(),
        ],
        Dialect::MySql => vec!["SET time_zone = '+00:00';".to_string()],
        Dialect::Other(_) => Vec::new(),
    }
}

pub struct SeaOrmConnector {
    params: ConnectionParams,
    connect_timeout: Duration,
    session_statements: Vec<String>,
}

impl SeaOrmConnector {
    pub fn new(
        params: ConnectionParams,
        connect_timeout: Duration,
        session: &SessionSettings,
    ) -> Self {
        let session_statements = build_session_statements(&params.dialect, session);
        Self {
            params,
            connect_timeout,
            session_statements,
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut opt = ConnectOptions::new(self.params.connect_url());
        opt.min_connections(1)
            .max_connections(1)
            .connect_timeout(self.connect_timeout)
            .acquire_timeout(self.connect_timeout)
            .sqlx_logging(false);
        opt
    }
}

#[async_trait]
impl ManageConnection for SeaOrmConnector {
    type Connection = DatabaseConnection;
    type Error = DbErr;

    async fn connect(&self) -> Result<DatabaseConnection, DbErr> {
        let mut conn = Database::connect(self.connect_options()).await?;
        conn.set_metric_callback(statement_log::forward);

        for stmt in &self.session_statements {
            conn.execute_unprepared(stmt).await?;
        }
        debug!(
            "connector=open url={} session_statements={}",
            self.params.display_url(),
            self.session_statements.len()
        );
        Ok(conn)
    }

    async fn close(&self, conn: DatabaseConnection) {
        if let Err(e) = conn.close().await {
            warn!("connector=close_failed url={} error={}", self.params.display_url(), e);
        }
    }
}
