//! Command-line / environment options a host flattens into its own parser.

use std::time::Duration;

use clap::Args;

use crate::config::db::{
    parse_matchers, DbConfig, Dialect, PoolBounds, ProcessMode, RetrySettings, SessionSettings,
    DEFAULT_APP_NAME, DEFAULT_RETRY_MATCH,
};
use crate::error::LifecycleError;

#[derive(Debug, Clone, Args)]
pub struct DbOptions {
    /// Database dialect: postgres, mysql or sqlite
    #[arg(long = "db-dialect", env = "DB_DIALECT", default_value = "postgres")]
    pub dialect: String,

    /// Database host (ignored for sqlite)
    #[arg(long = "db-host", env = "DB_HOST", default_value = "localhost")]
    pub host: String,

    /// Database port (ignored for sqlite)
    #[arg(long = "db-port", env = "DB_PORT", default_value_t = 5432)]
    pub port: u16,

    /// Database name, or the database file path for sqlite
    #[arg(long = "db-database", env = "DB_DATABASE", default_value = "example")]
    pub database: String,

    /// Database username (ignored for sqlite)
    #[arg(long = "db-username", env = "DB_USERNAME", default_value = "example")]
    pub username: String,

    /// Database password (ignored for sqlite)
    #[arg(
        long = "db-password",
        env = "DB_PASSWORD",
        default_value = "example",
        hide_env_values = true
    )]
    pub password: String,

    /// Drop and recreate every schema object on startup (destroys data)
    #[arg(long = "db-schema-drop", env = "DB_SCHEMA_DROP", default_value_t = false)]
    pub schema_drop: bool,

    /// Minimum number of pooled connections kept open
    #[arg(long = "db-pool-min", env = "DB_POOL_MIN", default_value_t = 0)]
    pub pool_min: u32,

    /// Maximum number of pooled connections
    #[arg(long = "db-pool-max", env = "DB_POOL_MAX", default_value_t = 5)]
    pub pool_max: u32,

    /// Milliseconds a connection may sit idle before it can be evicted
    #[arg(long = "db-pool-idle", env = "DB_POOL_IDLE", default_value_t = 10_000)]
    pub pool_idle_ms: u64,

    /// Milliseconds to wait for a pooled connection before failing
    #[arg(long = "db-pool-acquire", env = "DB_POOL_ACQUIRE", default_value_t = 60_000)]
    pub pool_acquire_ms: u64,

    /// Milliseconds between idle-connection eviction sweeps
    #[arg(long = "db-pool-evict", env = "DB_POOL_EVICT", default_value_t = 1_000)]
    pub pool_evict_ms: u64,

    /// Comma-separated error signatures that make a query retryable
    #[arg(
        long = "db-query-retry-match",
        env = "DB_QUERY_RETRY_MATCH",
        default_value = DEFAULT_RETRY_MATCH
    )]
    pub query_retry_match: String,

    /// Maximum attempts for a retryable query, first attempt included
    #[arg(long = "db-query-retry-max", env = "DB_QUERY_RETRY_MAX", default_value_t = 5)]
    pub query_retry_max: u32,

    /// Name this process reports to the server (postgres `application_name`)
    #[arg(long = "db-app-name", env = "DB_APP_NAME", default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    /// Milliseconds sqlite waits on a locked database file before failing
    #[arg(long = "db-busy-timeout", env = "DB_BUSY_TIMEOUT", default_value_t = 5_000)]
    pub busy_timeout_ms: u64,

    /// Role of this process
    #[arg(
        long = "process-mode",
        env = "DB_PROCESS_MODE",
        value_enum,
        default_value_t = ProcessMode::Normal
    )]
    pub process_mode: ProcessMode,
}

impl DbOptions {
    /// Resolve the options into a validated configuration.
    pub fn into_config(self) -> Result<DbConfig, LifecycleError> {
        let dialect = Dialect::from(self.dialect.as_str());
        let config = DbConfig {
            dialect,
            host: self.host,
            port: self.port,
            database: self.database,
            username: self.username,
            password: self.password,
            pool: PoolBounds {
                min: self.pool_min,
                max: self.pool_max,
                idle_timeout: Duration::from_millis(self.pool_idle_ms),
                acquire_timeout: Duration::from_millis(self.pool_acquire_ms),
                eviction_interval: Duration::from_millis(self.pool_evict_ms),
            },
            retry: RetrySettings {
                max_attempts: self.query_retry_max,
                matchers: parse_matchers(&self.query_retry_match),
            },
            session: SessionSettings {
                app_name: self.app_name,
                busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            },
            schema_drop: self.schema_drop,
            process_mode: self.process_mode,
        };
        config.validate()?;
        Ok(config)
    }
}
