use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sea_orm::DatabaseBackend;

use crate::error::LifecycleError;

/// Characters left as-is in userinfo components of a connect URL.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Database engine family; decides the shape of the connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
    /// Anything the driver layer has no backend for. Rejected by validation.
    Other(String),
}

impl Dialect {
    pub fn scheme(&self) -> &str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::Other(name) => name,
        }
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self, Dialect::Sqlite)
    }

    pub fn backend(&self) -> Option<DatabaseBackend> {
        match self {
            Dialect::Postgres => Some(DatabaseBackend::Postgres),
            Dialect::MySql => Some(DatabaseBackend::MySql),
            Dialect::Sqlite => Some(DatabaseBackend::Sqlite),
            Dialect::Other(_) => None,
        }
    }
}

impl From<&str> for Dialect {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Dialect::Postgres,
            "mysql" | "mariadb" => Dialect::MySql,
            "sqlite" => Dialect::Sqlite,
            other => Dialect::Other(other.to_string()),
        }
    }
}

impl FromStr for Dialect {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Dialect::from(s))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Role of the current process; gates which lifecycle steps run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum ProcessMode {
    #[default]
    Normal,
    /// Shares schema state with a primary process; never synchronizes.
    Worker,
    /// Launches or kills daemons; owns no database connection at all.
    DaemonController,
}

impl ProcessMode {
    pub fn owns_connection(self) -> bool {
        !matches!(self, ProcessMode::DaemonController)
    }

    pub fn syncs_schema(self) -> bool {
        matches!(self, ProcessMode::Normal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolBounds {
    pub min: u32,
    pub max: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub eviction_interval: Duration,
}

impl Default for PoolBounds {
    fn default() -> Self {
        Self {
            min: 0,
            max: 5,
            idle_timeout: Duration::from_millis(10_000),
            acquire_timeout: Duration::from_millis(60_000),
            eviction_interval: Duration::from_millis(1_000),
        }
    }
}

impl PoolBounds {
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.max == 0 {
            return Err(LifecycleError::config(
                "pool max must be at least 1 (max=0 would never hand out a connection)",
            ));
        }
        if self.min > self.max {
            return Err(LifecycleError::config(format!(
                "pool min ({}) exceeds pool max ({})",
                self.min, self.max
            )));
        }
        if self.eviction_interval.is_zero() {
            return Err(LifecycleError::config("pool eviction interval must be non-zero"));
        }
        Ok(())
    }
}

pub const DEFAULT_RETRY_MATCH: &str = "database is locked";
pub const DEFAULT_RETRY_MAX: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub matchers: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX,
            matchers: parse_matchers(DEFAULT_RETRY_MATCH),
        }
    }
}

/// Split a comma-separated matcher list, dropping blank entries.
pub fn parse_matchers(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

pub const DEFAULT_APP_NAME: &str = "db-lifecycle";
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Applied to every connection right after it opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Reported to Postgres as `application_name`.
    pub app_name: String,
    /// How long sqlite waits on a locked file before failing with
    /// `database is locked`.
    pub busy_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub pool: PoolBounds,
    pub retry: RetrySettings,
    pub session: SessionSettings,
    pub schema_drop: bool,
    pub process_mode: ProcessMode,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            host: "localhost".to_string(),
            port: 5432,
            database: "example".to_string(),
            username: "example".to_string(),
            password: "example".to_string(),
            pool: PoolBounds::default(),
            retry: RetrySettings::default(),
            session: SessionSettings::default(),
            schema_drop: false,
            process_mode: ProcessMode::Normal,
        }
    }
}

impl DbConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            dialect: Dialect::Sqlite,
            database: path.into(),
            ..Self::default()
        }
    }

    /// Fail fast on anything that would otherwise surface mid-startup.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if let Dialect::Other(name) = &self.dialect {
            return Err(LifecycleError::config(format!(
                "unknown database dialect '{name}' (expected postgres, mysql or sqlite)"
            )));
        }
        if self.database.trim().is_empty() {
            return Err(LifecycleError::config("database name must not be empty"));
        }
        if !self.dialect.is_file_based() && self.host.trim().is_empty() {
            return Err(LifecycleError::config(format!(
                "{} requires a host",
                self.dialect
            )));
        }
        if self.session.app_name.trim().is_empty() {
            return Err(LifecycleError::config("application name must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(LifecycleError::config(
                "query retry max must be at least 1 (it counts the first attempt)",
            ));
        }
        self.pool.validate()
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::from_config(self)
    }
}

/// Dialect-resolved connection parameters.
///
/// For the file-based dialect host, port, username and password are forced
/// empty and `database` is a filesystem path used verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub dialect: Dialect,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    password: String,
}

impl ConnectionParams {
    pub fn from_config(cfg: &DbConfig) -> Self {
        if cfg.dialect.is_file_based() {
            Self {
                dialect: cfg.dialect.clone(),
                host: String::new(),
                port: None,
                database: cfg.database.clone(),
                username: String::new(),
                password: String::new(),
            }
        } else {
            Self {
                dialect: cfg.dialect.clone(),
                host: cfg.host.clone(),
                port: Some(cfg.port),
                database: cfg.database.clone(),
                username: cfg.username.clone(),
                password: cfg.password.clone(),
            }
        }
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// Credential-free URL, safe for logs and error messages.
    pub fn display_url(&self) -> String {
        if self.dialect.is_file_based() {
            return format!("{}://{}", self.dialect.scheme(), self.database);
        }
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        if self.username.is_empty() {
            format!(
                "{}://{}{}/{}",
                self.dialect.scheme(),
                self.host,
                port,
                self.database
            )
        } else {
            format!(
                "{}://{}@{}{}/{}",
                self.dialect.scheme(),
                self.username,
                self.host,
                port,
                self.database
            )
        }
    }

    /// URL handed to the driver. Carries the password; never log it.
    pub(crate) fn connect_url(&self) -> String {
        if self.dialect.is_file_based() {
            return format!("{}://{}?mode=rwc", self.dialect.scheme(), self.database);
        }
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        let userinfo = match (self.username.is_empty(), self.password.is_empty()) {
            (true, _) => String::new(),
            (false, true) => format!("{}@", utf8_percent_encode(&self.username, USERINFO)),
            (false, false) => format!(
                "{}:{}@",
                utf8_percent_encode(&self.username, USERINFO),
                utf8_percent_encode(&self.password, USERINFO)
            ),
        };
        format!(
            "{}://{}{}{}/{}",
            self.dialect.scheme(),
            userinfo,
            self.host,
            port,
            self.database
        )
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &if self.has_password() { "***" } else { "" })
            .finish()
    }
}
