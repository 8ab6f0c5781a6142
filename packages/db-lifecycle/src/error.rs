use std::time::Duration;

use sea_orm::DbErr;
use thiserror::Error;

use crate::infra::db::pool::PoolError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unable to connect to the database ({url}): {message}")]
    Connection { url: String, message: String },

    #[error("Schema synchronization failed ({url}) at {object}: {message}")]
    SchemaSync {
        url: String,
        object: String,
        message: String,
    },

    #[error("Timed out after {waited:?} waiting for a pooled connection")]
    PoolTimeout { waited: Duration },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error(transparent)]
    Db(#[from] DbErr),
}

impl LifecycleError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Fatal errors abort host startup; everything else is left to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LifecycleError::Config { .. }
                | LifecycleError::Connection { .. }
                | LifecycleError::SchemaSync { .. }
        )
    }
}

impl From<PoolError<DbErr>> for LifecycleError {
    fn from(e: PoolError<DbErr>) -> Self {
        match e {
            PoolError::Config { message } => LifecycleError::Config { message },
            PoolError::Timeout { waited } => LifecycleError::PoolTimeout { waited },
            PoolError::Closed => LifecycleError::PoolClosed,
            PoolError::Connect(e) => LifecycleError::Db(e),
        }
    }
}
