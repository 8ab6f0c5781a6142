//! Database connection lifecycle for plugin hosts.
//!
//! Configures and authenticates a pooled connection, lets registered
//! participants extend the schema, synchronizes it, and closes everything on
//! shutdown. Query building and DDL rendering are delegated to sea-orm.

pub mod config;
pub mod error;
pub mod infra;
pub mod lifecycle;
pub mod schema;

pub use config::db::{
    ConnectionParams, DbConfig, Dialect, PoolBounds, ProcessMode, RetrySettings, SessionSettings,
};
pub use config::options::DbOptions;
pub use error::LifecycleError;
pub use infra::db::{lifecycle_counters, DbConnection, DbHandle, PoolStatus, RetryPolicy};
pub use lifecycle::{DbContext, Lifecycle, LifecycleBuilder, LifecycleState};
pub use schema::{SchemaHook, SchemaModel, SchemaObject, SchemaParticipant, SyncReport};

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    test_support::logging::init();
}
