pub mod connector;
pub mod diagnostics;
pub mod handle;
pub mod pool;
pub mod retry;

pub use diagnostics::{lifecycle_counters, statement_log};
pub use handle::{DbConnection, DbHandle};
pub use pool::{ManageConnection, Pool, PoolError, PoolStatus, PooledConnection};
pub use retry::RetryPolicy;
