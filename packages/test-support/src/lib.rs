//! Shared helpers for database lifecycle tests: tracing setup and capture,
//! unique names and throwaway sqlite files.

pub mod logging;
pub mod sqlite;

use ulid::Ulid;

/// Generate a unique string in the format `{prefix}-{ulid}`.
///
/// ```
/// use test_support::unique_str;
///
/// let a = unique_str("table");
/// let b = unique_str("table");
/// assert_ne!(a, b);
/// assert!(a.starts_with("table-"));
/// ```
pub fn unique_str(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new())
}
