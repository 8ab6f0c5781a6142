/// Driver statement logging with catalog-query suppression
pub mod statement_log {
    use std::sync::LazyLock;

    use regex::Regex;
    use sea_orm::metric;
    use tracing::debug;

    /// Statements the ORM issues to inspect its own catalog. Too chatty for
    /// the debug sink.
    /// SAFETY: This regex pattern is a vetted literal that compiles successfully
    fn catalog_query() -> &'static Regex {
        static CATALOG_QUERY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
            #[allow(clippy::unwrap_used)]
            Regex::new(
                r"(?i)\b(information_schema|pg_catalog|sqlite_master|sqlite_schema)\b|^\s*(PRAGMA|SHOW)\b",
            )
            .unwrap()
        });
        &CATALOG_QUERY_REGEX
    }

    pub fn is_catalog_query(sql: &str) -> bool {
        catalog_query().is_match(sql)
    }

    /// Collapse whitespace and cap length so multi-line DDL stays on one log line.
    pub fn preview(sql: &str) -> String {
        let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() > 240 {
            let mut cut: String = flat.chars().take(240).collect();
            cut.push('…');
            cut
        } else {
            flat
        }
    }

    /// Metric callback installed on every driver connection.
    pub fn forward(info: &metric::Info<'_>) {
        let sql = &info.statement.sql;
        if is_catalog_query(sql) {
            return;
        }
        debug!(
            target: "db_lifecycle::statement",
            elapsed_ms = info.elapsed.as_millis() as u64,
            failed = info.failed,
            "{}",
            preview(sql)
        );
    }
}

/// Lifecycle counters - module-local atomics
pub mod lifecycle_counters {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CONNECTIONS_OPENED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static CONNECTIONS_CLOSED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static CONNECTIONS_EVICTED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static ACQUIRE_TIMEOUTS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static RETRY_ATTEMPTS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static RETRY_EXHAUSTED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static SCHEMA_SYNC_RUNS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static SCHEMA_SYNC_SKIPPED_TOTAL: AtomicUsize = AtomicUsize::new(0);

    pub fn connection_opened() {
        CONNECTIONS_OPENED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed() {
        CONNECTIONS_CLOSED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    /// Evictions are closes too; both counters move.
    pub fn connection_evicted() {
        CONNECTIONS_EVICTED_TOTAL.fetch_add(1, Ordering::Relaxed);
        CONNECTIONS_CLOSED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acquire_timeout() {
        ACQUIRE_TIMEOUTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_attempt() {
        RETRY_ATTEMPTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_exhausted() {
        RETRY_EXHAUSTED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn schema_sync_ran() {
        SCHEMA_SYNC_RUNS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn schema_sync_skipped() {
        SCHEMA_SYNC_SKIPPED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    #[derive(Debug, Clone, Copy)]
    pub struct Snapshot {
        pub connections_opened_total: usize,
        pub connections_closed_total: usize,
        pub connections_evicted_total: usize,
        pub acquire_timeouts_total: usize,
        pub retry_attempts_total: usize,
        pub retry_exhausted_total: usize,
        pub schema_sync_runs_total: usize,
        pub schema_sync_skipped_total: usize,
    }

    pub fn snapshot() -> Snapshot {
        Snapshot {
            connections_opened_total: CONNECTIONS_OPENED_TOTAL.load(Ordering::Relaxed),
            connections_closed_total: CONNECTIONS_CLOSED_TOTAL.load(Ordering::Relaxed),
            connections_evicted_total: CONNECTIONS_EVICTED_TOTAL.load(Ordering::Relaxed),
            acquire_timeouts_total: ACQUIRE_TIMEOUTS_TOTAL.load(Ordering::Relaxed),
            retry_attempts_total: RETRY_ATTEMPTS_TOTAL.load(Ordering::Relaxed),
            retry_exhausted_total: RETRY_EXHAUSTED_TOTAL.load(Ordering::Relaxed),
            schema_sync_runs_total: SCHEMA_SYNC_RUNS_TOTAL.load(Ordering::Relaxed),
            schema_sync_skipped_total: SCHEMA_SYNC_SKIPPED_TOTAL.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(context: &str) {
        let s = snapshot();
        tracing::info!(
            context = context,
            connections_opened_total = s.connections_opened_total,
            connections_closed_total = s.connections_closed_total,
            connections_evicted_total = s.connections_evicted_total,
            acquire_timeouts_total = s.acquire_timeouts_total,
            retry_attempts_total = s.retry_attempts_total,
            retry_exhausted_total = s.retry_exhausted_total,
            schema_sync_runs_total = s.schema_sync_runs_total,
            schema_sync_skipped_total = s.schema_sync_skipped_total,
            "db_lifecycle_counters_snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sea_orm::{metric, DatabaseBackend, Statement};
    use serial_test::serial;
    use test_support::logging::{capture, STATEMENT_TARGET};

    use super::lifecycle_counters;
    use super::statement_log::{forward, is_catalog_query, preview};

    #[test]
    fn test_catalog_queries_are_recognised() {
        assert!(is_catalog_query(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = $1"
        ));
        assert!(is_catalog_query("select * from pg_catalog.pg_class"));
        assert!(is_catalog_query(
            "SELECT name FROM sqlite_master WHERE type='table'"
        ));
        assert!(is_catalog_query("PRAGMA foreign_keys = ON;"));
        assert!(is_catalog_query("  show tables"));
    }

    #[test]
    fn test_application_statements_pass_through() {
        assert!(!is_catalog_query("CREATE TABLE IF NOT EXISTS \"users\" (\"id\" integer)"));
        assert!(!is_catalog_query("INSERT INTO settings (key) VALUES ('pragma')"));
        assert!(!is_catalog_query("SELECT 1"));
    }

    #[test]
    fn test_forward_logs_application_statements_only() {
        let (captured, _guard) = capture(STATEMENT_TARGET);
        for sql in [
            "PRAGMA foreign_keys = ON;",
            "CREATE TABLE IF NOT EXISTS \"users\" (\n  \"id\" integer\n)",
            "SELECT name FROM sqlite_master WHERE type = 'table'",
        ] {
            let stmt = Statement::from_string(DatabaseBackend::Sqlite, sql);
            forward(&metric::Info {
                elapsed: Duration::from_millis(1),
                statement: &stmt,
                failed: false,
            });
        }

        assert_eq!(
            captured.messages(),
            vec![r#"CREATE TABLE IF NOT EXISTS "users" ( "id" integer )"#.to_string()]
        );
    }

    #[test]
    fn test_preview_flattens_whitespace() {
        assert_eq!(
            preview("CREATE TABLE t (\n    id integer\n)"),
            "CREATE TABLE t ( id integer )"
        );
        let long = "x ".repeat(400);
        assert!(preview(&long).ends_with('…'));
    }

    #[test]
    #[serial]
    fn test_counters_accumulate() {
        let before = lifecycle_counters::snapshot();
        lifecycle_counters::connection_evicted();
        lifecycle_counters::retry_attempt();
        let after = lifecycle_counters::snapshot();
        assert!(after.connections_evicted_total > before.connections_evicted_total);
        assert!(after.connections_closed_total > before.connections_closed_total);
        assert!(after.retry_attempts_total > before.retry_attempts_total);
    }
}
