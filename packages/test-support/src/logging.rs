//! Tracing for lifecycle tests.
//!
//! [`init`] installs the process-wide fmt subscriber every test binary shares.
//! [`capture`] installs a thread-scoped subscriber that records the messages
//! of a single target, for tests that assert on what was logged.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::OnceCell;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{fmt as fmt_layer, EnvFilter, Layer, Registry};

/// Target the lifecycle crate logs executed statements under.
pub const STATEMENT_TARGET: &str = "db_lifecycle::statement";

const QUIET: &str = "warn";
const VERBOSE: &str = "warn,db_lifecycle=debug";

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Resolve the filter directive from `TEST_LOG` and `RUST_LOG`.
///
/// `TEST_LOG=1` turns on lifecycle debug output, executed statements
/// included. Any other non-empty `TEST_LOG` is a directive of its own and
/// wins over `RUST_LOG`.
pub fn directive(test_log: Option<&str>, rust_log: Option<&str>) -> String {
    fn non_empty(v: Option<&str>) -> Option<&str> {
        v.map(str::trim).filter(|v| !v.is_empty())
    }
    match non_empty(test_log) {
        Some("1") | Some("true") => VERBOSE.to_string(),
        Some(d) => d.to_string(),
        None => non_empty(rust_log).unwrap_or(QUIET).to_string(),
    }
}

/// Install the shared subscriber using the environment. Idempotent.
pub fn init() {
    let test_log = std::env::var("TEST_LOG").ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    init_with(&directive(test_log.as_deref(), rust_log.as_deref()));
}

/// Install the shared subscriber with an explicit directive. The first call
/// in a binary wins; later calls are no-ops.
pub fn init_with(directive: &str) {
    INITIALIZED.get_or_init(|| {
        fmt_layer()
            .with_env_filter(EnvFilter::new(directive))
            .with_test_writer()
            .without_time()
            .try_init()
            .ok();
    });
}

/// Messages recorded by [`capture`], in emission order.
#[derive(Clone, Default)]
pub struct Captured {
    messages: Arc<Mutex<Vec<String>>>,
}

impl Captured {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, message: String) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

struct CaptureLayer {
    target: String,
    sink: Captured,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != self.target {
            return;
        }
        let mut message = MessageField::default();
        event.record(&mut message);
        self.sink.push(message.0);
    }
}

#[derive(Default)]
struct MessageField(String);

impl Visit for MessageField {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Record every event logged under `target` on this thread until the guard
/// drops.
///
/// Only work polled on the current thread is seen, so pair it with a
/// current-thread runtime.
pub fn capture(target: &str) -> (Captured, DefaultGuard) {
    let sink = Captured::default();
    let layer = CaptureLayer {
        target: target.to_string(),
        sink: sink.clone(),
    };
    let guard = tracing::subscriber::set_default(Registry::default().with(layer));
    (sink, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_precedence() {
        assert_eq!(directive(None, None), "warn");
        assert_eq!(directive(Some(""), Some(" ")), "warn");
        assert_eq!(directive(None, Some("info")), "info");
        assert_eq!(directive(Some("trace"), Some("info")), "trace");
        assert_eq!(directive(Some("1"), Some("info")), "warn,db_lifecycle=debug");
    }

    #[test]
    fn test_capture_keeps_only_its_target() {
        let (captured, guard) = capture(STATEMENT_TARGET);
        tracing::debug!(target: "db_lifecycle::statement", elapsed_ms = 3u64, "{}", "SELECT 1");
        tracing::info!(target: "db_lifecycle::other", "ignored");
        tracing::warn!("ignored too");
        drop(guard);
        tracing::debug!(target: "db_lifecycle::statement", "after guard");

        assert_eq!(captured.messages(), vec!["SELECT 1".to_string()]);
    }
}
