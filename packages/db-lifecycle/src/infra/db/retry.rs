use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{trace, warn};

use crate::config::db::RetrySettings;
use crate::infra::db::diagnostics::lifecycle_counters;

const BASE_DELAY_MS: u64 = 5;
const MAX_DELAY_MS: u64 = 80;

/// Retries a single database operation while its error looks transient.
///
/// An error is transient when its text contains one of the configured
/// matchers. Non-matching errors, and errors with empty text, propagate on
/// the first failure. `max_attempts` counts the first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    matchers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, matchers: Vec<String>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            matchers: matchers.into_iter().filter(|m| !m.is_empty()).collect(),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.matchers.clone())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, error_text: &str) -> bool {
        !error_text.is_empty() && self.matchers.iter().any(|m| error_text.contains(m.as_str()))
    }

    /// Capped exponential backoff with a little jitter.
    fn delay_for(attempt: u32) -> Duration {
        let base_delay_ms = (BASE_DELAY_MS << attempt.saturating_sub(1).min(16)).min(MAX_DELAY_MS);
        let jitter_ms = rand::rng().random::<u64>() % 4;
        Duration::from_millis(base_delay_ms + jitter_ms)
    }

    /// Run `op`, retrying transient failures. The final error is returned
    /// unchanged.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        trace!("query_retry=success attempts={}", attempt);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let text = err.to_string();
            if !self.is_retryable(&text) {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                lifecycle_counters::retry_exhausted();
                warn!(
                    "query_retry=exhausted attempts={} max_attempts={} error={}",
                    attempt, self.max_attempts, text
                );
                return Err(err);
            }

            lifecycle_counters::retry_attempt();
            let delay = Self::delay_for(attempt);
            trace!(
                "query_retry=backoff attempt={} max_attempts={} delay_ms={}",
                attempt,
                self.max_attempts,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
