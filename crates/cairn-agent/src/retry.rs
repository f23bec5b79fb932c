//! Retry policy for opening provider streams

use cairn_ai::providers::StreamProvider;
use cairn_ai::{Message, ModelConfig, ProviderEventStream, Tool};
use std::time::Duration;

/// Retry configuration for stream opens
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Open a provider stream, retrying retryable failures with backoff.
/// Context overflows are never retried.
pub async fn open_with_retry(
    provider: &dyn StreamProvider,
    history: &[Message],
    tools: &[Tool],
    config: &ModelConfig,
    retry: &RetryConfig,
) -> cairn_ai::Result<ProviderEventStream> {
    let mut attempt = 0u32;

    loop {
        match provider.stream(history, tools, config).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if e.is_context_overflow() || !e.is_retryable() || attempt >= retry.max_retries {
                    return Err(e);
                }

                let delay = match &e {
                    cairn_ai::Error::RateLimited {
                        retry_after: Some(secs),
                    } => Duration::from_secs(*secs).min(retry.max_delay),
                    _ => retry.delay_for_attempt(attempt),
                };
                tracing::warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt + 1,
                    retry.max_retries + 1,
                    e,
                    delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
