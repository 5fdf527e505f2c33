use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use parley_core::{TranslateError, Translator};

/// Retry behavior for [`ReliableTranslator`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
        }
    }
}

/// Wraps a translator with retries.
///
/// - Retryable errors back off exponentially with jitter
/// - `retry_after` hints from rate limit responses take precedence
/// - Fatal errors are returned immediately
pub struct ReliableTranslator<T: Translator> {
    inner: T,
    config: ReliableConfig,
}

impl<T: Translator> ReliableTranslator<T> {
    pub fn new(inner: T, config: ReliableConfig) -> Self {
        Self { inner, config }
    }

    pub fn with_defaults(inner: T) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.config.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.config.max_delay);
        let jitter = if self.config.jitter_factor > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.config.jitter_factor)
        } else {
            0.0
        };
        capped.mul_f64(1.0 + jitter).min(self.config.max_delay)
    }
}

#[async_trait]
impl<T: Translator> Translator for ReliableTranslator<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError> {
        let mut attempt = 0;
        loop {
            match self.inner.translate(text, target_language).await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = e.suggested_delay().unwrap_or_else(|| self.backoff(attempt));
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "translation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
