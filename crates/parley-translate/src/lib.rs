pub mod mock;
pub mod openai;
pub mod reliable;
pub mod unconfigured;

use std::sync::Arc;

use parley_core::Translator;

pub use mock::{MockResponse, MockTranslator};
pub use openai::{OpenAiConfig, OpenAiTranslator};
pub use reliable::{ReliableConfig, ReliableTranslator};
pub use unconfigured::UnconfiguredTranslator;

/// Pick a translator from `OPENAI_API_KEY`. See [`from_key`].
pub fn from_env() -> Arc<dyn Translator> {
    from_key(std::env::var("OPENAI_API_KEY").ok().as_deref())
}

/// OpenAI behind retries when `key` is usable, otherwise a translator that
/// fails every call with `NotConfigured`.
pub fn from_key(key: Option<&str>) -> Arc<dyn Translator> {
    match key.and_then(openai::accept_key) {
        Some(key) => {
            let openai = OpenAiTranslator::new(key, OpenAiConfig::default());
            tracing::info!(model = %openai.model(), "OpenAI translator configured");
            Arc::new(ReliableTranslator::with_defaults(openai))
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set or invalid, translation endpoint is disabled");
            Arc::new(UnconfiguredTranslator)
        }
    }
}
