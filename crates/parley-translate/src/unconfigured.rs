use async_trait::async_trait;

use parley_core::{TranslateError, Translator};

/// Stand-in used when no provider credentials are available. Every call
/// fails with [`TranslateError::NotConfigured`].
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredTranslator;

#[async_trait]
impl Translator for UnconfiguredTranslator {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn translate(&self, _text: &str, _target_language: &str) -> Result<String, TranslateError> {
        Err(TranslateError::NotConfigured)
    }
}
