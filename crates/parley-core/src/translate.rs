use async_trait::async_trait;

use crate::errors::TranslateError;

/// A text translation provider. Lives outside the relay core: the relay
/// only routes already-formed [`crate::TranslationEvent`]s.
#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError>;
}
