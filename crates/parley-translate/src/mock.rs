use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use parley_core::{TranslateError, Translator};

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    Text(String),
    Error(TranslateError),
}

/// Mock translator that returns queued responses in order, then falls back
/// to tagging the input with the target language.
#[derive(Default)]
pub struct MockTranslator {
    responses: Mutex<VecDeque<MockResponse>>,
    call_count: AtomicUsize,
}

impl MockTranslator {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Translator for MockTranslator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let next = self.responses.lock().pop_front();
        match next {
            Some(MockResponse::Text(t)) => Ok(t),
            Some(MockResponse::Error(e)) => Err(e),
            None => Ok(format!("[{target_language}] {text}")),
        }
    }
}
