use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use parley_core::{TranslateError, Translator};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const PROMPT_TO_TURKISH: &str = "You are a professional translator. Translate the given English text into natural and fluent Turkish. Only return the translation, no explanations.";
const PROMPT_TO_ENGLISH: &str = "You are a professional translator. Translate the given Turkish text into natural and fluent English. Only return the translation, no explanations.";

/// Settings for the chat-completions request.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            model: "gpt-4".into(),
            temperature: 0.3,
            max_tokens: 1000,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Translator backed by the OpenAI chat-completions API.
pub struct OpenAiTranslator {
    client: reqwest::Client,
    api_key: SecretString,
    config: OpenAiConfig,
}

impl OpenAiTranslator {
    pub fn new(api_key: SecretString, config: OpenAiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            config,
        }
    }

    /// Build from `OPENAI_API_KEY`. Returns `None` when the key is missing
    /// or does not look like an OpenAI secret key.
    pub fn from_env(config: OpenAiConfig) -> Option<Self> {
        let key = std::env::var("OPENAI_API_KEY").ok()?;
        accept_key(&key).map(|key| Self::new(key, config))
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

/// Only `sk-` keys are usable.
pub fn accept_key(raw: &str) -> Option<SecretString> {
    let trimmed = raw.trim();
    trimmed
        .starts_with("sk-")
        .then(|| SecretString::from(trimmed.to_string()))
}

fn system_prompt(target_language: &str) -> &'static str {
    if target_language.eq_ignore_ascii_case("tr") {
        PROMPT_TO_TURKISH
    } else {
        PROMPT_TO_ENGLISH
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request<'a>(config: &'a OpenAiConfig, text: &'a str, target_language: &str) -> ChatRequest<'a> {
    ChatRequest {
        model: &config.model,
        messages: [
            ChatMessage {
                role: "system",
                content: system_prompt(target_language),
            },
            ChatMessage {
                role: "user",
                content: text,
            },
        ],
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

fn extract_translation(response: ChatResponse) -> Result<String, TranslateError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| TranslateError::InvalidRequest("completion contained no text".into()))
}

#[async_trait]
impl Translator for OpenAiTranslator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = build_request(&self.config, text, target_language);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::from_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::InvalidRequest(format!("unreadable completion: {e}")))?;
        extract_translation(parsed)
    }
}
