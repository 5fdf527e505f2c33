//! Relay configuration.
//!
//! Loading flow:
//! 1. Start with [`RelayConfig::default()`]
//! 2. If a config file exists, deep-merge its JSON over the defaults
//! 3. Apply environment variable overrides (highest priority)

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// What to do when a join reuses a participant id that is already present
/// in the room on another connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateIdPolicy {
    /// The newer connection takes the id over. The older one is unbound
    /// without a departure announcement.
    #[default]
    Replace,
    /// The newer join is refused with an error frame.
    Reject,
}

impl FromStr for DuplicateIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown duplicate id policy: {other}")),
        }
    }
}

impl fmt::Display for DuplicateIdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => f.write_str("replace"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Translations kept per room for new joiners.
    pub history_limit: usize,
    /// Whether the author of a translation also receives it back.
    pub echo_translations: bool,
    pub duplicate_ids: DuplicateIdPolicy,
    /// Outbound frames buffered per connection before drops start.
    pub max_send_queue: usize,
    /// Transport ping interval. Pings keep intermediaries from idling the
    /// socket out; missing pongs are not treated as a disconnect.
    pub heartbeat_interval_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3002,
            history_limit: 10,
            echo_translations: true,
            duplicate_ids: DuplicateIdPolicy::Replace,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            max_message_size: 1024 * 1024,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load config from an optional JSON file plus process environment.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading environment values through `lookup`.
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(RelayConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: RelayConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, lookup);
    Ok(config)
}

/// Objects merge recursively, everything else is replaced, nulls are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply env overrides read through `lookup`. Invalid values are ignored.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = string("PARLEY_HOST") {
        config.host = v;
    }
    // PORT is honored for platform compatibility; PARLEY_PORT wins.
    for key in ["PORT", "PARLEY_PORT"] {
        if let Some(v) = string(key).and_then(|v| v.parse::<u16>().ok()) {
            config.port = v;
        }
    }
    if let Some(v) = string("PARLEY_HISTORY_LIMIT").and_then(|v| v.parse::<usize>().ok()) {
        config.history_limit = v;
    }
    if let Some(v) = string("PARLEY_ECHO_TRANSLATIONS").and_then(|v| parse_bool(&v)) {
        config.echo_translations = v;
    }
    if let Some(v) = string("PARLEY_DUPLICATE_IDS").and_then(|v| v.parse().ok()) {
        config.duplicate_ids = v;
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
