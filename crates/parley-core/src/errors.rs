use std::time::Duration;

/// Errors raised while routing a client frame through the relay.
/// None of them is fatal to the connection; each is reported back to the
/// sender as an `error` frame.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed message: {0}")]
    MalformedFrame(String),
    #[error("join a room before sending {0}")]
    NotJoined(&'static str),
    #[error("room id must not be empty")]
    InvalidRoom,
    #[error("translation text must not be empty")]
    EmptyTranslation,
    #[error("participant id {0} is already in room {1}")]
    DuplicateParticipant(String, String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => "malformed_frame",
            Self::NotJoined(_) => "not_joined",
            Self::InvalidRoom => "invalid_room",
            Self::EmptyTranslation => "empty_translation",
            Self::DuplicateParticipant(..) => "duplicate_participant",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Errors from a translation provider.
/// Classifies errors as fatal (don't retry) or retryable.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TranslateError {
    // Fatal
    #[error("translation provider is not configured")]
    NotConfigured,
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
}

impl TranslateError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Network(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Authentication(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
