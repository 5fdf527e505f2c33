use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::{ParticipantId, TranslationId};
use crate::participant::Participant;
use crate::protocol::TranslationSubmission;

/// Language tag used when the client does not name one.
pub const AUTO_DETECTED_LANGUAGE: &str = "auto-detected";

/// One unit of source text and its translation. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationEvent {
    pub id: TranslationId,
    #[serde(rename = "userId")]
    pub author_id: ParticipantId,
    #[serde(rename = "userName")]
    pub author_name: String,
    #[serde(rename = "originalText")]
    pub source_text: String,
    pub translated_text: String,
    pub language: String,
    pub timestamp: DateTime<Utc>,
}

impl TranslationEvent {
    /// Turn a client submission into an event authored by `author`.
    /// Authorship always comes from the bound participant, never the payload.
    pub fn from_submission(
        submission: TranslationSubmission,
        author: &Participant,
    ) -> Result<Self, RelayError> {
        if submission.original_text.trim().is_empty() {
            return Err(RelayError::EmptyTranslation);
        }
        Ok(Self {
            id: submission.id.unwrap_or_default(),
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            source_text: submission.original_text,
            translated_text: submission.translated_text,
            language: submission
                .language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| AUTO_DETECTED_LANGUAGE.to_string()),
            timestamp: Utc::now(),
        })
    }
}
