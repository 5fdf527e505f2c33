//! JSON text frames exchanged over a client connection.
//!
//! Every frame carries a `type` discriminant. Client frames are decoded into
//! [`ClientMessage`] at the boundary so nothing downstream ever sees an
//! untyped payload; anything that fails to decode becomes
//! [`RelayError::MalformedFrame`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::{ParticipantId, RoomId, TranslationId};
use crate::participant::{Participant, ParticipantSummary};
use crate::translation::TranslationEvent;

/// Frames sent by a client.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
        #[serde(rename = "userName", default)]
        user_name: Option<String>,
    },
    NewTranslation {
        translation: TranslationSubmission,
    },
    StartSpeaking,
    StopSpeaking,
}

impl ClientMessage {
    pub fn decode(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw).map_err(|e| RelayError::MalformedFrame(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::NewTranslation { .. } => "new_translation",
            Self::StartSpeaking => "start_speaking",
            Self::StopSpeaking => "stop_speaking",
        }
    }
}

/// Translation payload as submitted by a client. Authorship and timestamp
/// are filled in by the server.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationSubmission {
    #[serde(default)]
    pub id: Option<TranslationId>,
    #[serde(alias = "sourceText")]
    pub original_text: String,
    #[serde(default)]
    pub translated_text: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Frames sent by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        users: Vec<ParticipantSummary>,
        #[serde(rename = "recentTranslations")]
        recent_translations: Vec<TranslationEvent>,
    },
    UserJoined {
        user: ParticipantSummary,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        #[serde(rename = "userId")]
        user_id: ParticipantId,
        #[serde(rename = "userName")]
        user_name: String,
        timestamp: DateTime<Utc>,
    },
    NewTranslation {
        translation: TranslationEvent,
    },
    UserSpeaking {
        #[serde(rename = "userId")]
        user_id: ParticipantId,
        #[serde(rename = "userName")]
        user_name: String,
        timestamp: DateTime<Utc>,
    },
    UserStoppedSpeaking {
        #[serde(rename = "userId")]
        user_id: ParticipantId,
        #[serde(rename = "userName")]
        user_name: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn user_joined(participant: &Participant) -> Self {
        Self::UserJoined {
            user: participant.summary(),
            timestamp: Utc::now(),
        }
    }

    pub fn user_left(participant: &Participant) -> Self {
        Self::UserLeft {
            user_id: participant.id.clone(),
            user_name: participant.name.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn speaking(participant: &Participant, started: bool) -> Self {
        let user_id = participant.id.clone();
        let user_name = participant.name.clone();
        let timestamp = Utc::now();
        if started {
            Self::UserSpeaking { user_id, user_name, timestamp }
        } else {
            Self::UserStoppedSpeaking { user_id, user_name, timestamp }
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RoomJoined { .. } => "room_joined",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::NewTranslation { .. } => "new_translation",
            Self::UserSpeaking { .. } => "user_speaking",
            Self::UserStoppedSpeaking { .. } => "user_stopped_speaking",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&RelayError> for ServerMessage {
    fn from(err: &RelayError) -> Self {
        Self::error(err.to_string())
    }
}
