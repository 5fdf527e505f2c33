use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, RoomId};

/// Display name used when a client joins without one.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// One identity inside a room. Bound to exactly one connection and one room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub room_id: RoomId,
}

impl Participant {
    /// Build a participant from the optional identity fields of a join
    /// request, generating an id and defaulting the name when absent.
    pub fn from_join(room_id: RoomId, user_id: Option<String>, user_name: Option<String>) -> Self {
        let id = user_id
            .filter(|s| !s.trim().is_empty())
            .map(ParticipantId::from_raw)
            .unwrap_or_default();
        let name = user_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
        Self { id, name, room_id }
    }

    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// The public face of a participant: what other clients get to see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub name: String,
}
