pub mod errors;
pub mod ids;
pub mod participant;
pub mod protocol;
pub mod translate;
pub mod translation;

pub use errors::{RelayError, TranslateError};
pub use ids::{ConnectionId, ParticipantId, RoomId, TranslationId};
pub use participant::{Participant, ParticipantSummary};
pub use protocol::{ClientMessage, ServerMessage, TranslationSubmission};
pub use translate::Translator;
pub use translation::TranslationEvent;
