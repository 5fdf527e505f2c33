//! Fan-out of server frames to the participants of a room.

use std::sync::Arc;

use parley_core::{ConnectionId, ParticipantId, RelayError, RoomId, ServerMessage, TranslationEvent};
use tracing::{debug, warn};

use crate::registry::SessionRegistry;
use crate::session::SessionState;

/// Per-broadcast delivery counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers frames to every participant of a session except an optional
/// excluded one. A dead or slow peer is logged and skipped; it never stops
/// delivery to the rest and never surfaces as an error to the caller.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcast `message` to `room_id`. Returns `None` if the room does not
    /// exist, which simply means there is nobody to deliver to.
    pub fn broadcast(
        &self,
        room_id: &RoomId,
        message: &ServerMessage,
        exclude: Option<&ParticipantId>,
    ) -> Result<Option<DeliveryReport>, RelayError> {
        let Some(session) = self.registry.find(room_id) else {
            debug!(room_id = %room_id, event_type = message.event_type(), "broadcast to vanished room");
            return Ok(None);
        };
        let payload = Arc::new(message.to_json()?);
        let state = session.lock();
        Ok(Some(deliver(room_id, message.event_type(), &state, &payload, exclude)))
    }

    /// Fan out a frame sent by a participant to everyone else in its room.
    /// Refused with [`RelayError::NotJoined`] unless `connection_id` still
    /// holds `sender` in the room, checked under the session lock.
    pub fn relay(
        &self,
        room_id: &RoomId,
        message: &ServerMessage,
        sender: &ParticipantId,
        connection_id: &ConnectionId,
        frame: &'static str,
    ) -> Result<DeliveryReport, RelayError> {
        let session = self.registry.find(room_id).ok_or(RelayError::NotJoined(frame))?;
        let payload = Arc::new(message.to_json()?);
        let state = session.lock();
        if !state.holds(sender, connection_id) {
            return Err(RelayError::NotJoined(frame));
        }
        Ok(deliver(room_id, message.event_type(), &state, &payload, Some(sender)))
    }

    /// Append `event` to the room history and fan it out live, in one
    /// critical section so every recipient observes the append order.
    /// Retention trimming only affects the history; live delivery always
    /// goes to every current recipient. The author must still be held by
    /// `connection_id`.
    pub fn publish_translation(
        &self,
        room_id: &RoomId,
        event: TranslationEvent,
        connection_id: &ConnectionId,
        exclude: Option<&ParticipantId>,
    ) -> Result<DeliveryReport, RelayError> {
        let not_joined = || RelayError::NotJoined("new_translation");
        let session = self.registry.find(room_id).ok_or_else(not_joined)?;
        let message = ServerMessage::NewTranslation {
            translation: event.clone(),
        };
        let payload = Arc::new(message.to_json()?);

        let mut state = session.lock();
        if !state.holds(&event.author_id, connection_id) {
            return Err(not_joined());
        }
        state.append_event(event, session.history_limit());
        Ok(deliver(room_id, message.event_type(), &state, &payload, exclude))
    }
}

fn deliver(
    room_id: &RoomId,
    event_type: &'static str,
    state: &SessionState,
    payload: &Arc<String>,
    exclude: Option<&ParticipantId>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for member in state.recipients(exclude) {
        report.recipients += 1;
        let result = match member.connection.upgrade() {
            Some(conn) => conn.send(Arc::clone(payload)),
            None => Err(crate::connection::DeliveryError::Gone),
        };
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    room_id = %room_id,
                    participant_id = %member.participant.id,
                    conn_id = %member.connection_id,
                    event_type,
                    error = %e,
                    "failed to deliver to participant"
                );
            }
        }
    }
    debug!(
        room_id = %room_id,
        event_type,
        recipients = report.recipients,
        delivered = report.delivered,
        "broadcast event to room"
    );
    report
}
