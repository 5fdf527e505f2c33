//! Per-room state: who is joined and the recent translation history.
//!
//! A session is *active* while it has at least one participant and *empty*
//! otherwise; an empty session is reclaimed by the
//! [`SessionRegistry`](crate::registry::SessionRegistry) immediately.
//! All mutation goes through one mutex per session, so admit, dismiss,
//! append and fan-out are linearizable within a room.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use parley_core::{
    ConnectionId, Participant, ParticipantId, ParticipantSummary, RelayError, RoomId,
    TranslationEvent,
};

use crate::config::DuplicateIdPolicy;
use crate::connection::ClientConnection;

/// A joined participant and a non-owning handle to its transport.
pub struct Member {
    pub participant: Participant,
    pub connection_id: ConnectionId,
    pub connection: Weak<ClientConnection>,
    seq: u64,
}

/// Outcome of a successful admit.
#[derive(Debug)]
pub enum Admission {
    Joined,
    /// The id was already present on another connection, which lost it.
    Replaced { previous: Weak<ClientConnection> },
}

/// What a joining participant gets to see. Never contains connections.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub room_id: RoomId,
    pub participants: Vec<ParticipantSummary>,
    pub recent_translations: Vec<TranslationEvent>,
}

#[derive(Default)]
pub struct SessionState {
    members: HashMap<ParticipantId, Member>,
    history: VecDeque<TranslationEvent>,
    next_seq: u64,
}

impl SessionState {
    /// Members to deliver to, skipping `exclude`.
    pub fn recipients<'a>(
        &'a self,
        exclude: Option<&'a ParticipantId>,
    ) -> impl Iterator<Item = &'a Member> + 'a {
        self.members
            .values()
            .filter(move |m| Some(&m.participant.id) != exclude)
    }

    pub fn participant_count(&self) -> usize {
        self.members.len()
    }

    /// Whether `participant_id` is currently held by `connection_id`.
    pub fn holds(&self, participant_id: &ParticipantId, connection_id: &ConnectionId) -> bool {
        self.members
            .get(participant_id)
            .is_some_and(|m| &m.connection_id == connection_id)
    }

    /// Record an event for future joiners, evicting from the front past
    /// `limit`. Live delivery is independent of this bound.
    pub fn append_event(&mut self, event: TranslationEvent, limit: usize) {
        self.history.push_back(event);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    fn snapshot(&self, room_id: &RoomId, limit: usize) -> SessionSnapshot {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);
        let skip = self.history.len().saturating_sub(limit);
        SessionSnapshot {
            room_id: room_id.clone(),
            participants: members.iter().map(|m| m.participant.summary()).collect(),
            recent_translations: self.history.iter().skip(skip).cloned().collect(),
        }
    }
}

pub struct Session {
    pub id: RoomId,
    history_limit: usize,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: RoomId, history_limit: usize) -> Self {
        Self {
            id,
            history_limit,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Lock the session for a compound operation.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Add a participant. `on_admitted` runs under the session lock with the
    /// post-join snapshot, before any later fan-out can reach the joiner.
    /// A connection that loses the id to this join is unbound under the same
    /// lock.
    pub fn admit<F>(
        &self,
        participant: Participant,
        connection: &Arc<ClientConnection>,
        policy: DuplicateIdPolicy,
        on_admitted: F,
    ) -> Result<Admission, RelayError>
    where
        F: FnOnce(&SessionSnapshot),
    {
        let mut state = self.state.lock();

        let existing = state.members.get(&participant.id);
        if let Some(member) = existing {
            if member.connection_id != connection.id && policy == DuplicateIdPolicy::Reject {
                return Err(RelayError::DuplicateParticipant(
                    participant.id.to_string(),
                    self.id.to_string(),
                ));
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let member = Member {
            participant: participant.clone(),
            connection_id: connection.id.clone(),
            connection: Arc::downgrade(connection),
            seq,
        };
        let admission = match state.members.insert(participant.id.clone(), member) {
            Some(previous) if previous.connection_id != connection.id => {
                if let Some(conn) = previous.connection.upgrade() {
                    conn.unbind_if(&participant);
                }
                Admission::Replaced {
                    previous: previous.connection,
                }
            }
            _ => Admission::Joined,
        };

        let snapshot = state.snapshot(&self.id, self.history_limit);
        on_admitted(&snapshot);
        Ok(admission)
    }

    /// Remove a participant, but only while it is still held by
    /// `connection_id`. A replaced connection cannot evict its successor.
    pub fn dismiss(&self, participant_id: &ParticipantId, connection_id: &ConnectionId) -> Option<Participant> {
        let mut state = self.state.lock();
        if !state.holds(participant_id, connection_id) {
            return None;
        }
        state.members.remove(participant_id).map(|m| m.participant)
    }

    pub fn append_event(&self, event: TranslationEvent) {
        self.state.lock().append_event(event, self.history_limit);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().snapshot(&self.id, self.history_limit)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().members.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().participant_count()
    }
}
