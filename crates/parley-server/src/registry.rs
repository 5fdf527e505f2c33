use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_core::{ConnectionId, Participant, ParticipantId, RelayError, RoomId};
use tracing::{debug, info};

use crate::config::DuplicateIdPolicy;
use crate::connection::ClientConnection;
use crate::session::{Admission, Session, SessionSnapshot};

/// Result of removing a participant from its room.
#[derive(Debug)]
pub struct Departure {
    pub participant: Participant,
    /// The room became empty and was removed from the registry.
    pub reclaimed: bool,
}

/// Maps room ids to live sessions. Sessions are created on first join and
/// removed the moment they become empty.
///
/// Lock order is always registry shard, then session. Joins and departures
/// run under the shard lock, so a join can never land in a session that is
/// concurrently being reclaimed.
pub struct SessionRegistry {
    sessions: DashMap<RoomId, Arc<Session>>,
    history_limit: usize,
}

impl SessionRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            history_limit,
        }
    }

    /// Return the session for `room_id`, creating it if needed. Concurrent
    /// callers for the same id always get the same session.
    pub fn get_or_create(&self, room_id: &RoomId) -> Arc<Session> {
        let entry = self
            .sessions
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(Session::new(room_id.clone(), self.history_limit)));
        Arc::clone(entry.value())
    }

    pub fn find(&self, room_id: &RoomId) -> Option<Arc<Session>> {
        self.sessions.get(room_id).map(|s| Arc::clone(s.value()))
    }

    /// Remove `room_id` if its session is empty. Returns whether it was removed.
    pub fn remove(&self, room_id: &RoomId) -> bool {
        self.sessions
            .remove_if(room_id, |_, session| session.is_empty())
            .is_some()
    }

    /// Admit `participant` into its room, creating the room on demand. A
    /// rejected join never leaves a freshly created room behind.
    pub fn admit<F>(
        &self,
        participant: Participant,
        connection: &Arc<ClientConnection>,
        policy: DuplicateIdPolicy,
        on_admitted: F,
    ) -> Result<(Arc<Session>, Admission), RelayError>
    where
        F: FnOnce(&SessionSnapshot),
    {
        match self.sessions.entry(participant.room_id.clone()) {
            Entry::Occupied(occupied) => {
                let session = Arc::clone(occupied.get());
                let admission = session.admit(participant, connection, policy, on_admitted)?;
                Ok((session, admission))
            }
            Entry::Vacant(vacant) => {
                let session = Arc::new(Session::new(
                    participant.room_id.clone(),
                    self.history_limit,
                ));
                let admission = session.admit(participant, connection, policy, on_admitted)?;
                info!(room_id = %session.id, "session created");
                vacant.insert(Arc::clone(&session));
                Ok((session, admission))
            }
        }
    }

    /// Remove a participant held by `connection_id` and reclaim the room if
    /// it is now empty. Unknown rooms and stale connections are no-ops.
    pub fn dismiss(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        connection_id: &ConnectionId,
    ) -> Option<Departure> {
        let mut departed = None;
        let reclaimed = self
            .sessions
            .remove_if(room_id, |_, session| {
                departed = session.dismiss(participant_id, connection_id);
                session.is_empty()
            })
            .is_some();

        if reclaimed {
            info!(room_id = %room_id, "session reclaimed");
        }
        let participant = departed?;
        debug!(room_id = %room_id, participant_id = %participant.id, reclaimed, "participant dismissed");
        Some(Departure {
            participant,
            reclaimed,
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.sessions.contains_key(room_id)
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection() -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
        conn.mark_open();
        (conn, rx)
    }

    fn participant(id: &str, room: &str) -> Participant {
        Participant::from_join(RoomId::from_raw(room), Some(id.into()), None)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = SessionRegistry::new(10);
        let room = RoomId::from_raw("r1");
        let a = registry.get_or_create(&room);
        let b = registry.get_or_create(&room);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_get_or_create_yields_one_session() {
        let registry = Arc::new(SessionRegistry::new(10));
        let room = RoomId::from_raw("busy");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let room = room.clone();
                std::thread::spawn(move || registry.get_or_create(&room))
            })
            .collect();
        let sessions: Vec<Arc<Session>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], s));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn find_unknown_is_none() {
        let registry = SessionRegistry::new(10);
        assert!(registry.find(&RoomId::from_raw("nope")).is_none());
        assert!(!registry.remove(&RoomId::from_raw("nope")));
    }

    #[test]
    fn remove_only_reclaims_empty_sessions() {
        let registry = SessionRegistry::new(10);
        let (conn, _rx) = connection();
        registry
            .admit(participant("a", "r1"), &conn, DuplicateIdPolicy::Replace, |_| {})
            .unwrap();
        assert!(!registry.remove(&RoomId::from_raw("r1")));
        assert!(registry.contains(&RoomId::from_raw("r1")));
    }

    #[test]
    fn last_departure_reclaims_session() {
        let registry = SessionRegistry::new(10);
        let room = RoomId::from_raw("r1");
        let (conn, _rx) = connection();
        let (first, _) = registry
            .admit(participant("a", "r1"), &conn, DuplicateIdPolicy::Replace, |_| {})
            .unwrap();

        let departure = registry
            .dismiss(&room, &ParticipantId::from_raw("a"), &conn.id)
            .unwrap();
        assert!(departure.reclaimed);
        assert!(!registry.contains(&room));

        // A later join gets a fresh session with no leftover state.
        let second = registry.get_or_create(&room);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_empty());
    }

    #[test]
    fn departure_keeps_session_while_others_remain() {
        let registry = SessionRegistry::new(10);
        let room = RoomId::from_raw("r1");
        let (c1, _r1) = connection();
        let (c2, _r2) = connection();
        registry
            .admit(participant("a", "r1"), &c1, DuplicateIdPolicy::Replace, |_| {})
            .unwrap();
        registry
            .admit(participant("b", "r1"), &c2, DuplicateIdPolicy::Replace, |_| {})
            .unwrap();

        let departure = registry
            .dismiss(&room, &ParticipantId::from_raw("a"), &c1.id)
            .unwrap();
        assert!(!departure.reclaimed);
        assert_eq!(registry.find(&room).unwrap().participant_count(), 1);
    }

    #[test]
    fn dismiss_twice_reports_once() {
        let registry = SessionRegistry::new(10);
        let room = RoomId::from_raw("r1");
        let (conn, _rx) = connection();
        registry
            .admit(participant("a", "r1"), &conn, DuplicateIdPolicy::Replace, |_| {})
            .unwrap();
        let pid = ParticipantId::from_raw("a");
        assert!(registry.dismiss(&room, &pid, &conn.id).is_some());
        assert!(registry.dismiss(&room, &pid, &conn.id).is_none());
    }

    #[test]
    fn rejected_join_leaves_existing_room_untouched() {
        let registry = SessionRegistry::new(10);
        let (c1, _r1) = connection();
        let (c2, _r2) = connection();
        let (first, _) = registry
            .admit(participant("a", "r1"), &c1, DuplicateIdPolicy::Reject, |_| {})
            .unwrap();
        let mut admitted = false;
        let err = registry
            .admit(participant("a", "r1"), &c2, DuplicateIdPolicy::Reject, |_| admitted = true)
            .err()
            .expect("duplicate id must be refused");
        assert!(matches!(err, RelayError::DuplicateParticipant(..)));
        assert!(!admitted);
        let room = registry.find(&RoomId::from_raw("r1")).unwrap();
        assert!(Arc::ptr_eq(&first, &room));
        assert_eq!(room.participant_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn room_ids_lists_live_rooms() {
        let registry = SessionRegistry::new(10);
        let (c1, _r1) = connection();
        let (c2, _r2) = connection();
        registry
            .admit(participant("a", "r1"), &c1, DuplicateIdPolicy::Replace, |_| {})
            .unwrap();
        registry
            .admit(participant("b", "r2"), &c2, DuplicateIdPolicy::Replace, |_| {})
            .unwrap();
        let mut ids: Vec<String> = registry.room_ids().iter().map(|r| r.to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["r1", "r2"]);
    }
}
