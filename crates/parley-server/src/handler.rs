//! Per-connection frame routing and teardown.
//!
//! Each connection's frames are handled to completion, one at a time, by the
//! connection's reader task. Cross-connection consistency comes from the
//! registry and per-session locks, not from this layer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parley_core::{
    ClientMessage, Participant, RelayError, RoomId, ServerMessage, TranslationEvent,
    TranslationSubmission,
};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::connection::ClientConnection;
use crate::dispatcher::Dispatcher;
use crate::registry::SessionRegistry;
use crate::session::Admission;

/// Shared relay state handed to every connection. Owned by the server, not
/// global: its lifetime is the server's.
#[derive(Clone)]
pub struct RelayContext {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Dispatcher,
    pub config: Arc<RelayConfig>,
    live_connections: Arc<AtomicUsize>,
}

impl RelayContext {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.history_limit));
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            config: Arc::new(config),
            live_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.live_connections.load(Ordering::Relaxed)
    }
}

/// Routes the frames of one connection and owns its teardown.
pub struct ConnectionHandler {
    ctx: RelayContext,
    connection: Arc<ClientConnection>,
}

impl ConnectionHandler {
    pub fn new(ctx: RelayContext, connection: Arc<ClientConnection>) -> Self {
        ctx.live_connections.fetch_add(1, Ordering::Relaxed);
        connection.mark_open();
        Self { ctx, connection }
    }

    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// Handle one inbound text frame. Failures are answered with an `error`
    /// frame to this connection only.
    pub fn handle_text(&self, raw: &str) {
        let result = ClientMessage::decode(raw).and_then(|msg| {
            debug!(conn_id = %self.connection.id, frame = msg.kind(), "frame received");
            self.route(msg)
        });
        if let Err(e) = result {
            warn!(conn_id = %self.connection.id, kind = e.error_kind(), error = %e, "frame rejected");
            self.reply(&ServerMessage::from(&e));
        }
    }

    /// Binary frames carry no relay events.
    pub fn handle_binary(&self, len: usize) {
        debug!(conn_id = %self.connection.id, len, "binary frame rejected");
        self.reply(&ServerMessage::error("binary frames are not supported"));
    }

    fn route(&self, msg: ClientMessage) -> Result<(), RelayError> {
        match msg {
            ClientMessage::JoinRoom {
                room_id,
                user_id,
                user_name,
            } => self.join(room_id, user_id, user_name),
            ClientMessage::NewTranslation { translation } => self.submit_translation(translation),
            ClientMessage::StartSpeaking => self.speaking(true),
            ClientMessage::StopSpeaking => self.speaking(false),
        }
    }

    fn join(
        &self,
        room_id: RoomId,
        user_id: Option<String>,
        user_name: Option<String>,
    ) -> Result<(), RelayError> {
        if room_id.is_blank() {
            return Err(RelayError::InvalidRoom);
        }
        let previous = self.connection.participant();
        let participant = Participant::from_join(room_id, user_id, user_name);
        let connection = &self.connection;

        // Admit into the new room first: a refused join leaves the
        // connection where it was.
        let (session, admission) = self.ctx.registry.admit(
            participant.clone(),
            connection,
            self.ctx.config.duplicate_ids,
            |snapshot| {
                connection.bind(participant.clone());
                let joined = ServerMessage::RoomJoined {
                    room_id: snapshot.room_id.clone(),
                    users: snapshot.participants.clone(),
                    recent_translations: snapshot.recent_translations.clone(),
                };
                match joined.to_json() {
                    Ok(json) => {
                        if let Err(e) = connection.send_text(json) {
                            warn!(conn_id = %connection.id, error = %e, "failed to send room snapshot");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize room snapshot"),
                }
            },
        )?;

        // A connection belongs to at most one room at a time.
        if let Some(previous) = previous {
            if previous.id != participant.id || previous.room_id != participant.room_id {
                self.depart(&previous);
            }
        }

        if let Admission::Replaced { previous } = admission {
            if let Some(previous) = previous.upgrade() {
                let notice = ServerMessage::error(format!(
                    "participant {} joined room {} from another connection",
                    participant.id, participant.room_id
                ));
                match notice.to_json() {
                    Ok(json) => {
                        if let Err(e) = previous.send_text(json) {
                            debug!(conn_id = %previous.id, error = %e, "superseded notice dropped");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize superseded notice"),
                }
            }
            info!(room_id = %session.id, participant_id = %participant.id, "participant id taken over by new connection");
        }

        info!(
            room_id = %session.id,
            participant_id = %participant.id,
            conn_id = %self.connection.id,
            "participant joined"
        );
        self.ctx.dispatcher.broadcast(
            &session.id,
            &ServerMessage::user_joined(&participant),
            Some(&participant.id),
        )?;
        Ok(())
    }

    fn submit_translation(&self, submission: TranslationSubmission) -> Result<(), RelayError> {
        let author = self.bound("new_translation")?;
        let event = TranslationEvent::from_submission(submission, &author)?;
        let exclude = (!self.ctx.config.echo_translations).then_some(&author.id);
        debug!(room_id = %author.room_id, translation_id = %event.id, "translation submitted");
        let published = self.ctx.dispatcher.publish_translation(
            &author.room_id,
            event,
            &self.connection.id,
            exclude,
        );
        self.forget_if_superseded(&author, published).map(|_| ())
    }

    fn speaking(&self, started: bool) -> Result<(), RelayError> {
        let frame = if started { "start_speaking" } else { "stop_speaking" };
        let speaker = self.bound(frame)?;
        let relayed = self.ctx.dispatcher.relay(
            &speaker.room_id,
            &ServerMessage::speaking(&speaker, started),
            &speaker.id,
            &self.connection.id,
            frame,
        );
        self.forget_if_superseded(&speaker, relayed).map(|_| ())
    }

    fn bound(&self, frame: &'static str) -> Result<Participant, RelayError> {
        self.connection.participant().ok_or(RelayError::NotJoined(frame))
    }

    /// The room no longer holds `participant` on this connection: drop the
    /// stale binding.
    fn forget_if_superseded<T>(
        &self,
        participant: &Participant,
        result: Result<T, RelayError>,
    ) -> Result<T, RelayError> {
        if let Err(RelayError::NotJoined(_)) = &result {
            if self.connection.unbind_if(participant) {
                debug!(conn_id = %self.connection.id, participant_id = %participant.id, "stale membership dropped");
            }
        }
        result
    }

    /// Leave the current room, if any.
    fn leave(&self) -> Option<Participant> {
        let participant = self.connection.take_participant()?;
        self.depart(&participant)
    }

    /// Dismiss, announce, reclaim.
    fn depart(&self, participant: &Participant) -> Option<Participant> {
        let departure = self.ctx.registry.dismiss(
            &participant.room_id,
            &participant.id,
            &self.connection.id,
        )?;
        info!(
            room_id = %participant.room_id,
            participant_id = %participant.id,
            reclaimed = departure.reclaimed,
            "participant left"
        );
        if !departure.reclaimed {
            if let Err(e) = self.ctx.dispatcher.broadcast(
                &participant.room_id,
                &ServerMessage::user_left(&departure.participant),
                None,
            ) {
                warn!(error = %e, "failed to announce departure");
            }
        }
        Some(departure.participant)
    }

    /// Single exit path for a connection, however the close was detected.
    /// Runs at most once; later calls are no-ops.
    pub fn teardown(&self) {
        if !self.connection.begin_teardown() {
            return;
        }
        self.connection.mark_closed();
        self.ctx.live_connections.fetch_sub(1, Ordering::Relaxed);
        let left = self.leave();
        info!(
            conn_id = %self.connection.id,
            participant_id = left.as_ref().map(|p| p.id.as_str()).unwrap_or("-"),
            age_ms = self.connection.age().as_millis() as u64,
            "connection closed"
        );
    }

    fn reply(&self, message: &ServerMessage) {
        match message.to_json() {
            Ok(json) => {
                if let Err(e) = self.connection.send_text(json) {
                    debug!(conn_id = %self.connection.id, error = %e, "reply dropped");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize reply"),
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicateIdPolicy;
    use parley_core::ConnectionId;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct TestClient {
        handler: ConnectionHandler,
        rx: mpsc::Receiver<Arc<String>>,
    }

    impl TestClient {
        fn connect(ctx: &RelayContext) -> Self {
            let (tx, rx) = mpsc::channel(64);
            let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
            Self {
                handler: ConnectionHandler::new(ctx.clone(), conn),
                rx,
            }
        }

        fn send(&self, frame: Value) {
            self.handler.handle_text(&frame.to_string());
        }

        fn join(&self, room: &str, id: &str) {
            self.send(serde_json::json!({"type": "join_room", "roomId": room, "userId": id, "userName": id}));
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(serde_json::from_str(&msg).unwrap());
            }
            out
        }

        fn types(&mut self) -> Vec<String> {
            self.drain()
                .iter()
                .map(|m| m["type"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    fn context(configure: impl FnOnce(&mut RelayConfig)) -> RelayContext {
        let mut config = RelayConfig::default();
        configure(&mut config);
        RelayContext::new(config)
    }

    fn translation(text: &str, translated: &str) -> Value {
        serde_json::json!({
            "type": "new_translation",
            "translation": {"originalText": text, "translatedText": translated}
        })
    }

    #[test]
    fn join_returns_snapshot_and_announces() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        let mut b = TestClient::connect(&ctx);

        a.join("r1", "a");
        let a_msgs = a.drain();
        assert_eq!(a_msgs.len(), 1);
        assert_eq!(a_msgs[0]["type"], "room_joined");
        assert_eq!(a_msgs[0]["roomId"], "r1");
        assert_eq!(a_msgs[0]["users"].as_array().unwrap().len(), 1);

        b.join("r1", "b");
        let b_msgs = b.drain();
        assert_eq!(b_msgs[0]["type"], "room_joined");
        let users: Vec<&str> = b_msgs[0]["users"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["id"].as_str().unwrap())
            .collect();
        assert_eq!(users, vec!["a", "b"]);
        assert_eq!(b_msgs.len(), 1, "joiner must not get its own user_joined");

        let a_msgs = a.drain();
        assert_eq!(a_msgs.len(), 1);
        assert_eq!(a_msgs[0]["type"], "user_joined");
        assert_eq!(a_msgs[0]["user"]["id"], "b");
    }

    #[test]
    fn translation_echoes_to_author_by_default() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        let mut b = TestClient::connect(&ctx);
        a.join("r1", "a");
        b.join("r1", "b");
        a.drain();
        b.drain();

        a.send(translation("merhaba", "hello"));

        let b_msgs = b.drain();
        assert_eq!(b_msgs.len(), 1);
        assert_eq!(b_msgs[0]["type"], "new_translation");
        assert_eq!(b_msgs[0]["translation"]["originalText"], "merhaba");
        assert_eq!(b_msgs[0]["translation"]["translatedText"], "hello");
        assert_eq!(b_msgs[0]["translation"]["userId"], "a");
        assert_eq!(a.types(), vec!["new_translation"]);
    }

    #[test]
    fn translation_skips_author_without_echo() {
        let ctx = context(|c| c.echo_translations = false);
        let mut a = TestClient::connect(&ctx);
        let mut b = TestClient::connect(&ctx);
        a.join("r1", "a");
        b.join("r1", "b");
        a.drain();
        b.drain();

        a.send(translation("merhaba", "hello"));

        assert_eq!(b.types(), vec!["new_translation"]);
        assert!(a.drain().is_empty());
    }

    #[test]
    fn speaking_goes_to_others_only() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        let mut b = TestClient::connect(&ctx);
        a.join("r1", "a");
        b.join("r1", "b");
        a.drain();
        b.drain();

        a.send(serde_json::json!({"type": "start_speaking"}));
        a.send(serde_json::json!({"type": "stop_speaking"}));

        assert_eq!(b.types(), vec!["user_speaking", "user_stopped_speaking"]);
        assert!(a.drain().is_empty());
    }

    #[test]
    fn frames_before_join_are_errors() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        a.send(serde_json::json!({"type": "start_speaking"}));
        a.send(translation("merhaba", "hello"));
        let msgs = a.drain();
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m["type"] == "error"));
        assert!(ctx.registry.is_empty());
    }

    #[test]
    fn malformed_frame_only_affects_sender() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        let mut b = TestClient::connect(&ctx);
        a.join("r1", "a");
        b.join("r1", "b");
        a.drain();
        b.drain();

        a.handler.handle_text("{not json");
        a.send(serde_json::json!({"type": "audio_chunk", "audioData": "AAAA"}));

        assert_eq!(a.types(), vec!["error", "error"]);
        assert!(b.drain().is_empty());
        assert_eq!(ctx.registry.find(&RoomId::from_raw("r1")).unwrap().participant_count(), 2);
    }

    #[test]
    fn blank_room_is_rejected() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        a.join("  ", "a");
        assert_eq!(a.types(), vec!["error"]);
        assert!(ctx.registry.is_empty());
    }

    #[test]
    fn empty_translation_is_rejected() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        a.join("r1", "a");
        a.drain();
        a.send(translation("   ", "x"));
        assert_eq!(a.types(), vec!["error"]);
        let snapshot = ctx.registry.find(&RoomId::from_raw("r1")).unwrap().snapshot();
        assert!(snapshot.recent_translations.is_empty());
    }

    #[test]
    fn joiner_sees_last_ten_translations() {
        let ctx = context(|_| {});
        let a = TestClient::connect(&ctx);
        a.join("r1", "a");
        for n in 1..=15 {
            a.send(translation(&format!("metin {n}"), &format!("text {n}")));
        }

        let mut b = TestClient::connect(&ctx);
        b.join("r1", "b");
        let msgs = b.drain();
        let recent: Vec<&str> = msgs[0]["recentTranslations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["translatedText"].as_str().unwrap())
            .collect();
        let expected: Vec<String> = (6..=15).map(|n| format!("text {n}")).collect();
        assert_eq!(recent, expected);
    }

    #[test]
    fn teardown_runs_once() {
        let ctx = context(|_| {});
        let a = TestClient::connect(&ctx);
        let mut b = TestClient::connect(&ctx);
        a.join("r1", "a");
        b.join("r1", "b");
        b.drain();
        assert_eq!(ctx.connection_count(), 2);

        a.handler.teardown();
        a.handler.teardown();

        assert_eq!(b.types(), vec!["user_left"]);
        assert_eq!(ctx.connection_count(), 1);
        assert_eq!(ctx.registry.find(&RoomId::from_raw("r1")).unwrap().participant_count(), 1);

        drop(a);
        assert!(b.drain().is_empty());
        assert_eq!(ctx.connection_count(), 1);
    }

    #[test]
    fn concurrent_teardown_announces_once() {
        let ctx = context(|_| {});
        let a = Arc::new(TestClient::connect(&ctx).handler);
        let mut b = TestClient::connect(&ctx);
        a.handle_text(&serde_json::json!({"type": "join_room", "roomId": "r1", "userId": "a"}).to_string());
        b.join("r1", "b");
        b.drain();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let a = Arc::clone(&a);
                std::thread::spawn(move || a.teardown())
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(b.types(), vec!["user_left"]);
    }

    #[test]
    fn lone_participant_disconnect_reclaims_room() {
        let ctx = context(|_| {});
        let a = TestClient::connect(&ctx);
        a.join("r1", "a");
        assert!(ctx.registry.contains(&RoomId::from_raw("r1")));
        drop(a);
        assert!(!ctx.registry.contains(&RoomId::from_raw("r1")));
    }

    #[test]
    fn rejoin_moves_connection_between_rooms() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        let mut b = TestClient::connect(&ctx);
        a.join("r1", "a");
        b.join("r1", "b");
        a.drain();
        b.drain();

        a.join("r2", "a");

        assert_eq!(a.types(), vec!["room_joined"]);
        assert_eq!(b.types(), vec!["user_left"]);
        assert_eq!(ctx.registry.find(&RoomId::from_raw("r1")).unwrap().participant_count(), 1);
        assert_eq!(ctx.registry.find(&RoomId::from_raw("r2")).unwrap().participant_count(), 1);
    }

    #[test]
    fn duplicate_id_replace_is_silent_for_old_connection() {
        let ctx = context(|c| c.duplicate_ids = DuplicateIdPolicy::Replace);
        let mut old = TestClient::connect(&ctx);
        let mut watcher = TestClient::connect(&ctx);
        old.join("r1", "a");
        watcher.join("r1", "w");
        old.drain();
        watcher.drain();

        let mut new = TestClient::connect(&ctx);
        new.join("r1", "a");
        assert_eq!(new.types(), vec!["room_joined"]);
        assert_eq!(old.types(), vec!["error"]);
        assert_eq!(watcher.types(), vec!["user_joined"]);
        assert!(old.handler.connection().participant().is_none());

        // The superseded connection closing must not evict the new one.
        drop(old);
        assert!(watcher.drain().is_empty());
        let room = ctx.registry.find(&RoomId::from_raw("r1")).unwrap();
        assert_eq!(room.participant_count(), 2);
    }

    #[test]
    fn duplicate_id_reject_refuses_second_join() {
        let ctx = context(|c| c.duplicate_ids = DuplicateIdPolicy::Reject);
        let mut first = TestClient::connect(&ctx);
        first.join("r1", "a");
        first.drain();

        let mut second = TestClient::connect(&ctx);
        second.join("r1", "a");
        let msgs = second.drain();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "error");
        assert!(first.drain().is_empty());

        // The refused connection is not a member: speaking is an error.
        second.send(serde_json::json!({"type": "start_speaking"}));
        assert_eq!(second.types(), vec!["error"]);
        assert!(first.drain().is_empty());
    }

    #[test]
    fn superseded_connection_cannot_publish_with_stale_binding() {
        let ctx = context(|c| c.duplicate_ids = DuplicateIdPolicy::Replace);
        let mut watcher = TestClient::connect(&ctx);
        watcher.join("r1", "w");

        // `stale` is admitted but has not bound yet when `current` takes the id.
        let mut stale = TestClient::connect(&ctx);
        let stale_participant =
            Participant::from_join(RoomId::from_raw("r1"), Some("a".into()), Some("a".into()));
        ctx.registry
            .admit(
                stale_participant.clone(),
                stale.handler.connection(),
                DuplicateIdPolicy::Replace,
                |_| {},
            )
            .unwrap();
        let mut current = TestClient::connect(&ctx);
        current.join("r1", "a");
        stale.handler.connection().bind(stale_participant);
        watcher.drain();
        stale.drain();
        current.drain();

        stale.send(translation("merhaba", "hello"));
        stale.send(serde_json::json!({"type": "start_speaking"}));

        assert_eq!(stale.types(), vec!["error", "error"]);
        assert!(watcher.drain().is_empty());
        assert!(current.drain().is_empty());
        assert!(stale.handler.connection().participant().is_none());
        let room = ctx.registry.find(&RoomId::from_raw("r1")).unwrap();
        assert!(room.snapshot().recent_translations.is_empty());

        // Its close is not a departure of the id it lost.
        drop(stale);
        assert!(watcher.drain().is_empty());
        assert_eq!(room.participant_count(), 2);
    }

    #[test]
    fn refused_move_keeps_connection_in_its_room() {
        let ctx = context(|c| c.duplicate_ids = DuplicateIdPolicy::Reject);
        let mut mover = TestClient::connect(&ctx);
        let mut neighbour = TestClient::connect(&ctx);
        let mut holder = TestClient::connect(&ctx);
        mover.join("r1", "a");
        neighbour.join("r1", "n");
        holder.join("r2", "a");
        mover.drain();
        neighbour.drain();
        holder.drain();

        mover.join("r2", "a");

        assert_eq!(mover.types(), vec!["error"]);
        assert!(neighbour.drain().is_empty());
        assert!(holder.drain().is_empty());
        let bound = mover.handler.connection().participant().unwrap();
        assert_eq!(bound.room_id.as_str(), "r1");
        assert_eq!(ctx.registry.find(&RoomId::from_raw("r1")).unwrap().participant_count(), 2);

        // Still a working member of r1.
        mover.send(translation("merhaba", "hello"));
        assert_eq!(neighbour.types(), vec!["new_translation"]);
    }

    #[test]
    fn rejoin_same_room_keeps_membership() {
        let ctx = context(|_| {});
        let mut a = TestClient::connect(&ctx);
        let mut b = TestClient::connect(&ctx);
        a.join("r1", "a");
        b.join("r1", "b");
        a.drain();
        b.drain();

        a.join("r1", "a");

        assert_eq!(a.types(), vec!["room_joined"]);
        assert_eq!(b.types(), vec!["user_joined"]);
        assert_eq!(ctx.registry.find(&RoomId::from_raw("r1")).unwrap().participant_count(), 2);
    }
}
