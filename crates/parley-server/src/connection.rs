//! One client's transport handle.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use parley_core::{ConnectionId, Participant};
use tokio::sync::mpsc;

/// Transport lifecycle. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Why a frame could not be queued for a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection is gone")]
    Gone,
    #[error("connection is not open")]
    NotOpen,
    #[error("send queue is full")]
    QueueFull,
}

/// A connected client. Frames are queued on `tx` and written to the socket
/// by the connection's writer task.
pub struct ClientConnection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    state: AtomicU8,
    /// Participant bound by a successful `join_room`.
    participant: Mutex<Option<Participant>>,
    torn_down: AtomicBool,
    dropped_messages: AtomicU64,
    connected_at: Instant,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            participant: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Connecting -> Open. No effect once closed.
    pub fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn mark_closed(&self) {
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Claim the right to run teardown. Returns `true` exactly once.
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    pub fn bind(&self, participant: Participant) {
        *self.participant.lock() = Some(participant);
    }

    pub fn participant(&self) -> Option<Participant> {
        self.participant.lock().clone()
    }

    pub fn take_participant(&self) -> Option<Participant> {
        self.participant.lock().take()
    }

    /// Drop the binding only if it still refers to `participant`.
    pub fn unbind_if(&self, participant: &Participant) -> bool {
        let mut bound = self.participant.lock();
        if bound.as_ref().is_some_and(|p| p.id == participant.id && p.room_id == participant.room_id) {
            *bound = None;
            true
        } else {
            false
        }
    }

    /// Queue a frame without waiting. Readiness is checked first.
    pub fn send(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::NotOpen);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mark_closed();
                Err(DeliveryError::NotOpen)
            }
        }
    }

    pub fn send_text(&self, message: String) -> Result<(), DeliveryError> {
        self.send(Arc::new(message))
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
