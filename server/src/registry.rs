use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use puzzlecoop_core::codec::encode;
use puzzlecoop_core::{ParticipantId, ServerMsg};
use tokio::sync::mpsc::UnboundedSender;

pub type ConnId = u64;
pub type Outbox = UnboundedSender<String>;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn allocate_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

struct Connection {
    participant: Option<ParticipantId>,
    outbox: Outbox,
}

/// Live connections of one session. Sends never block; a closed outbox is skipped.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: ConnId, participant: Option<ParticipantId>, outbox: Outbox) {
        self.lock().insert(
            conn,
            Connection {
                participant,
                outbox,
            },
        );
    }

    /// Returns the participant the connection was bound to, if it was registered.
    pub fn deregister(&self, conn: ConnId) -> Option<Option<ParticipantId>> {
        self.lock()
            .remove(&conn)
            .map(|connection| connection.participant)
    }

    pub fn participant_of(&self, conn: ConnId) -> Option<ParticipantId> {
        self.lock()
            .get(&conn)
            .and_then(|connection| connection.participant.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    pub fn send_to(&self, conn: ConnId, msg: &ServerMsg) {
        let Some(text) = encode(msg) else {
            tracing::warn!(kind = msg.kind(), "failed to encode server message");
            return;
        };
        if let Some(connection) = self.lock().get(&conn) {
            let _ = connection.outbox.send(text);
        }
    }

    pub fn broadcast_all(&self, msg: &ServerMsg) {
        self.broadcast(msg, None);
    }

    pub fn broadcast_others(&self, except: ConnId, msg: &ServerMsg) {
        self.broadcast(msg, Some(except));
    }

    fn broadcast(&self, msg: &ServerMsg, except: Option<ConnId>) {
        let Some(text) = encode(msg) else {
            tracing::warn!(kind = msg.kind(), "failed to encode server message");
            return;
        };
        for (conn, connection) in self.lock().iter() {
            if Some(*conn) == except {
                continue;
            }
            if connection.outbox.send(text.clone()).is_err() {
                tracing::debug!(conn = *conn, "outbox closed, skipping");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnId, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
