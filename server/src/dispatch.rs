//! Decodes game-connection messages, runs them against the engine and fans the results
//! out to the session's connections.

use std::sync::Arc;

use puzzlecoop_core::codec::decode;
use puzzlecoop_core::{
    ClientMsg, CursorPosition, ParticipantId, PieceEvent, PiecePosition, PieceRotated,
    PuzzleCompleted, ServerMsg, SessionId, UserJoined, UserLeft,
};

use crate::engine::{now_ms, EngineError, SessionEngine};
use crate::registry::{ConnId, ConnectionRegistry, Outbox};

/// What a handled command did to lock ownership, for lease bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    None,
    LockGranted { piece: u32, owner: ParticipantId },
    LockReleased { piece: u32 },
    PieceTouched { piece: u32, by: ParticipantId },
}

pub struct Dispatcher {
    session: SessionId,
    engine: Arc<SessionEngine>,
    registry: ConnectionRegistry,
}

impl Dispatcher {
    pub fn new(session: SessionId, engine: Arc<SessionEngine>) -> Self {
        Self {
            session,
            engine,
            registry: ConnectionRegistry::new(),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Registers the connection. A known participant gets the full state and is announced
    /// to everyone else; an observer only gets the state. A participant id the session does
    /// not know is bound as an observer but gets nothing.
    pub fn connected(&self, conn: ConnId, participant: Option<ParticipantId>, outbox: Outbox) {
        let session = match self.engine.get_session(&self.session) {
            Ok(session) => session,
            Err(err) => {
                self.registry.register(conn, None, outbox);
                self.log_failure("connect", &err);
                return;
            }
        };
        let Some(who) = participant else {
            tracing::debug!(session = %self.session, conn, "observer connected");
            self.registry.register(conn, None, outbox);
            self.registry
                .send_to(conn, &ServerMsg::session_state(session, None));
            return;
        };
        let Some(user) = session.participants.get(&who).cloned() else {
            tracing::debug!(
                session = %self.session,
                conn,
                participant = %who,
                "connected participant is not part of the session"
            );
            self.registry.register(conn, None, outbox);
            return;
        };
        tracing::info!(session = %self.session, conn, participant = %who, "participant connected");
        self.registry.register(conn, Some(who.clone()), outbox);
        self.registry
            .send_to(conn, &ServerMsg::session_state(session, Some(who)));
        self.registry
            .broadcast_others(conn, &ServerMsg::UserJoin(UserJoined { user }));
    }

    pub fn handle_text(&self, conn: ConnId, text: &str) -> Dispatched {
        let Some(msg) = decode::<ClientMsg>(text) else {
            tracing::debug!(session = %self.session, conn, "dropping undecodable message");
            return Dispatched::None;
        };
        let Some(who) = self.registry.participant_of(conn) else {
            tracing::debug!(session = %self.session, conn, "dropping command from observer");
            return Dispatched::None;
        };
        match self.apply(conn, who, msg) {
            Ok(dispatched) => dispatched,
            Err(err) => {
                self.log_failure("command", &err);
                Dispatched::None
            }
        }
    }

    fn apply(
        &self,
        conn: ConnId,
        who: ParticipantId,
        msg: ClientMsg,
    ) -> Result<Dispatched, EngineError> {
        let id = &self.session;
        match msg {
            ClientMsg::PieceMove(pos) => {
                self.engine.move_piece(id, pos.piece_id, pos.x, pos.y, &who)?;
                self.registry.broadcast_all(&ServerMsg::PieceMove(PiecePosition {
                    user_id: Some(who.clone()),
                    ..pos
                }));
                Ok(Dispatched::PieceTouched {
                    piece: pos.piece_id,
                    by: who,
                })
            }
            ClientMsg::PieceLock(target) => {
                self.engine.lock_piece(id, target.piece_id, &who)?;
                self.registry.broadcast_others(
                    conn,
                    &ServerMsg::piece_ref(PieceEvent::Lock, target.piece_id, &who),
                );
                Ok(Dispatched::LockGranted {
                    piece: target.piece_id,
                    owner: who,
                })
            }
            ClientMsg::PieceUnlock(target) => {
                self.engine.unlock_piece(id, target.piece_id, &who)?;
                self.registry.broadcast_others(
                    conn,
                    &ServerMsg::piece_ref(PieceEvent::Unlock, target.piece_id, &who),
                );
                Ok(Dispatched::LockReleased {
                    piece: target.piece_id,
                })
            }
            ClientMsg::PieceRelease(pos) => {
                let released = self
                    .engine
                    .release_piece(id, pos.piece_id, pos.x, pos.y, &who)?;
                self.registry.broadcast_all(&ServerMsg::PieceMove(PiecePosition {
                    piece_id: pos.piece_id,
                    x: released.x,
                    y: released.y,
                    user_id: Some(who.clone()),
                }));
                if released.newly_placed {
                    self.announce_placed(pos.piece_id, &who);
                }
                if released.completed_now {
                    self.announce_completion();
                }
                Ok(Dispatched::PieceTouched {
                    piece: pos.piece_id,
                    by: who,
                })
            }
            ClientMsg::PieceRotate(req) => {
                let rotated = self
                    .engine
                    .rotate_piece(id, req.piece_id, req.direction, &who)?;
                self.registry
                    .broadcast_all(&ServerMsg::PieceRotate(PieceRotated {
                        piece_id: req.piece_id,
                        direction: req.direction,
                        rotation: rotated.rotation,
                        user_id: who.clone(),
                    }));
                if rotated.newly_placed {
                    self.announce_placed(req.piece_id, &who);
                }
                if rotated.completed_now {
                    self.announce_completion();
                }
                Ok(Dispatched::PieceTouched {
                    piece: req.piece_id,
                    by: who,
                })
            }
            ClientMsg::CursorMove(cursor) => {
                self.engine.update_cursor(id, &who, cursor.x, cursor.y)?;
                self.registry.broadcast_others(
                    conn,
                    &ServerMsg::CursorMove(CursorPosition {
                        x: cursor.x,
                        y: cursor.y,
                        user_id: Some(who),
                    }),
                );
                Ok(Dispatched::None)
            }
        }
    }

    fn announce_placed(&self, piece: u32, who: &ParticipantId) {
        tracing::debug!(session = %self.session, piece, participant = %who, "piece placed");
        self.registry
            .broadcast_all(&ServerMsg::piece_ref(PieceEvent::Placed, piece, who));
    }

    fn announce_completion(&self) {
        tracing::info!(session = %self.session, "puzzle completed");
        match self.engine.get_session(&self.session) {
            Ok(session) => self
                .registry
                .broadcast_all(&ServerMsg::session_state(session, None)),
            Err(err) => self.log_failure("completion state", &err),
        }
        self.registry
            .broadcast_all(&ServerMsg::PuzzleComplete(PuzzleCompleted {
                completed_at: now_ms(),
            }));
    }

    /// Deregisters the connection and, for a participant, removes it from the session.
    /// Returns the pieces whose locks were freed.
    pub fn disconnected(&self, conn: ConnId) -> Vec<u32> {
        let Some(Some(who)) = self.registry.deregister(conn) else {
            return Vec::new();
        };
        let freed = match self.engine.leave_session(&self.session, &who) {
            Ok(freed) => freed,
            Err(err) => {
                self.log_failure("leave", &err);
                Vec::new()
            }
        };
        for piece in &freed {
            self.registry
                .broadcast_all(&ServerMsg::piece_ref(PieceEvent::Unlock, *piece, &who));
        }
        tracing::info!(
            session = %self.session,
            conn,
            participant = %who,
            freed = freed.len(),
            "participant left"
        );
        self.registry
            .broadcast_all(&ServerMsg::UserLeave(UserLeft { user_id: who }));
        freed
    }

    /// Releases a lock whose lease ran out. Returns false when the attempt should be
    /// retried on a later sweep.
    pub fn expire_lease(&self, piece: u32, owner: &ParticipantId) -> bool {
        match self.engine.expire_lock(&self.session, piece, owner) {
            Ok(true) => {
                tracing::info!(session = %self.session, piece, participant = %owner, "lock expired");
                self.registry
                    .broadcast_all(&ServerMsg::piece_ref(PieceEvent::Unlock, piece, owner));
                true
            }
            Ok(false) => true,
            Err(err) if err.is_routine() => {
                self.log_failure("lock expiry", &err);
                true
            }
            Err(err) => {
                self.log_failure("lock expiry", &err);
                false
            }
        }
    }

    fn log_failure(&self, action: &str, err: &EngineError) {
        if err.is_routine() {
            tracing::debug!(session = %self.session, action, error = %err, "rejected");
        } else {
            tracing::warn!(session = %self.session, action, error = %err, "failed");
        }
    }
}
