//! One actor task per active session. Events for a session are handled strictly in
//! arrival order, so broadcasts always follow the order of the mutations behind them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use puzzlecoop_core::{ParticipantId, SessionId};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::dispatch::{Dispatched, Dispatcher};
use crate::engine::SessionEngine;
use crate::registry::{ConnId, Outbox};

#[derive(Debug)]
pub enum RoomEvent {
    Connected {
        conn: ConnId,
        participant: Option<ParticipantId>,
        outbox: Outbox,
    },
    Inbound {
        conn: ConnId,
        text: String,
    },
    Disconnected {
        conn: ConnId,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
    pub timeout: Duration,
    pub sweep_every: Duration,
}

/// Routes events to the room owning each session, starting rooms on demand.
pub struct RoomDirectory {
    engine: Arc<SessionEngine>,
    leases: LeasePolicy,
    rooms: Mutex<HashMap<SessionId, UnboundedSender<RoomEvent>>>,
}

impl RoomDirectory {
    pub fn new(engine: Arc<SessionEngine>, leases: LeasePolicy) -> Arc<Self> {
        Arc::new(Self {
            engine,
            leases,
            rooms: Mutex::new(HashMap::new()),
        })
    }

    pub fn engine(&self) -> &Arc<SessionEngine> {
        &self.engine
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms().len()
    }

    pub fn submit(self: &Arc<Self>, session: &SessionId, event: RoomEvent) {
        let mut rooms = self.rooms();
        let event = match rooms.get(session) {
            Some(tx) => match tx.send(event) {
                Ok(()) => return,
                Err(err) => {
                    rooms.remove(session);
                    err.0
                }
            },
            None => event,
        };

        let (tx, rx) = unbounded_channel();
        let _ = tx.send(event);
        rooms.insert(session.clone(), tx);
        drop(rooms);

        tracing::debug!(session = %session, "starting room");
        let room = Room::new(self.clone(), session.clone());
        tokio::spawn(room.run(rx));
    }

    /// Unregisters the room unless events arrived in the meantime. Senders only reach the
    /// channel under the directory lock, so nothing can be queued after this returns true.
    fn retire(&self, session: &SessionId, rx: &mut UnboundedReceiver<RoomEvent>) -> bool {
        let mut rooms = self.rooms();
        if !rx.is_empty() {
            return false;
        }
        rooms.remove(session);
        rx.close();
        true
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<SessionId, UnboundedSender<RoomEvent>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Lease {
    owner: ParticipantId,
    since: Instant,
}

struct Room {
    directory: Arc<RoomDirectory>,
    dispatcher: Dispatcher,
    leases: HashMap<u32, Lease>,
}

impl Room {
    fn new(directory: Arc<RoomDirectory>, session: SessionId) -> Self {
        let dispatcher = Dispatcher::new(session, directory.engine.clone());
        Self {
            directory,
            dispatcher,
            leases: HashMap::new(),
        }
    }

    /// Locks persisted before this room started get a fresh lease.
    fn seed_leases(&mut self) {
        let Ok(session) = self.dispatcher.engine().get_session(self.dispatcher.session()) else {
            return;
        };
        let now = Instant::now();
        for piece in &session.pieces {
            if let Some(owner) = &piece.locked_by {
                self.leases.insert(
                    piece.id,
                    Lease {
                        owner: owner.clone(),
                        since: now,
                    },
                );
            }
        }
    }

    async fn run(mut self, mut rx: UnboundedReceiver<RoomEvent>) {
        self.seed_leases();
        let period = self.directory.leases.sweep_every;
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle(event);
                    if self.dispatcher.connection_count() == 0
                        && self.directory.retire(self.dispatcher.session(), &mut rx)
                    {
                        break;
                    }
                }
                _ = sweep.tick() => self.sweep_leases(),
            }
        }
        tracing::debug!(session = %self.dispatcher.session(), "room stopped");
    }

    fn handle(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Connected {
                conn,
                participant,
                outbox,
            } => self.dispatcher.connected(conn, participant, outbox),
            RoomEvent::Inbound { conn, text } => {
                let dispatched = self.dispatcher.handle_text(conn, &text);
                self.track(dispatched);
            }
            RoomEvent::Disconnected { conn } => {
                for piece in self.dispatcher.disconnected(conn) {
                    self.leases.remove(&piece);
                }
            }
        }
    }

    fn track(&mut self, dispatched: Dispatched) {
        match dispatched {
            Dispatched::None => {}
            Dispatched::LockGranted { piece, owner } => {
                self.leases.insert(
                    piece,
                    Lease {
                        owner,
                        since: Instant::now(),
                    },
                );
            }
            Dispatched::LockReleased { piece } => {
                self.leases.remove(&piece);
            }
            Dispatched::PieceTouched { piece, by } => {
                if let Some(lease) = self.leases.get_mut(&piece) {
                    if lease.owner == by {
                        lease.since = Instant::now();
                    }
                }
            }
        }
    }

    fn sweep_leases(&mut self) {
        let timeout = self.directory.leases.timeout;
        let now = Instant::now();
        let stale: Vec<(u32, ParticipantId)> = self
            .leases
            .iter()
            .filter(|(_, lease)| now.duration_since(lease.since) >= timeout)
            .map(|(piece, lease)| (*piece, lease.owner.clone()))
            .collect();
        for (piece, owner) in stale {
            if self.dispatcher.expire_lease(piece, &owner) {
                self.leases.remove(&piece);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::allocate_id;
    use crate::testing::seeded;
    use tokio::time::timeout;

    fn policy(timeout: Duration) -> LeasePolicy {
        LeasePolicy {
            timeout,
            sweep_every: Duration::from_millis(20),
        }
    }

    async fn next_kind(rx: &mut UnboundedReceiver<String>) -> String {
        let text = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("outbox closed");
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value["type"].as_str().unwrap().to_string()
    }

    async fn wait_for_rooms(directory: &RoomDirectory, expected: usize) {
        timeout(Duration::from_secs(2), async {
            while directory.active_rooms() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("room count did not settle");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn events_flow_in_order_and_room_retires_when_empty() {
        let seeded = seeded();
        let directory = RoomDirectory::new(seeded.engine.clone(), policy(Duration::from_secs(30)));
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        let (a, b) = (allocate_id(), allocate_id());

        directory.submit(
            &seeded.id,
            RoomEvent::Connected {
                conn: a,
                participant: Some(seeded.ann.clone()),
                outbox: tx_a,
            },
        );
        assert_eq!(next_kind(&mut rx_a).await, "SESSION_STATE");
        directory.submit(
            &seeded.id,
            RoomEvent::Connected {
                conn: b,
                participant: Some(seeded.bob.clone()),
                outbox: tx_b,
            },
        );
        assert_eq!(next_kind(&mut rx_b).await, "SESSION_STATE");
        assert_eq!(next_kind(&mut rx_a).await, "USER_JOIN");
        assert_eq!(directory.active_rooms(), 1);

        for x in [100, 110, 120] {
            directory.submit(
                &seeded.id,
                RoomEvent::Inbound {
                    conn: a,
                    text: format!(r#"{{"type":"PIECE_MOVE","data":{{"pieceId":8,"x":{x},"y":700}}}}"#),
                },
            );
        }
        for x in [100.0, 110.0, 120.0] {
            let text = timeout(Duration::from_secs(2), rx_b.recv()).await.unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["data"]["x"], x);
        }

        directory.submit(&seeded.id, RoomEvent::Disconnected { conn: a });
        assert_eq!(next_kind(&mut rx_b).await, "USER_LEAVE");
        directory.submit(&seeded.id, RoomEvent::Disconnected { conn: b });
        wait_for_rooms(&directory, 0).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_lock_is_expired_and_announced() {
        let seeded = seeded();
        let directory =
            RoomDirectory::new(seeded.engine.clone(), policy(Duration::from_millis(100)));
        let (tx, mut rx) = unbounded_channel();
        let conn = allocate_id();
        directory.submit(
            &seeded.id,
            RoomEvent::Connected {
                conn,
                participant: Some(seeded.ann.clone()),
                outbox: tx,
            },
        );
        assert_eq!(next_kind(&mut rx).await, "SESSION_STATE");
        directory.submit(
            &seeded.id,
            RoomEvent::Inbound {
                conn,
                text: r#"{"type":"PIECE_LOCK","data":{"pieceId":5}}"#.to_string(),
            },
        );

        assert_eq!(next_kind(&mut rx).await, "PIECE_UNLOCK");
        let session = seeded.engine.get_session(&seeded.id).unwrap();
        assert!(session.pieces[5].locked_by.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn locks_from_before_the_room_started_still_expire() {
        let seeded = seeded();
        seeded.engine.lock_piece(&seeded.id, 1, &seeded.bob).unwrap();
        let directory =
            RoomDirectory::new(seeded.engine.clone(), policy(Duration::from_millis(100)));
        let (tx, mut rx) = unbounded_channel();
        directory.submit(
            &seeded.id,
            RoomEvent::Connected {
                conn: allocate_id(),
                participant: None,
                outbox: tx,
            },
        );
        assert_eq!(next_kind(&mut rx).await, "SESSION_STATE");
        assert_eq!(next_kind(&mut rx).await, "PIECE_UNLOCK");
        let session = seeded.engine.get_session(&seeded.id).unwrap();
        assert!(session.pieces[1].locked_by.is_none());
    }
}
