//! Websocket listener: routes each upgrade to the `/api` request loop or to a game
//! connection pumping events between the socket and its session's room.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use puzzlecoop_core::codec::encode;
use puzzlecoop_core::{ParticipantId, SessionId, SnapConfig};
use puzzlecoop_image::PuzzleCutter;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::api;
use crate::config::ServerConfig;
use crate::engine::SessionEngine;
use crate::registry::allocate_id;
use crate::room::{LeasePolicy, RoomDirectory, RoomEvent};
use crate::store::{ImageRepository, KvStore, MemoryStore, SessionRepository};

pub const API_PATH: &str = "/api";
pub const GAME_PATH_PREFIX: &str = "/ws/puzzle/";
const STORE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Api,
    Game {
        session: SessionId,
        participant: Option<ParticipantId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRejection {
    pub status: StatusCode,
    pub body: String,
}

impl HandshakeRejection {
    fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.body));
        *response.status_mut() = self.status;
        response
    }
}

/// Maps an upgrade request to a route. An empty or missing `userId` makes the game
/// connection an observer.
pub fn route_request(request: &Request) -> Result<Route, HandshakeRejection> {
    let path = request.uri().path();
    let trimmed = path.trim_end_matches('/');
    if trimmed == API_PATH {
        return Ok(Route::Api);
    }
    let raw = trimmed
        .strip_prefix(GAME_PATH_PREFIX)
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .ok_or_else(|| HandshakeRejection::new(StatusCode::NOT_FOUND, "Not found"))?;
    let session = SessionId::parse(raw)
        .map_err(|err| HandshakeRejection::new(StatusCode::BAD_REQUEST, err.to_string()))?;
    let participant = request
        .uri()
        .query()
        .and_then(|query| query_param(query, "userId"))
        .filter(|value| !value.is_empty())
        .map(ParticipantId::new);
    Ok(Route::Game {
        session,
        participant,
    })
}

fn query_param(query: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

struct Shared {
    engine: Arc<SessionEngine>,
    directory: Arc<RoomDirectory>,
    heartbeat: Duration,
}

pub struct PuzzleServer {
    shared: Arc<Shared>,
    store: Arc<MemoryStore>,
}

impl PuzzleServer {
    pub fn new(config: &ServerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let kv: Arc<dyn KvStore> = store.clone();
        let engine = Arc::new(SessionEngine::new(
            SessionRepository::new(kv.clone(), config.session_ttl()),
            ImageRepository::new(kv, config.image_ttl()),
            PuzzleCutter::default(),
            SnapConfig {
                threshold: config.snap_threshold,
            },
            config.max_upload_bytes,
        ));
        let directory = RoomDirectory::new(
            engine.clone(),
            LeasePolicy {
                timeout: config.lock_timeout(),
                sweep_every: config.lease_sweep_interval(),
            },
        );
        Self {
            shared: Arc::new(Shared {
                engine,
                directory,
                heartbeat: config.heartbeat(),
            }),
            store,
        }
    }

    pub fn engine(&self) -> Arc<SessionEngine> {
        self.shared.engine.clone()
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self, listener: TcpListener) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "listening");
        tokio::spawn(purge_store(self.store.clone()));

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_connection(shared, stream).await {
                    tracing::debug!(%peer, error = %err, "connection ended with error");
                }
            });
        }
    }
}

async fn purge_store(store: Arc<MemoryStore>) {
    let mut ticker = interval(STORE_PURGE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match store.purge_expired() {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "expired store entries dropped"),
            Err(err) => tracing::warn!(error = %err, "store purge failed"),
        }
    }
}

async fn serve_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let mut route = None;
    let callback = |request: &Request, response: Response| match route_request(request) {
        Ok(found) => {
            route = Some(found);
            Ok(response)
        }
        Err(rejection) => {
            tracing::debug!(path = request.uri().path(), status = %rejection.status, "upgrade refused");
            Err(rejection.into_response())
        }
    };
    let ws = accept_hdr_async(stream, callback).await?;
    match route {
        Some(Route::Api) => serve_api(&shared, ws).await,
        Some(Route::Game {
            session,
            participant,
        }) => serve_game(&shared, ws, session, participant).await,
        None => Ok(()),
    }
}

fn inbound_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.as_str().to_owned()),
        Message::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok(),
        _ => None,
    }
}

async fn serve_api(
    shared: &Shared,
    ws: WebSocketStream<TcpStream>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let (mut write, mut read) = ws.split();
    while let Some(message) = read.next().await {
        let message = message?;
        if message.is_close() {
            break;
        }
        let Some(text) = inbound_text(message) else {
            continue;
        };
        let response = api::handle_text(&shared.engine, &text).await;
        if let Some(payload) = encode(&response) {
            write.send(Message::Text(payload.into())).await?;
        }
    }
    Ok(())
}

async fn serve_game(
    shared: &Shared,
    ws: WebSocketStream<TcpStream>,
    session: SessionId,
    participant: Option<ParticipantId>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let conn = allocate_id();
    let (outbox, mut outbound) = unbounded_channel::<String>();
    tracing::debug!(session = %session, conn, "game connection opened");
    shared.directory.submit(
        &session,
        RoomEvent::Connected {
            conn,
            participant,
            outbox,
        },
    );

    let (mut write, mut read) = ws.split();
    let period = shared.heartbeat;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let result = loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(text) = outgoing else { break Ok(()) };
                if let Err(err) = write.send(Message::Text(text.into())).await {
                    break Err(err);
                }
            }
            incoming = read.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => break Err(err),
                    None => break Ok(()),
                };
                last_seen = Instant::now();
                if message.is_close() {
                    break Ok(());
                }
                if let Some(text) = inbound_text(message) {
                    shared.directory.submit(&session, RoomEvent::Inbound { conn, text });
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= period * 2 {
                    tracing::info!(session = %session, conn, "connection went silent, closing");
                    break Ok(());
                }
                if let Err(err) = write.send(Message::Ping(Vec::new().into())).await {
                    break Err(err);
                }
            }
        }
    };

    shared
        .directory
        .submit(&session, RoomEvent::Disconnected { conn });
    let _ = write.close().await;
    tracing::debug!(session = %session, conn, "game connection closed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn api_path_routes_to_requests() {
        assert_eq!(route_request(&request("/api")), Ok(Route::Api));
        assert_eq!(route_request(&request("/api/")), Ok(Route::Api));
    }

    #[test]
    fn game_path_binds_session_and_participant() {
        let route = route_request(&request("/ws/puzzle/abcdefABCDEF?userId=p%201")).unwrap();
        assert_eq!(
            route,
            Route::Game {
                session: SessionId::parse("abcdefABCDEF").unwrap(),
                participant: Some(ParticipantId::from("p 1")),
            }
        );
        let observer = route_request(&request("/ws/puzzle/abcdefABCDEF?userId=")).unwrap();
        assert!(matches!(observer, Route::Game { participant: None, .. }));
        let bare = route_request(&request("/ws/puzzle/abcdefABCDEF")).unwrap();
        assert!(matches!(bare, Route::Game { participant: None, .. }));
    }

    #[test]
    fn unknown_paths_and_bad_ids_are_refused() {
        for uri in ["/", "/ws", "/ws/puzzle/", "/other/abcdefABCDEF", "/ws/puzzle/abcdefABCDEF/x"] {
            let rejection = route_request(&request(uri)).unwrap_err();
            assert_eq!(rejection.status, StatusCode::NOT_FOUND, "{uri}");
        }
        let rejection = route_request(&request("/ws/puzzle/short")).unwrap_err();
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
        let rejection = route_request(&request("/ws/puzzle/abcdef-BCDEF")).unwrap_err();
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rejection_becomes_an_http_response() {
        let response = HandshakeRejection::new(StatusCode::NOT_FOUND, "Not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_deref(), Some("Not found"));
    }
}
