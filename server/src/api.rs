//! JSON request/response handling for the `/api` socket.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use puzzlecoop_core::codec::decode;
use puzzlecoop_core::{ApiRequest, ApiResponse, SessionId};

use crate::engine::{EngineError, SessionEngine};

const INVALID_REQUEST: &str = "invalid_request";

pub async fn handle_text(engine: &Arc<SessionEngine>, text: &str) -> ApiResponse {
    match decode::<ApiRequest>(text) {
        Some(request) => handle(engine, request).await,
        None => ApiResponse::error(INVALID_REQUEST, "malformed request"),
    }
}

pub async fn handle(engine: &Arc<SessionEngine>, request: ApiRequest) -> ApiResponse {
    match request {
        ApiRequest::CreateSession {
            image,
            content_type,
            grid_size,
        } => {
            let Ok(bytes) = URL_SAFE_NO_PAD.decode(image.as_bytes()) else {
                return ApiResponse::error(INVALID_REQUEST, "image is not valid base64");
            };
            let engine = engine.clone();
            let created = tokio::task::spawn_blocking(move || {
                engine.create_session(&bytes, &content_type, grid_size)
            })
            .await;
            match created {
                Ok(Ok(session)) => ApiResponse::SessionCreated {
                    session_id: session.id,
                },
                Ok(Err(err)) => failure("create session", err),
                Err(err) => {
                    tracing::warn!(error = %err, "image processing task failed");
                    ApiResponse::error("image", "image processing aborted")
                }
            }
        }
        ApiRequest::GetSession { session_id } => {
            let id = match parse_session_id(&session_id) {
                Ok(id) => id,
                Err(response) => return response,
            };
            match engine.get_session(&id) {
                Ok(session) => ApiResponse::Session {
                    session: Box::new(session),
                },
                Err(err) => failure("get session", err),
            }
        }
        ApiRequest::JoinSession { session_id, name } => {
            let id = match parse_session_id(&session_id) {
                Ok(id) => id,
                Err(response) => return response,
            };
            match engine.join_session(&id, &name) {
                Ok(user) => ApiResponse::Joined { user },
                Err(err) => failure("join session", err),
            }
        }
        ApiRequest::GetImage { image_id } => match engine.image(&image_id) {
            Ok(bytes) => ApiResponse::Image {
                image_id,
                data: URL_SAFE_NO_PAD.encode(bytes),
            },
            Err(err) => failure("get image", err),
        },
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiResponse> {
    SessionId::parse(raw).map_err(|err| ApiResponse::error(INVALID_REQUEST, err.to_string()))
}

fn failure(action: &str, err: EngineError) -> ApiResponse {
    if err.is_routine() {
        tracing::debug!(action, error = %err, "request rejected");
    } else {
        tracing::warn!(action, error = %err, "request failed");
    }
    ApiResponse::error(err.code(), err.to_string())
}
