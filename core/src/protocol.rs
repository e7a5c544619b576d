use serde::{Deserialize, Serialize};

use crate::rotation::{RotateDirection, Rotation};
use crate::session_id::{ParticipantId, SessionId};
use crate::snapshot::{Participant, Session};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiecePosition {
    pub piece_id: u32,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceRef {
    pub piece_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateRequest {
    pub piece_id: u32,
    pub direction: RotateDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<ParticipantId>,
}

/// Game-connection messages a client may send. The `userId` a client puts in a payload is
/// ignored; the participant bound to the connection is used instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMsg {
    PieceMove(PiecePosition),
    PieceLock(PieceRef),
    PieceUnlock(PieceRef),
    PieceRelease(PiecePosition),
    PieceRotate(RotateRequest),
    CursorMove(CursorPosition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJoined {
    pub user: Participant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceRotated {
    pub piece_id: u32,
    pub direction: RotateDirection,
    pub rotation: Rotation,
    pub user_id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleCompleted {
    pub completed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session: Session,
    #[serde(default)]
    pub user_id: Option<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMsg {
    UserJoin(UserJoined),
    UserLeave(UserLeft),
    PieceMove(PiecePosition),
    PieceLock(PieceRef),
    PieceUnlock(PieceRef),
    PiecePlaced(PieceRef),
    PieceRotate(PieceRotated),
    CursorMove(CursorPosition),
    PuzzleComplete(PuzzleCompleted),
    SessionState(Box<SessionState>),
}

impl ServerMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::UserJoin(_) => "USER_JOIN",
            ServerMsg::UserLeave(_) => "USER_LEAVE",
            ServerMsg::PieceMove(_) => "PIECE_MOVE",
            ServerMsg::PieceLock(_) => "PIECE_LOCK",
            ServerMsg::PieceUnlock(_) => "PIECE_UNLOCK",
            ServerMsg::PiecePlaced(_) => "PIECE_PLACED",
            ServerMsg::PieceRotate(_) => "PIECE_ROTATE",
            ServerMsg::CursorMove(_) => "CURSOR_MOVE",
            ServerMsg::PuzzleComplete(_) => "PUZZLE_COMPLETE",
            ServerMsg::SessionState(_) => "SESSION_STATE",
        }
    }

    pub fn piece_ref(kind: PieceEvent, piece_id: u32, user_id: &ParticipantId) -> Self {
        let payload = PieceRef {
            piece_id,
            user_id: Some(user_id.clone()),
        };
        match kind {
            PieceEvent::Lock => ServerMsg::PieceLock(payload),
            PieceEvent::Unlock => ServerMsg::PieceUnlock(payload),
            PieceEvent::Placed => ServerMsg::PiecePlaced(payload),
        }
    }

    pub fn session_state(session: Session, user_id: Option<ParticipantId>) -> Self {
        ServerMsg::SessionState(Box::new(SessionState { session, user_id }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceEvent {
    Lock,
    Unlock,
    Placed,
}

/// Requests on the `/api` socket. One [`ApiResponse`] is sent back per request, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiRequest {
    #[serde(rename_all = "camelCase")]
    CreateSession {
        /// Base64 (URL-safe, unpadded) image bytes.
        image: String,
        content_type: String,
        grid_size: u32,
    },
    #[serde(rename_all = "camelCase")]
    GetSession { session_id: String },
    #[serde(rename_all = "camelCase")]
    JoinSession { session_id: String, name: String },
    #[serde(rename_all = "camelCase")]
    GetImage { image_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiResponse {
    #[serde(rename_all = "camelCase")]
    SessionCreated { session_id: SessionId },
    Session { session: Box<Session> },
    Joined { user: Participant },
    #[serde(rename_all = "camelCase")]
    Image { image_id: String, data: String },
    Error { code: String, message: String },
}

impl ApiResponse {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ApiResponse::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};
    use serde_json::json;

    #[test]
    fn client_messages_use_type_and_data_envelope() {
        let raw = r#"{"type":"PIECE_MOVE","data":{"pieceId":3,"x":12.5,"y":40,"userId":"u1"}}"#;
        let msg: ClientMsg = decode(raw).unwrap();
        assert_eq!(
            msg,
            ClientMsg::PieceMove(PiecePosition {
                piece_id: 3,
                x: 12.5,
                y: 40.0,
                user_id: Some(ParticipantId::from("u1")),
            })
        );

        let rotate: ClientMsg =
            decode(r#"{"type":"PIECE_ROTATE","data":{"pieceId":1,"direction":-1}}"#).unwrap();
        assert!(matches!(
            rotate,
            ClientMsg::PieceRotate(RotateRequest {
                direction: RotateDirection::CounterClockwise,
                ..
            })
        ));
    }

    #[test]
    fn server_only_and_malformed_messages_do_not_decode_as_client() {
        assert!(decode::<ClientMsg>(r#"{"type":"USER_JOIN","data":{}}"#).is_none());
        assert!(decode::<ClientMsg>(r#"{"type":"PIECE_LOCK"}"#).is_none());
        assert!(decode::<ClientMsg>("not json").is_none());
        assert!(decode::<ClientMsg>(r#"{"type":"PIECE_ROTATE","data":{"pieceId":1,"direction":3}}"#).is_none());
    }

    #[test]
    fn server_messages_carry_wire_names() {
        let who = ParticipantId::from("p");
        let text = encode(&ServerMsg::piece_ref(PieceEvent::Placed, 7, &who)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "PIECE_PLACED", "data": {"pieceId": 7, "userId": "p"}})
        );

        let text = encode(&ServerMsg::PieceRotate(PieceRotated {
            piece_id: 2,
            direction: RotateDirection::Clockwise,
            rotation: Rotation::Deg270,
            user_id: who.clone(),
        }))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["data"]["rotation"], 270);
        assert_eq!(value["data"]["direction"], 1);

        let text = encode(&ServerMsg::UserLeave(UserLeft { user_id: who })).unwrap();
        assert_eq!(text, r#"{"type":"USER_LEAVE","data":{"userId":"p"}}"#);
    }

    #[test]
    fn api_requests_are_tagged_by_op() {
        let req: ApiRequest =
            decode(r#"{"op":"JOIN_SESSION","sessionId":"abc","name":"Ann"}"#).unwrap();
        assert_eq!(
            req,
            ApiRequest::JoinSession {
                session_id: "abc".into(),
                name: "Ann".into()
            }
        );
        let text = encode(&ApiResponse::error("not_found", "no such session")).unwrap();
        assert_eq!(
            text,
            r#"{"kind":"ERROR","code":"not_found","message":"no such session"}"#
        );
    }
}
