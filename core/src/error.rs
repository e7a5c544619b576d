use thiserror::Error;

use crate::session_id::{ParticipantId, SessionId};

/// Routine refusals of a piece or participant command. None of these indicate a fault; the
/// session is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("piece {0} not found")]
    PieceNotFound(u32),
    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantId),
    #[error("puzzle is already completed")]
    Completed,
    #[error("piece {piece} is locked by {owner}")]
    LockedByOther { piece: u32, owner: ParticipantId },
    #[error("piece {piece} is not locked by {participant}")]
    NotLockOwner {
        piece: u32,
        participant: ParticipantId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid grid size {0}, must be 3, 5, or 8")]
    InvalidGridSize(u32),
    #[error("invalid rotation {0}, must be 0, 90, 180, or 270")]
    InvalidRotation(u16),
    #[error("invalid rotation direction {0}, must be 1 or -1")]
    InvalidDirection(i8),
    #[error("name must not be blank")]
    BlankName,
    #[error("uploaded image is empty")]
    EmptyUpload,
    #[error("uploaded image is {size} bytes, limit is {limit}")]
    UploadTooLarge { size: usize, limit: usize },
    #[error("unsupported image type, expected JPEG or PNG")]
    UnsupportedFormat,
}
