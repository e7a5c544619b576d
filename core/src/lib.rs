pub mod codec;
pub mod commands;
pub mod connect;
pub mod error;
pub mod grid;
pub mod lock;
pub mod protocol;
pub mod rotation;
pub mod session_id;
pub mod shape;
pub mod snap;
pub mod snapshot;

pub use codec::{decode, encode};
pub use commands::{Released, Rotated};
pub use connect::{connected_pieces, edge_snap};
pub use error::{Rejection, ValidationError};
pub use grid::{GridSize, ALLOWED_GRID_SIZES, PUZZLE_CANVAS};
pub use protocol::{
    ApiRequest, ApiResponse, ClientMsg, CursorPosition, PieceEvent, PiecePosition, PieceRef,
    PieceRotated, PuzzleCompleted, RotateRequest, ServerMsg, SessionState, UserJoined, UserLeft,
};
pub use rotation::{RotateDirection, Rotation};
pub use session_id::{
    is_valid_session_id, new_image_id, ParticipantId, SessionId, SessionIdError, ID_ALPHABET,
    SESSION_ID_LEN,
};
pub use shape::{EdgeProfile, PieceShape, ShapeGrid};
pub use snap::{BoardGeometry, SnapConfig, SNAP_THRESHOLD_DEFAULT};
pub use snapshot::{
    image_id_from_url, image_url, Participant, Piece, Session, SessionBlueprint, CURSOR_PALETTE,
};
