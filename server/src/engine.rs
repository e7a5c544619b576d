//! Session lifecycle and piece commands on top of the snapshot store. Every mutation is a
//! load, apply, save cycle run while holding that session's lane.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use puzzlecoop_core::{
    image_url, new_image_id, GridSize, Participant, ParticipantId, Rejection, Released,
    RotateDirection, Rotated, Session, SessionBlueprint, SessionId, SnapConfig, ValidationError,
};
use puzzlecoop_image::{sniff_format, PipelineError, PuzzleCutter};
use thiserror::Error;

use crate::store::{ImageRepository, SessionRepository, StoreError};

const ACCEPTED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Image(#[from] PipelineError),
    #[error("image {0} not found")]
    ImageNotFound(String),
}

impl EngineError {
    /// Refusals that are part of normal play, as opposed to faults.
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            EngineError::Rejected(_) | EngineError::Invalid(_) | EngineError::ImageNotFound(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Rejected(
                Rejection::SessionNotFound(_)
                | Rejection::PieceNotFound(_)
                | Rejection::ParticipantNotFound(_),
            )
            | EngineError::ImageNotFound(_) => "not_found",
            EngineError::Rejected(_) => "conflict",
            EngineError::Invalid(_) => "validation",
            EngineError::Store(_) => "storage",
            EngineError::Image(_) => "image",
        }
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct SessionEngine {
    sessions: SessionRepository,
    images: ImageRepository,
    cutter: PuzzleCutter,
    snap: SnapConfig,
    max_upload_bytes: usize,
    lanes: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionEngine {
    pub fn new(
        sessions: SessionRepository,
        images: ImageRepository,
        cutter: PuzzleCutter,
        snap: SnapConfig,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            sessions,
            images,
            cutter,
            snap,
            max_upload_bytes,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn snap_config(&self) -> SnapConfig {
        self.snap
    }

    /// Validates and cuts the upload, stores the board and piece bitmaps, and persists a
    /// freshly scattered session.
    pub fn create_session(
        &self,
        image: &[u8],
        content_type: &str,
        grid_size: u32,
    ) -> Result<Session, EngineError> {
        let grid = GridSize::new(grid_size)?;
        self.check_upload(image, content_type)?;

        let cut = self.cutter.cut(image, grid.get())?;
        let board_id = new_image_id();
        self.images.save(&board_id, cut.board.bytes)?;
        let mut piece_image_urls = Vec::with_capacity(cut.pieces.len());
        for piece in cut.pieces {
            let piece_id = new_image_id();
            self.images.save(&piece_id, piece.bytes)?;
            piece_image_urls.push(image_url(&piece_id));
        }

        let mut id = SessionId::generate();
        while self.sessions.load(&id)?.is_some() {
            id = SessionId::generate();
        }
        let blueprint = SessionBlueprint {
            id,
            grid_size: grid,
            image_url: image_url(&board_id),
            image_width: cut.board.width,
            image_height: cut.board.height,
            piece_image_urls,
            created_at: now_ms(),
        };
        let session = Session::from_blueprint(blueprint, &mut rand::rng());
        self.sessions.save(&session)?;
        tracing::info!(
            session = %session.id,
            grid = grid.get(),
            pieces = session.total_pieces,
            "session created"
        );
        Ok(session)
    }

    fn check_upload(&self, image: &[u8], content_type: &str) -> Result<(), ValidationError> {
        if image.is_empty() {
            return Err(ValidationError::EmptyUpload);
        }
        if image.len() > self.max_upload_bytes {
            return Err(ValidationError::UploadTooLarge {
                size: image.len(),
                limit: self.max_upload_bytes,
            });
        }
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !ACCEPTED_CONTENT_TYPES.contains(&mime.as_str()) {
            return Err(ValidationError::UnsupportedFormat);
        }
        sniff_format(image)
            .map(|_| ())
            .ok_or(ValidationError::UnsupportedFormat)
    }

    /// Fetches the snapshot and refreshes its expiry.
    pub fn get_session(&self, id: &SessionId) -> Result<Session, EngineError> {
        let session = self
            .sessions
            .load(id)?
            .ok_or_else(|| Rejection::SessionNotFound(id.clone()))?;
        self.sessions.touch(id)?;
        Ok(session)
    }

    pub fn join_session(&self, id: &SessionId, name: &str) -> Result<Participant, EngineError> {
        let participant = self.mutate(id, |session| Ok(session.add_participant(name)?))?;
        tracing::info!(session = %id, participant = %participant.id, "participant joined");
        Ok(participant)
    }

    /// Removes the participant and returns the pieces whose locks it held.
    pub fn leave_session(
        &self,
        id: &SessionId,
        who: &ParticipantId,
    ) -> Result<Vec<u32>, EngineError> {
        self.mutate(id, |session| Ok(session.remove_participant(who)))
    }

    pub fn move_piece(
        &self,
        id: &SessionId,
        piece: u32,
        x: f64,
        y: f64,
        who: &ParticipantId,
    ) -> Result<(), EngineError> {
        self.mutate(id, |session| Ok(session.move_piece(piece, x, y, who)?))
    }

    pub fn release_piece(
        &self,
        id: &SessionId,
        piece: u32,
        x: f64,
        y: f64,
        who: &ParticipantId,
    ) -> Result<Released, EngineError> {
        let snap = self.snap;
        self.mutate(id, |session| {
            Ok(session.release_piece(piece, x, y, who, &snap)?)
        })
    }

    pub fn lock_piece(
        &self,
        id: &SessionId,
        piece: u32,
        who: &ParticipantId,
    ) -> Result<(), EngineError> {
        self.mutate(id, |session| Ok(session.lock_piece(piece, who)?))
    }

    pub fn unlock_piece(
        &self,
        id: &SessionId,
        piece: u32,
        who: &ParticipantId,
    ) -> Result<(), EngineError> {
        self.mutate(id, |session| Ok(session.unlock_piece(piece, who)?))
    }

    pub fn rotate_piece(
        &self,
        id: &SessionId,
        piece: u32,
        direction: RotateDirection,
        who: &ParticipantId,
    ) -> Result<Rotated, EngineError> {
        self.mutate(id, |session| {
            Ok(session.rotate_piece(piece, direction, who)?)
        })
    }

    pub fn update_cursor(
        &self,
        id: &SessionId,
        who: &ParticipantId,
        x: f64,
        y: f64,
    ) -> Result<(), EngineError> {
        self.mutate(id, |session| Ok(session.update_cursor(who, x, y)?))
    }

    /// Drops a stale lock if `owner` still holds it.
    pub fn expire_lock(
        &self,
        id: &SessionId,
        piece: u32,
        owner: &ParticipantId,
    ) -> Result<bool, EngineError> {
        self.mutate(id, |session| Ok(session.expire_lock(piece, owner)))
    }

    pub fn image(&self, image_id: &str) -> Result<Vec<u8>, EngineError> {
        self.images
            .load(image_id)?
            .ok_or_else(|| EngineError::ImageNotFound(image_id.to_string()))
    }

    fn mutate<T>(
        &self,
        id: &SessionId,
        apply: impl FnOnce(&mut Session) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let lane = self.lane(id);
        let result = {
            let _turn = lane.lock().unwrap_or_else(PoisonError::into_inner);
            self.apply_and_save(id, apply)
        };
        drop(lane);
        self.prune_lane(id);
        result
    }

    fn apply_and_save<T>(
        &self,
        id: &SessionId,
        apply: impl FnOnce(&mut Session) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut session = self
            .sessions
            .load(id)?
            .ok_or_else(|| Rejection::SessionNotFound(id.clone()))?;
        let out = apply(&mut session)?;
        self.sessions.save(&session)?;
        Ok(out)
    }

    fn lane(&self, id: &SessionId) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        lanes.entry(id.clone()).or_default().clone()
    }

    /// Lanes are cloned only under the map lock, so a count of one means nobody is waiting.
    fn prune_lane(&self, id: &SessionId) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        if lanes
            .get(id)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            lanes.remove(id);
        }
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
