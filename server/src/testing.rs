use std::sync::Arc;
use std::time::Duration;

use puzzlecoop_core::{
    image_url, GridSize, ParticipantId, Rotation, Session, SessionBlueprint, SessionId,
    SnapConfig, PUZZLE_CANVAS,
};
use puzzlecoop_image::PuzzleCutter;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::engine::SessionEngine;
use crate::store::{ImageRepository, KvStore, MemoryStore, SessionRepository};

/// A stored 3x3 session with every piece upright and two participants, Ann and Bob.
pub(crate) struct Seeded {
    pub engine: Arc<SessionEngine>,
    pub id: SessionId,
    pub ann: ParticipantId,
    pub bob: ParticipantId,
}

pub(crate) fn seeded() -> Seeded {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let sessions = SessionRepository::new(store.clone(), Duration::from_secs(60));
    let mut session = Session::from_blueprint(
        SessionBlueprint {
            id: SessionId::generate(),
            grid_size: GridSize::new(3).expect("grid"),
            image_url: image_url("board"),
            image_width: PUZZLE_CANVAS,
            image_height: PUZZLE_CANVAS,
            piece_image_urls: Vec::new(),
            created_at: 0,
        },
        &mut StdRng::seed_from_u64(9),
    );
    for piece in &mut session.pieces {
        piece.rotation = Rotation::Deg0;
    }
    let ann = session.add_participant("Ann").expect("join Ann").id;
    let bob = session.add_participant("Bob").expect("join Bob").id;
    sessions.save(&session).expect("save session");
    let engine = SessionEngine::new(
        sessions,
        ImageRepository::new(store, Duration::from_secs(60)),
        PuzzleCutter::default(),
        SnapConfig::default(),
        1024,
    );
    Seeded {
        engine: Arc::new(engine),
        id: session.id,
        ann,
        bob,
    }
}
