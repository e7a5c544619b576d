use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::grid::{correct_position, piece_extent, scatter_positions, GridSize};
use crate::rotation::Rotation;
use crate::session_id::{ParticipantId, SessionId};
use crate::shape::{self, PieceShape};

pub const CURSOR_PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FECA57", "#FF9FF3", "#54A0FF", "#48DBFB",
    "#1DD1A1", "#F368E0",
];

pub fn image_url(image_id: &str) -> String {
    format!("/api/images/{image_id}")
}

/// Inverse of [`image_url`].
pub fn image_id_from_url(url: &str) -> Option<&str> {
    url.strip_prefix("/api/images/").filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Piece {
    pub id: u32,
    pub row: u32,
    pub col: u32,
    pub current_x: f64,
    pub current_y: f64,
    pub correct_x: f64,
    pub correct_y: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(rename = "isPlaced")]
    pub placed: bool,
    pub placed_by: Option<ParticipantId>,
    pub locked_by: Option<ParticipantId>,
    pub rotation: Rotation,
    pub correct_rotation: Rotation,
    pub shape: PieceShape,
}

impl Piece {
    pub fn is_correct(&self) -> bool {
        self.placed && self.rotation == self.correct_rotation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub color: String,
    pub cursor_x: Option<f64>,
    pub cursor_y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub image_url: String,
    pub grid_size: GridSize,
    pub total_pieces: u32,
    pub pieces: Vec<Piece>,
    #[serde(rename = "users")]
    pub participants: BTreeMap<ParticipantId, Participant>,
    pub created_at: i64,
    pub completed: bool,
    pub image_width: u32,
    pub image_height: u32,
}

/// Everything needed to lay out a fresh session once its image has been processed.
#[derive(Debug, Clone)]
pub struct SessionBlueprint {
    pub id: SessionId,
    pub grid_size: GridSize,
    pub image_url: String,
    pub image_width: u32,
    pub image_height: u32,
    /// Row-major, one per piece. Missing entries leave the piece without a bitmap.
    pub piece_image_urls: Vec<String>,
    pub created_at: i64,
}

impl Session {
    pub fn from_blueprint<R: Rng>(blueprint: SessionBlueprint, rng: &mut R) -> Self {
        let grid = blueprint.grid_size;
        let n = grid.get();
        let piece_width = piece_extent(blueprint.image_width, grid);
        let piece_height = piece_extent(blueprint.image_height, grid);
        let shapes = shape::generate(rng, n as usize, n as usize);
        let scatter = scatter_positions(
            rng,
            grid,
            blueprint.image_width,
            piece_width,
            piece_height,
        );
        let mut urls = blueprint.piece_image_urls.into_iter();

        let mut pieces = Vec::with_capacity(grid.piece_count() as usize);
        for row in 0..n {
            for col in 0..n {
                let id = row * n + col;
                let (correct_x, correct_y) = correct_position(row, col, piece_width, piece_height);
                let (current_x, current_y) = scatter[id as usize];
                pieces.push(Piece {
                    id,
                    row,
                    col,
                    current_x,
                    current_y,
                    correct_x,
                    correct_y,
                    width: piece_width,
                    height: piece_height,
                    image_url: urls.next(),
                    placed: false,
                    placed_by: None,
                    locked_by: None,
                    rotation: Rotation::random(rng),
                    correct_rotation: Rotation::Deg0,
                    shape: shapes[row as usize][col as usize],
                });
            }
        }

        Self {
            id: blueprint.id,
            image_url: blueprint.image_url,
            grid_size: grid,
            total_pieces: grid.piece_count(),
            pieces,
            participants: BTreeMap::new(),
            created_at: blueprint.created_at,
            completed: false,
            image_width: blueprint.image_width,
            image_height: blueprint.image_height,
        }
    }

    pub fn piece(&self, id: u32) -> Option<&Piece> {
        self.pieces.get(id as usize).filter(|piece| piece.id == id)
    }

    pub fn shape_grid(&self) -> Vec<Vec<PieceShape>> {
        self.pieces
            .chunks(self.grid_size.get() as usize)
            .map(|row| row.iter().map(|piece| piece.shape).collect())
            .collect()
    }

    pub fn next_color(&self) -> &'static str {
        CURSOR_PALETTE[self.participants.len() % CURSOR_PALETTE.len()]
    }
}
