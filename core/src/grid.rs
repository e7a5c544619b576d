use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const ALLOWED_GRID_SIZES: [u32; 3] = [3, 5, 8];

/// Top-left corner of the assembly board.
pub const BOARD_ORIGIN_X: f64 = 50.0;
pub const BOARD_ORIGIN_Y: f64 = 50.0;

/// Edge length of the square the uploaded image is fitted into.
pub const PUZZLE_CANVAS: u32 = 480;

pub const SCATTER_GAP: u32 = 100;
pub const SCATTER_MAX_X: u32 = 1150;
pub const SCATTER_MAX_Y: u32 = 750;
pub const SCATTER_SPACING: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct GridSize(u32);

impl GridSize {
    pub fn new(size: u32) -> Result<Self, ValidationError> {
        if ALLOWED_GRID_SIZES.contains(&size) {
            Ok(Self(size))
        } else {
            Err(ValidationError::InvalidGridSize(size))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn piece_count(self) -> u32 {
        self.0 * self.0
    }
}

impl TryFrom<u32> for GridSize {
    type Error = ValidationError;

    fn try_from(size: u32) -> Result<Self, Self::Error> {
        Self::new(size)
    }
}

impl From<GridSize> for u32 {
    fn from(size: GridSize) -> Self {
        size.0
    }
}

/// Pixel size of one piece; integer division, the remainder of the canvas is unused.
pub fn piece_extent(canvas: u32, grid: GridSize) -> u32 {
    canvas / grid.get()
}

pub fn correct_position(row: u32, col: u32, piece_width: u32, piece_height: u32) -> (f64, f64) {
    (
        BOARD_ORIGIN_X + f64::from(col * piece_width),
        BOARD_ORIGIN_Y + f64::from(row * piece_height),
    )
}

/// Initial top-left positions for every piece, indexed by piece id. Pieces are laid out in
/// a loose grid to the right of the board with their slots shuffled.
pub fn scatter_positions<R: Rng>(
    rng: &mut R,
    grid: GridSize,
    canvas_width: u32,
    piece_width: u32,
    piece_height: u32,
) -> Vec<(f64, f64)> {
    let total = grid.piece_count();
    let mut slots: Vec<u32> = (0..total).collect();
    slots.shuffle(rng);

    let start_x = canvas_width + SCATTER_GAP;
    let available = SCATTER_MAX_X.saturating_sub(start_x);
    let stride = piece_width.max(piece_height) + SCATTER_SPACING;
    let scatter_cols = (available / stride).max(1).min(grid.get());

    slots
        .into_iter()
        .map(|slot| {
            let x = start_x + (slot % scatter_cols) * stride;
            let y = BOARD_ORIGIN_Y as u32 + (slot / scatter_cols) * stride;
            let x = x.min(SCATTER_MAX_X.saturating_sub(piece_width));
            let y = y.min(SCATTER_MAX_Y.saturating_sub(piece_height));
            (f64::from(x), f64::from(y))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn only_three_five_and_eight_are_allowed() {
        for size in 0..12 {
            let ok = GridSize::new(size).is_ok();
            assert_eq!(ok, ALLOWED_GRID_SIZES.contains(&size), "size {size}");
        }
        assert_eq!(GridSize::new(4), Err(ValidationError::InvalidGridSize(4)));
    }

    #[test]
    fn piece_extent_uses_integer_division() {
        let grid = GridSize::new(3).unwrap();
        assert_eq!(piece_extent(PUZZLE_CANVAS, grid), 160);
        let grid = GridSize::new(8).unwrap();
        assert_eq!(piece_extent(PUZZLE_CANVAS, grid), 60);
        assert_eq!(correct_position(1, 2, 160, 160), (370.0, 210.0));
    }

    #[test]
    fn scatter_stays_right_of_the_board_and_on_screen() {
        let mut rng = StdRng::seed_from_u64(5);
        for size in ALLOWED_GRID_SIZES {
            let grid = GridSize::new(size).unwrap();
            let extent = piece_extent(PUZZLE_CANVAS, grid);
            let positions = scatter_positions(&mut rng, grid, PUZZLE_CANVAS, extent, extent);
            assert_eq!(positions.len() as u32, grid.piece_count());
            for (x, y) in positions {
                assert!(x >= f64::from(PUZZLE_CANVAS + SCATTER_GAP));
                assert!(x + f64::from(extent) <= f64::from(SCATTER_MAX_X));
                assert!(y + f64::from(extent) <= f64::from(SCATTER_MAX_Y));
                assert!(y >= BOARD_ORIGIN_Y);
            }
        }
    }
}
