use crate::grid::{BOARD_ORIGIN_X, BOARD_ORIGIN_Y};
use crate::rotation::Rotation;
use crate::snapshot::{Piece, Session};

pub const SNAP_THRESHOLD_DEFAULT: f64 = 80.0;
pub const QUARTER_TURN_THRESHOLD_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapConfig {
    pub threshold: f64,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            threshold: SNAP_THRESHOLD_DEFAULT,
        }
    }
}

impl SnapConfig {
    pub fn effective_threshold(&self, rotation: Rotation) -> f64 {
        if rotation.is_quarter_turn() {
            self.threshold * QUARTER_TURN_THRESHOLD_FACTOR
        } else {
            self.threshold
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardGeometry {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_width: f64,
    pub cell_height: f64,
    pub grid: u32,
}

impl BoardGeometry {
    pub fn of(session: &Session) -> Self {
        let grid = session.grid_size.get();
        Self {
            origin_x: BOARD_ORIGIN_X,
            origin_y: BOARD_ORIGIN_Y,
            cell_width: f64::from(session.image_width / grid),
            cell_height: f64::from(session.image_height / grid),
            grid,
        }
    }

    pub fn cell_origin(&self, row: u32, col: u32) -> (f64, f64) {
        (
            self.origin_x + f64::from(col) * self.cell_width,
            self.origin_y + f64::from(row) * self.cell_height,
        )
    }

    fn in_bounds(&self, row: i64, col: i64) -> bool {
        let n = i64::from(self.grid);
        (0..n).contains(&row) && (0..n).contains(&col)
    }

    /// Cell index of the top-left corner `(x, y)`, truncating toward zero. A corner up to
    /// one cell left of or above the board therefore still counts as row or column 0.
    pub fn cell_containing(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let col = ((x - self.origin_x) / self.cell_width).trunc() as i64;
        let row = ((y - self.origin_y) / self.cell_height).trunc() as i64;
        if self.in_bounds(row, col) {
            Some((row as u32, col as u32))
        } else {
            None
        }
    }

    /// Nearest in-bounds cell to a piece whose top-left is dropped at `(x, y)`, searching the
    /// 3x3 neighborhood of the rounded cell. Returns `(row, col, distance)` between centers.
    pub fn nearest_cell(&self, x: f64, y: f64) -> Option<(u32, u32, f64)> {
        let center_x = x + self.cell_width / 2.0;
        let center_y = y + self.cell_height / 2.0;
        let guess_col = ((center_x - self.origin_x) / self.cell_width).round() as i64;
        let guess_row = ((center_y - self.origin_y) / self.cell_height).round() as i64;

        let mut best: Option<(u32, u32, f64)> = None;
        for row in guess_row - 1..=guess_row + 1 {
            for col in guess_col - 1..=guess_col + 1 {
                if !self.in_bounds(row, col) {
                    continue;
                }
                let (cell_x, cell_y) = self.cell_origin(row as u32, col as u32);
                let cell_center_x = cell_x + self.cell_width / 2.0;
                let cell_center_y = cell_y + self.cell_height / 2.0;
                let distance = (center_x - cell_center_x).hypot(center_y - cell_center_y);
                if best.map_or(true, |(_, _, d)| distance < d) {
                    best = Some((row as u32, col as u32, distance));
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReleaseResolution {
    pub x: f64,
    pub y: f64,
    /// Cell the piece snapped into, if any.
    pub snapped: Option<(u32, u32)>,
    pub on_target: bool,
}

/// Decides where a released piece comes to rest and whether it lands in its own cell with
/// the correct rotation.
pub fn resolve_release(
    geometry: &BoardGeometry,
    piece: &Piece,
    x: f64,
    y: f64,
    config: &SnapConfig,
) -> ReleaseResolution {
    let unsnapped = ReleaseResolution {
        x,
        y,
        snapped: None,
        on_target: false,
    };
    let Some((row, col, distance)) = geometry.nearest_cell(x, y) else {
        return unsnapped;
    };
    if distance > config.effective_threshold(piece.rotation) {
        return unsnapped;
    }
    let (snap_x, snap_y) = geometry.cell_origin(row, col);
    ReleaseResolution {
        x: snap_x,
        y: snap_y,
        snapped: Some((row, col)),
        on_target: row == piece.row && col == piece.col && piece.rotation == piece.correct_rotation,
    }
}

/// Placement test used after a rotation: the piece stays where it is, so only the cell it
/// currently occupies and its orientation matter.
pub fn occupies_target(geometry: &BoardGeometry, piece: &Piece) -> bool {
    geometry.cell_containing(piece.current_x, piece.current_y) == Some((piece.row, piece.col))
        && piece.rotation == piece.correct_rotation
}

pub fn is_complete(pieces: &[Piece]) -> bool {
    pieces.iter().all(Piece::is_correct)
}
