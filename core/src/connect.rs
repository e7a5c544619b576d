//! Edge-based connectivity between loose pieces. Two pieces are connected when they sit one
//! cell apart along an axis and the edges facing each other interlock. Completion never
//! looks at this; it is a query for clients that want to move clusters.

use std::collections::VecDeque;

use crate::snapshot::{Piece, Session};

pub const POSITION_TOLERANCE: f64 = 5.0;
pub const EDGE_SNAP_THRESHOLD: f64 = 20.0;

fn cell_size(session: &Session) -> (f64, f64) {
    let n = session.grid_size.get();
    (
        f64::from(session.image_width / n),
        f64::from(session.image_height / n),
    )
}

fn are_connected(a: &Piece, b: &Piece, width: f64, height: f64) -> bool {
    let dx = (a.current_x - b.current_x).abs();
    let dy = (a.current_y - b.current_y).abs();

    if (dx - width).abs() <= POSITION_TOLERANCE && dy <= POSITION_TOLERANCE {
        return if a.current_x < b.current_x {
            a.shape.right_edge.is_compatible_with(b.shape.left_edge)
        } else {
            a.shape.left_edge.is_compatible_with(b.shape.right_edge)
        };
    }
    if (dy - height).abs() <= POSITION_TOLERANCE && dx <= POSITION_TOLERANCE {
        return if a.current_y < b.current_y {
            a.shape.bottom_edge.is_compatible_with(b.shape.top_edge)
        } else {
            a.shape.top_edge.is_compatible_with(b.shape.bottom_edge)
        };
    }
    false
}

/// Ids of every piece reachable from `start` through connected neighbors, `start` first.
/// Empty when `start` does not exist.
pub fn connected_pieces(session: &Session, start: u32) -> Vec<u32> {
    let Some(start_idx) = session.pieces.iter().position(|piece| piece.id == start) else {
        return Vec::new();
    };
    let (width, height) = cell_size(session);
    let mut visited = vec![false; session.pieces.len()];
    let mut queue = VecDeque::new();
    let mut group = Vec::new();
    visited[start_idx] = true;
    queue.push_back(start_idx);

    while let Some(idx) = queue.pop_front() {
        group.push(session.pieces[idx].id);
        for (other, piece) in session.pieces.iter().enumerate() {
            if !visited[other] && are_connected(&session.pieces[idx], piece, width, height) {
                visited[other] = true;
                queue.push_back(other);
            }
        }
    }
    group
}

/// Position that docks piece `id`, dropped at `(x, y)`, against the first neighbor it
/// interlocks with, if that spot is within [`EDGE_SNAP_THRESHOLD`].
pub fn edge_snap(session: &Session, id: u32, x: f64, y: f64) -> Option<(f64, f64)> {
    let dragged = session.piece(id)?;
    let (width, height) = cell_size(session);

    for target in session.pieces.iter().filter(|piece| piece.id != id) {
        // (edge of dragged, facing edge of target, dragged offset relative to target)
        let pairings = [
            (dragged.shape.top_edge, target.shape.bottom_edge, 0.0, height),
            (dragged.shape.right_edge, target.shape.left_edge, -width, 0.0),
            (dragged.shape.bottom_edge, target.shape.top_edge, 0.0, -height),
            (dragged.shape.left_edge, target.shape.right_edge, width, 0.0),
        ];
        for (own, facing, offset_x, offset_y) in pairings {
            if !own.is_compatible_with(facing) {
                continue;
            }
            let expected_x = target.current_x + offset_x;
            let expected_y = target.current_y + offset_y;
            if (x - expected_x).hypot(y - expected_y) <= EDGE_SNAP_THRESHOLD {
                return Some((expected_x, expected_y));
            }
        }
    }
    None
}
