use rand::Rng;
use serde::{Deserialize, Serialize};

/// Serialized as `{"type": "TAB"}` so clients can hang curve details off the same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeProfile {
    Flat,
    Tab,
    Cutout,
}

impl EdgeProfile {
    pub fn complement(self) -> Self {
        match self {
            EdgeProfile::Flat => EdgeProfile::Flat,
            EdgeProfile::Tab => EdgeProfile::Cutout,
            EdgeProfile::Cutout => EdgeProfile::Tab,
        }
    }

    /// Two edges interlock when neither is flat and exactly one of them is a tab.
    pub fn is_compatible_with(self, other: EdgeProfile) -> bool {
        matches!(
            (self, other),
            (EdgeProfile::Tab, EdgeProfile::Cutout) | (EdgeProfile::Cutout, EdgeProfile::Tab)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceShape {
    pub top_edge: EdgeProfile,
    pub right_edge: EdgeProfile,
    pub bottom_edge: EdgeProfile,
    pub left_edge: EdgeProfile,
}

pub type ShapeGrid = Vec<Vec<PieceShape>>;

fn random_interior<R: Rng>(rng: &mut R) -> EdgeProfile {
    if rng.random_bool(0.5) {
        EdgeProfile::Tab
    } else {
        EdgeProfile::Cutout
    }
}

fn initial_shape<R: Rng>(
    rng: &mut R,
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
) -> PieceShape {
    let mut edge = |border: bool| {
        if border {
            EdgeProfile::Flat
        } else {
            random_interior(&mut *rng)
        }
    };
    PieceShape {
        top_edge: edge(row == 0),
        right_edge: edge(col + 1 == cols),
        bottom_edge: edge(row + 1 == rows),
        left_edge: edge(col == 0),
    }
}

fn reconcile(current: EdgeProfile, neighbor: &mut EdgeProfile) {
    if current == EdgeProfile::Flat || *neighbor == EdgeProfile::Flat {
        return;
    }
    if current == *neighbor {
        *neighbor = current.complement();
    }
}

/// Builds a `rows x cols` grid of edge profiles where every border edge is flat and every
/// pair of touching interior edges interlocks.
///
/// The second pass walks cells in row-major order and only ever rewrites the edge of an
/// already-visited neighbor, so by the time a cell is left behind both of its back-facing
/// seams are final.
pub fn generate<R: Rng>(rng: &mut R, rows: usize, cols: usize) -> ShapeGrid {
    let mut grid: ShapeGrid = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut line = Vec::with_capacity(cols);
        for col in 0..cols {
            line.push(initial_shape(rng, row, col, rows, cols));
        }
        grid.push(line);
    }

    for row in 0..rows {
        for col in 0..cols {
            if row > 0 {
                let top = grid[row][col].top_edge;
                reconcile(top, &mut grid[row - 1][col].bottom_edge);
            }
            if col > 0 {
                let left = grid[row][col].left_edge;
                reconcile(left, &mut grid[row][col - 1].right_edge);
            }
        }
    }
    grid
}

pub fn validate(grid: &[Vec<PieceShape>]) -> bool {
    let rows = grid.len();
    if rows == 0 {
        return true;
    }
    let cols = grid[0].len();
    if grid.iter().any(|line| line.len() != cols) {
        return false;
    }
    for (row, line) in grid.iter().enumerate() {
        for (col, shape) in line.iter().enumerate() {
            let edges = [
                (shape.top_edge, row == 0),
                (shape.right_edge, col + 1 == cols),
                (shape.bottom_edge, row + 1 == rows),
                (shape.left_edge, col == 0),
            ];
            for (edge, border) in edges {
                if border != (edge == EdgeProfile::Flat) {
                    return false;
                }
            }
            if col + 1 < cols && !shape.right_edge.is_compatible_with(line[col + 1].left_edge) {
                return false;
            }
            if row + 1 < rows && !shape.bottom_edge.is_compatible_with(grid[row + 1][col].top_edge)
            {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn compatibility_requires_one_tab_and_one_cutout() {
        use EdgeProfile::*;
        assert!(Tab.is_compatible_with(Cutout));
        assert!(Cutout.is_compatible_with(Tab));
        assert!(!Tab.is_compatible_with(Tab));
        assert!(!Cutout.is_compatible_with(Cutout));
        assert!(!Flat.is_compatible_with(Tab));
        assert!(!Flat.is_compatible_with(Flat));
    }

    #[test]
    fn generated_grids_always_validate() {
        for seed in 0..64u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            for size in [1usize, 2, 3, 5, 8] {
                let grid = generate(&mut rng, size, size);
                assert!(validate(&grid), "seed {seed} size {size}");
            }
            let grid = generate(&mut rng, 3, 7);
            assert!(validate(&grid), "seed {seed} 3x7");
        }
    }

    #[test]
    fn border_edges_are_flat() {
        let mut rng = StdRng::seed_from_u64(7);
        let grid = generate(&mut rng, 5, 5);
        for col in 0..5 {
            assert_eq!(grid[0][col].top_edge, EdgeProfile::Flat);
            assert_eq!(grid[4][col].bottom_edge, EdgeProfile::Flat);
        }
        for row in 0..5 {
            assert_eq!(grid[row][0].left_edge, EdgeProfile::Flat);
            assert_eq!(grid[row][4].right_edge, EdgeProfile::Flat);
        }
        assert_ne!(grid[2][2].top_edge, EdgeProfile::Flat);
    }

    #[test]
    fn validate_rejects_clashing_seam() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut grid = generate(&mut rng, 3, 3);
        let right = grid[1][0].right_edge;
        grid[1][1].left_edge = right;
        assert!(!validate(&grid));
    }

    #[test]
    fn validate_rejects_non_flat_border() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut grid = generate(&mut rng, 3, 3);
        grid[0][1].top_edge = EdgeProfile::Tab;
        assert!(!validate(&grid));
    }

    #[test]
    fn edges_serialize_as_typed_objects() {
        let shape = PieceShape {
            top_edge: EdgeProfile::Flat,
            right_edge: EdgeProfile::Tab,
            bottom_edge: EdgeProfile::Cutout,
            left_edge: EdgeProfile::Flat,
        };
        let value = serde_json::to_value(shape).unwrap();
        assert_eq!(value["topEdge"], serde_json::json!({ "type": "FLAT" }));
        assert_eq!(value["rightEdge"], serde_json::json!({ "type": "TAB" }));
        assert_eq!(value["bottomEdge"], serde_json::json!({ "type": "CUTOUT" }));

        let parsed: PieceShape = serde_json::from_str(
            r#"{"topEdge":{"type":"TAB"},"rightEdge":{"type":"FLAT"},
                "bottomEdge":{"type":"FLAT"},"leftEdge":{"type":"CUTOUT","curve":1}}"#,
        )
        .unwrap();
        assert_eq!(parsed.top_edge, EdgeProfile::Tab);
        assert_eq!(parsed.left_edge, EdgeProfile::Cutout);
    }
}
