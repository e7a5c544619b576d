//! Per-piece exclusive ownership. A piece has at most one owner; re-locking by the owner is
//! a no-op success.

use crate::session_id::ParticipantId;
use crate::snapshot::Piece;

pub fn lock(piece: &mut Piece, who: &ParticipantId) -> bool {
    match &piece.locked_by {
        Some(owner) if owner != who => false,
        _ => {
            piece.locked_by = Some(who.clone());
            true
        }
    }
}

pub fn unlock(piece: &mut Piece, who: &ParticipantId) -> bool {
    if piece.locked_by.as_ref() == Some(who) {
        piece.locked_by = None;
        true
    } else {
        false
    }
}

pub fn is_locked_by_other(piece: &Piece, who: &ParticipantId) -> bool {
    piece
        .locked_by
        .as_ref()
        .is_some_and(|owner| owner != who)
}

/// Clears every lock held by `who` and returns the ids of the pieces that were freed.
pub fn release_all_locks_of(pieces: &mut [Piece], who: &ParticipantId) -> Vec<u32> {
    let mut freed = Vec::new();
    for piece in pieces.iter_mut() {
        if piece.locked_by.as_ref() == Some(who) {
            piece.locked_by = None;
            freed.push(piece.id);
        }
    }
    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::Rotation;
    use crate::shape::{EdgeProfile, PieceShape};

    fn piece(id: u32) -> Piece {
        let flat = EdgeProfile::Flat;
        Piece {
            id,
            row: 0,
            col: id,
            current_x: 0.0,
            current_y: 0.0,
            correct_x: 0.0,
            correct_y: 0.0,
            width: 10,
            height: 10,
            image_url: None,
            placed: false,
            placed_by: None,
            locked_by: None,
            rotation: Rotation::Deg0,
            correct_rotation: Rotation::Deg0,
            shape: PieceShape {
                top_edge: flat,
                right_edge: flat,
                bottom_edge: flat,
                left_edge: flat,
            },
        }
    }

    #[test]
    fn lock_is_exclusive_and_idempotent() {
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");
        let mut p = piece(0);
        assert!(lock(&mut p, &a));
        assert!(lock(&mut p, &a));
        assert!(!lock(&mut p, &b));
        assert_eq!(p.locked_by, Some(a.clone()));
        assert!(is_locked_by_other(&p, &b));
        assert!(!is_locked_by_other(&p, &a));
    }

    #[test]
    fn only_owner_unlocks() {
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");
        let mut p = piece(0);
        assert!(!unlock(&mut p, &a));
        lock(&mut p, &a);
        assert!(!unlock(&mut p, &b));
        assert!(unlock(&mut p, &a));
        assert!(p.locked_by.is_none());
        assert!(lock(&mut p, &b));
    }

    #[test]
    fn release_all_only_touches_the_given_owner() {
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");
        let mut pieces: Vec<Piece> = (0..4).map(piece).collect();
        lock(&mut pieces[0], &a);
        lock(&mut pieces[1], &b);
        lock(&mut pieces[3], &a);
        assert_eq!(release_all_locks_of(&mut pieces, &a), vec![0, 3]);
        assert!(pieces[0].locked_by.is_none());
        assert_eq!(pieces[1].locked_by, Some(b));
        assert!(release_all_locks_of(&mut pieces, &a).is_empty());
    }
}
