//! Piece and participant commands against an in-memory [`Session`]. Every method either
//! mutates and returns what changed, or rejects without touching the session.

use crate::error::{Rejection, ValidationError};
use crate::lock;
use crate::rotation::{RotateDirection, Rotation};
use crate::session_id::ParticipantId;
use crate::snap::{is_complete, occupies_target, resolve_release, BoardGeometry, SnapConfig};
use crate::snapshot::{Participant, Piece, Session};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Released {
    pub x: f64,
    pub y: f64,
    pub newly_placed: bool,
    pub completed_now: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotated {
    pub rotation: Rotation,
    pub newly_placed: bool,
    pub completed_now: bool,
}

impl Session {
    fn ensure_open(&self) -> Result<(), Rejection> {
        if self.completed {
            Err(Rejection::Completed)
        } else {
            Ok(())
        }
    }

    fn piece_index(&self, id: u32) -> Result<usize, Rejection> {
        self.pieces
            .iter()
            .position(|piece| piece.id == id)
            .ok_or(Rejection::PieceNotFound(id))
    }

    /// Index of a piece `who` may manipulate.
    fn movable_piece(&self, id: u32, who: &ParticipantId) -> Result<usize, Rejection> {
        self.ensure_open()?;
        let idx = self.piece_index(id)?;
        let piece = &self.pieces[idx];
        if lock::is_locked_by_other(piece, who) {
            return Err(locked_by_other(piece));
        }
        Ok(idx)
    }

    /// Marks completion if every piece is in place. Returns true on the transition only.
    fn settle_completion(&mut self) -> bool {
        if !self.completed && is_complete(&self.pieces) {
            self.completed = true;
            return true;
        }
        false
    }

    pub fn move_piece(
        &mut self,
        id: u32,
        x: f64,
        y: f64,
        who: &ParticipantId,
    ) -> Result<(), Rejection> {
        let idx = self.movable_piece(id, who)?;
        let piece = &mut self.pieces[idx];
        piece.current_x = x;
        piece.current_y = y;
        Ok(())
    }

    pub fn release_piece(
        &mut self,
        id: u32,
        x: f64,
        y: f64,
        who: &ParticipantId,
        config: &SnapConfig,
    ) -> Result<Released, Rejection> {
        let idx = self.movable_piece(id, who)?;
        let geometry = BoardGeometry::of(self);
        let piece = &mut self.pieces[idx];
        let resolution = resolve_release(&geometry, piece, x, y, config);
        piece.current_x = resolution.x;
        piece.current_y = resolution.y;

        let newly_placed = resolution.on_target && !piece.placed;
        if resolution.on_target {
            if newly_placed {
                piece.placed_by = Some(who.clone());
            }
            piece.placed = true;
        } else {
            piece.placed = false;
        }

        let completed_now = resolution.on_target && self.settle_completion();
        Ok(Released {
            x: resolution.x,
            y: resolution.y,
            newly_placed,
            completed_now,
        })
    }

    pub fn lock_piece(&mut self, id: u32, who: &ParticipantId) -> Result<(), Rejection> {
        self.ensure_open()?;
        let idx = self.piece_index(id)?;
        let piece = &mut self.pieces[idx];
        if lock::lock(piece, who) {
            Ok(())
        } else {
            Err(locked_by_other(piece))
        }
    }

    pub fn unlock_piece(&mut self, id: u32, who: &ParticipantId) -> Result<(), Rejection> {
        let idx = self.piece_index(id)?;
        if lock::unlock(&mut self.pieces[idx], who) {
            Ok(())
        } else {
            Err(Rejection::NotLockOwner {
                piece: id,
                participant: who.clone(),
            })
        }
    }

    pub fn rotate_piece(
        &mut self,
        id: u32,
        direction: RotateDirection,
        who: &ParticipantId,
    ) -> Result<Rotated, Rejection> {
        let idx = self.movable_piece(id, who)?;
        let geometry = BoardGeometry::of(self);
        let piece = &mut self.pieces[idx];
        piece.rotation = piece.rotation.rotated(direction);

        let in_place = occupies_target(&geometry, piece);
        let mut newly_placed = false;
        if piece.placed {
            if !in_place {
                piece.placed = false;
                piece.placed_by = None;
            }
        } else if in_place {
            piece.placed = true;
            piece.placed_by = Some(who.clone());
            newly_placed = true;
        }
        let rotation = piece.rotation;

        let completed_now = newly_placed && self.settle_completion();
        Ok(Rotated {
            rotation,
            newly_placed,
            completed_now,
        })
    }

    pub fn update_cursor(
        &mut self,
        who: &ParticipantId,
        x: f64,
        y: f64,
    ) -> Result<(), Rejection> {
        let participant = self
            .participants
            .get_mut(who)
            .ok_or_else(|| Rejection::ParticipantNotFound(who.clone()))?;
        participant.cursor_x = Some(x);
        participant.cursor_y = Some(y);
        Ok(())
    }

    /// Adds a participant under a fresh id, with a color picked by the current head count.
    pub fn add_participant(&mut self, name: &str) -> Result<Participant, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::BlankName);
        }
        let mut id = ParticipantId::generate();
        while self.participants.contains_key(&id) {
            id = ParticipantId::generate();
        }
        let participant = Participant {
            id: id.clone(),
            name: name.to_string(),
            color: self.next_color().to_string(),
            cursor_x: None,
            cursor_y: None,
        };
        self.participants.insert(id, participant.clone());
        Ok(participant)
    }

    /// Drops the participant and every lock it holds. Returns the freed piece ids; locks
    /// are released even when the participant was never registered.
    pub fn remove_participant(&mut self, who: &ParticipantId) -> Vec<u32> {
        self.participants.remove(who);
        lock::release_all_locks_of(&mut self.pieces, who)
    }

    /// Releases a lock on behalf of the lease sweeper. Succeeds only if `owner` still holds it.
    pub fn expire_lock(&mut self, id: u32, owner: &ParticipantId) -> bool {
        self.piece_index(id)
            .map(|idx| lock::unlock(&mut self.pieces[idx], owner))
            .unwrap_or(false)
    }
}

fn locked_by_other(piece: &Piece) -> Rejection {
    match &piece.locked_by {
        Some(owner) => Rejection::LockedByOther {
            piece: piece.id,
            owner: owner.clone(),
        },
        None => Rejection::PieceNotFound(piece.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridSize, PUZZLE_CANVAS};
    use crate::session_id::SessionId;
    use crate::snapshot::{image_url, SessionBlueprint, CURSOR_PALETTE};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn session(size: u32) -> Session {
        let mut rng = StdRng::seed_from_u64(u64::from(size));
        Session::from_blueprint(
            SessionBlueprint {
                id: SessionId::generate(),
                grid_size: GridSize::new(size).unwrap(),
                image_url: image_url("img"),
                image_width: PUZZLE_CANVAS,
                image_height: PUZZLE_CANVAS,
                piece_image_urls: Vec::new(),
                created_at: 0,
            },
            &mut rng,
        )
    }

    fn upright(session: &mut Session) {
        for piece in &mut session.pieces {
            piece.rotation = Rotation::Deg0;
        }
    }

    #[test]
    fn release_on_target_places_and_records_placer() {
        let mut s = session(3);
        upright(&mut s);
        let a = ParticipantId::from("a");
        let out = s
            .release_piece(4, 215.0, 205.0, &a, &SnapConfig::default())
            .unwrap();
        assert_eq!((out.x, out.y), (210.0, 210.0));
        assert!(out.newly_placed);
        assert!(!out.completed_now);
        assert!(s.pieces[4].placed);
        assert_eq!(s.pieces[4].placed_by, Some(a.clone()));

        let b = ParticipantId::from("b");
        let again = s
            .release_piece(4, 212.0, 208.0, &b, &SnapConfig::default())
            .unwrap();
        assert!(!again.newly_placed);
        assert_eq!(s.pieces[4].placed_by, Some(a));
    }

    #[test]
    fn release_far_away_keeps_drop_point_and_unplaces() {
        let mut s = session(3);
        upright(&mut s);
        let a = ParticipantId::from("a");
        s.release_piece(0, 50.0, 50.0, &a, &SnapConfig::default())
            .unwrap();
        assert!(s.pieces[0].placed);
        let out = s
            .release_piece(0, 900.0, 600.0, &a, &SnapConfig::default())
            .unwrap();
        assert_eq!((out.x, out.y), (900.0, 600.0));
        assert!(!s.pieces[0].placed);
    }

    #[test]
    fn release_in_wrong_cell_snaps_without_placing() {
        let mut s = session(3);
        upright(&mut s);
        let a = ParticipantId::from("a");
        let out = s
            .release_piece(0, 215.0, 50.0, &a, &SnapConfig::default())
            .unwrap();
        assert_eq!((out.x, out.y), (210.0, 50.0));
        assert!(!out.newly_placed);
        assert!(!s.pieces[0].placed);
    }

    #[test]
    fn release_with_wrong_rotation_snaps_but_does_not_place() {
        let mut s = session(3);
        upright(&mut s);
        s.pieces[0].rotation = Rotation::Deg90;
        let a = ParticipantId::from("a");
        let out = s
            .release_piece(0, 120.0, 50.0, &a, &SnapConfig::default())
            .unwrap();
        assert_eq!((out.x, out.y), (50.0, 50.0));
        assert!(!s.pieces[0].placed);
    }

    #[test]
    fn rotating_into_place_places_and_rotating_out_unplaces() {
        let mut s = session(3);
        upright(&mut s);
        let a = ParticipantId::from("a");
        s.release_piece(0, 50.0, 50.0, &a, &SnapConfig::default())
            .unwrap();
        let out = s.rotate_piece(0, RotateDirection::Clockwise, &a).unwrap();
        assert_eq!(out.rotation, Rotation::Deg90);
        assert!(!s.pieces[0].placed);
        assert!(s.pieces[0].placed_by.is_none());

        let b = ParticipantId::from("b");
        let out = s
            .rotate_piece(0, RotateDirection::CounterClockwise, &b)
            .unwrap();
        assert_eq!(out.rotation, Rotation::Deg0);
        assert!(out.newly_placed);
        assert_eq!(s.pieces[0].placed_by, Some(b));
    }

    #[test]
    fn rotation_places_by_occupied_cell_without_snapping() {
        let mut s = session(3);
        upright(&mut s);
        s.pieces[0].rotation = Rotation::Deg90;
        let a = ParticipantId::from("a");

        // 100 px off the slot, still inside cell (0, 0); no threshold applies and nothing snaps.
        s.move_piece(0, 150.0, 150.0, &a).unwrap();
        let out = s
            .rotate_piece(0, RotateDirection::CounterClockwise, &a)
            .unwrap();
        assert!(out.newly_placed);
        assert_eq!((s.pieces[0].current_x, s.pieces[0].current_y), (150.0, 150.0));

        // Left of the board by less than a cell still truncates to column 0.
        s.rotate_piece(0, RotateDirection::Clockwise, &a).unwrap();
        s.move_piece(0, 0.0, 60.0, &a).unwrap();
        let out = s
            .rotate_piece(0, RotateDirection::CounterClockwise, &a)
            .unwrap();
        assert!(out.newly_placed);

        // More than a cell out is off the board.
        s.rotate_piece(0, RotateDirection::Clockwise, &a).unwrap();
        s.move_piece(0, -120.0, 60.0, &a).unwrap();
        let out = s
            .rotate_piece(0, RotateDirection::CounterClockwise, &a)
            .unwrap();
        assert!(!out.newly_placed);
        assert!(!s.pieces[0].placed);
    }

    #[test]
    fn last_piece_completes_and_completion_sticks() {
        let mut s = session(3);
        upright(&mut s);
        let a = ParticipantId::from("a");
        let config = SnapConfig::default();
        let targets: Vec<(u32, f64, f64)> = s
            .pieces
            .iter()
            .map(|p| (p.id, p.correct_x, p.correct_y))
            .collect();
        let mut completions = 0;
        for (id, x, y) in targets {
            let out = s.release_piece(id, x, y, &a, &config).unwrap();
            if out.completed_now {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        assert!(s.completed);

        assert_eq!(s.move_piece(0, 1.0, 1.0, &a), Err(Rejection::Completed));
        assert_eq!(s.lock_piece(0, &a), Err(Rejection::Completed));
        assert_eq!(
            s.rotate_piece(0, RotateDirection::Clockwise, &a),
            Err(Rejection::Completed)
        );
        assert_eq!(
            s.release_piece(0, 900.0, 900.0, &a, &config),
            Err(Rejection::Completed)
        );
        assert!(s.completed);
    }

    #[test]
    fn foreign_lock_blocks_move_release_and_rotate() {
        let mut s = session(3);
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");
        s.lock_piece(2, &a).unwrap();
        let blocked = Rejection::LockedByOther {
            piece: 2,
            owner: a.clone(),
        };
        assert_eq!(s.move_piece(2, 0.0, 0.0, &b), Err(blocked.clone()));
        assert_eq!(
            s.release_piece(2, 0.0, 0.0, &b, &SnapConfig::default()),
            Err(blocked.clone())
        );
        assert_eq!(
            s.rotate_piece(2, RotateDirection::Clockwise, &b),
            Err(blocked.clone())
        );
        assert_eq!(s.lock_piece(2, &b), Err(blocked));
        assert!(s.move_piece(2, 10.0, 20.0, &a).is_ok());
        assert_eq!(s.pieces[2].current_x, 10.0);
    }

    #[test]
    fn unknown_piece_is_rejected() {
        let mut s = session(3);
        let a = ParticipantId::from("a");
        assert_eq!(s.lock_piece(9, &a), Err(Rejection::PieceNotFound(9)));
        assert_eq!(s.move_piece(42, 0.0, 0.0, &a), Err(Rejection::PieceNotFound(42)));
    }

    #[test]
    fn participants_get_palette_colors_and_leave_releases_locks() {
        let mut s = session(3);
        let alice = s.add_participant("  Alice ").unwrap();
        let bob = s.add_participant("Bob").unwrap();
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.color, CURSOR_PALETTE[0]);
        assert_eq!(bob.color, CURSOR_PALETTE[1]);
        assert!(alice.cursor_x.is_none());
        assert_eq!(s.add_participant("   "), Err(ValidationError::BlankName));

        s.update_cursor(&alice.id, 3.0, 4.0).unwrap();
        assert_eq!(s.participants[&alice.id].cursor_x, Some(3.0));
        let ghost = ParticipantId::from("ghost");
        assert_eq!(
            s.update_cursor(&ghost, 1.0, 1.0),
            Err(Rejection::ParticipantNotFound(ghost))
        );

        s.lock_piece(1, &alice.id).unwrap();
        s.lock_piece(5, &alice.id).unwrap();
        assert_eq!(s.remove_participant(&alice.id), vec![1, 5]);
        assert!(!s.participants.contains_key(&alice.id));
        assert!(s.lock_piece(1, &bob.id).is_ok());
    }

    #[test]
    fn expire_lock_requires_current_owner() {
        let mut s = session(3);
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");
        s.lock_piece(3, &a).unwrap();
        assert!(!s.expire_lock(3, &b));
        assert!(s.expire_lock(3, &a));
        assert!(!s.expire_lock(3, &a));
        assert!(!s.expire_lock(99, &a));
    }
}
