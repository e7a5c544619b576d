use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Quarter-turn orientation of a piece, carried on the wire as whole degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

pub const ALL_ROTATIONS: [Rotation; 4] = [
    Rotation::Deg0,
    Rotation::Deg90,
    Rotation::Deg180,
    Rotation::Deg270,
];

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    fn quarter_index(self) -> i32 {
        i32::from(self.degrees() / 90)
    }

    pub fn rotated(self, direction: RotateDirection) -> Self {
        let index = (self.quarter_index() + direction.step()).rem_euclid(4);
        ALL_ROTATIONS[index as usize]
    }

    /// 90 and 270 swap the visual width and height of a piece.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    pub fn random<R: Rng>(rng: &mut R) -> Self {
        ALL_ROTATIONS[rng.random_range(0..ALL_ROTATIONS.len())]
    }
}

impl TryFrom<u16> for Rotation {
    type Error = ValidationError;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        Self::from_degrees(degrees).ok_or(ValidationError::InvalidRotation(degrees))
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum RotateDirection {
    Clockwise,
    CounterClockwise,
}

impl RotateDirection {
    pub fn step(self) -> i32 {
        match self {
            RotateDirection::Clockwise => 1,
            RotateDirection::CounterClockwise => -1,
        }
    }
}

impl TryFrom<i8> for RotateDirection {
    type Error = ValidationError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RotateDirection::Clockwise),
            -1 => Ok(RotateDirection::CounterClockwise),
            other => Err(ValidationError::InvalidDirection(other)),
        }
    }
}

impl From<RotateDirection> for i8 {
    fn from(direction: RotateDirection) -> Self {
        match direction {
            RotateDirection::Clockwise => 1,
            RotateDirection::CounterClockwise => -1,
        }
    }
}
