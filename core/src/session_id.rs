use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const SESSION_ID_LEN: usize = 12;
pub const PARTICIPANT_ID_LEN: usize = 16;
pub const IMAGE_ID_LEN: usize = 20;
pub const ID_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub fn is_valid_session_id(value: &str) -> bool {
    if value.len() != SESSION_ID_LEN {
        return false;
    }
    value.chars().all(|ch| ID_ALPHABET.contains(ch))
}

/// Random token over [`ID_ALPHABET`].
pub fn random_token<R: Rng>(rng: &mut R, len: usize) -> String {
    let alphabet = ID_ALPHABET.as_bytes();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

pub fn new_image_id() -> String {
    random_token(&mut rand::rng(), IMAGE_ID_LEN)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(value: &str) -> Result<Self, SessionIdError> {
        if value.len() != SESSION_ID_LEN {
            return Err(SessionIdError::InvalidLength {
                expected: SESSION_ID_LEN,
                found: value.len(),
            });
        }
        for (idx, ch) in value.chars().enumerate() {
            if !ID_ALPHABET.contains(ch) {
                return Err(SessionIdError::InvalidCharacter { ch, index: idx });
            }
        }
        Ok(Self(value.to_string()))
    }

    pub fn generate() -> Self {
        Self(random_token(&mut rand::rng(), SESSION_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    InvalidLength { expected: usize, found: usize },
    InvalidCharacter { ch: char, index: usize },
}

impl fmt::Display for SessionIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionIdError::InvalidLength { expected, found } => {
                write!(f, "session id must be {expected} chars, got {found}")
            }
            SessionIdError::InvalidCharacter { ch, index } => {
                write!(f, "invalid character '{ch}' at position {index}")
            }
        }
    }
}

impl std::error::Error for SessionIdError {}

/// Opaque participant token. Clients pick it up from a join and present it back when
/// connecting; nothing about its shape is checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(random_token(&mut rand::rng(), PARTICIPANT_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
