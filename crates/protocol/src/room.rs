//! Room identifiers.

use std::fmt;

use rand::Rng;

use crate::ProtocolError;
use crate::constants::{ROOM_ID_GENERATED_LEN, ROOM_ID_MAX_LEN};

const ROOM_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A validated room identifier: 1 to 64 characters of `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// Validates and wraps a room identifier.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if raw.is_empty() || raw.len() > ROOM_ID_MAX_LEN {
            return Err(ProtocolError::InvalidRoomId(format!(
                "length must be 1..={ROOM_ID_MAX_LEN}, got {}",
                raw.len()
            )));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ProtocolError::InvalidRoomId(format!(
                "unexpected character {c:?}"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generates a short random room identifier (7 base-36 characters), the
/// shape used in share links such as `/room/k3j9x0a`.
pub fn generate_room_id() -> RoomId {
    let mut rng = rand::thread_rng();
    let id: String = (0..ROOM_ID_GENERATED_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect();
    RoomId(id)
}
