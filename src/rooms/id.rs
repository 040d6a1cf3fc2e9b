use std::{fmt, ops::Deref, str::FromStr};

use rand::seq::IndexedRandom;
use serde::{Serialize, Serializer};

use crate::error::RoomError;

pub const ROOM_ID_LEN: usize = 6;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Six uppercase letters or digits, e.g. `ABC123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn random() -> RoomId {
        let mut rng = rand::rng();
        let id = (0..ROOM_ID_LEN)
            .filter_map(|_| ALPHABET.choose(&mut rng).map(|&b| b as char))
            .collect();
        RoomId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomId {
    type Err = RoomError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_ascii_uppercase();
        if id.len() != ROOM_ID_LEN || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(RoomError::validation(format!(
                "malformed room id {s:?}: expected {ROOM_ID_LEN} letters or digits"
            )));
        }
        Ok(RoomId(id))
    }
}

impl Deref for RoomId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case() {
        let id: RoomId = " abc123 ".parse().unwrap();
        assert_eq!(id.as_str(), "ABC123");
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "ABC12", "ABC1234", "ABC-12", "ÄBC123"] {
            let err = bad.parse::<RoomId>().unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR", "{bad:?}");
        }
    }

    #[test]
    fn random_ids_parse_back() {
        for _ in 0..100 {
            let id = RoomId::random();
            assert_eq!(id.as_str().parse::<RoomId>().unwrap(), id);
        }
    }
}
