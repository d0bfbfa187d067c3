//! Identifier Generation
//!
//! Room codes, participant ids, dummy ids and chat ids.
//! None of these need to be reproducible, only unique enough within a session.

use std::fmt;
use rand::Rng;
use serde::{Serialize, Deserialize};

/// Alphabet for human-shareable room codes (no 0/O, 1/I lookalikes).
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 5;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Identifier of a player or world object.
///
/// Ordered so the entity store iterates deterministically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh participant id for this process.
    pub fn local() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Fresh id for a spawned dummy: `dummy-<millis>-<5 base36>`.
    pub fn dummy() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        Self(format!("dummy-{}-{}", millis, random_base36(5)))
    }

    /// Fresh id for a placed world object.
    pub fn object() -> Self {
        Self(format!("obj-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Generate a new random room code.
pub fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Normalize a user-typed room code.
///
/// Uppercases and trims it. Returns `None` unless the result is exactly
/// `ROOM_CODE_LEN` ASCII alphanumerics.
pub fn normalize_room_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    if code.len() == ROOM_CODE_LEN && code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Some(code)
    } else {
        None
    }
}

/// Fresh chat message id.
pub fn chat_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}
