//! Rendezvous Identifiers
//!
//! A joining peer finds the host without any discovery service: both
//! derive the same rendezvous id from the shared room code, and transports
//! that need a numeric address hash that id into a port slot.

use std::fmt;
use sha2::{Sha256, Digest};

/// Namespace prefix in front of every room code.
pub const RENDEZVOUS_PREFIX: &str = "obby-room-";

/// Address a joining peer dials to reach the host of a room.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RendezvousId(String);

impl RendezvousId {
    /// Derive from a (normalized) room code.
    pub fn for_room(room_code: &str) -> Self {
        Self(format!("{}{}", RENDEZVOUS_PREFIX, room_code))
    }

    /// Full rendezvous string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Room code this id was derived from.
    pub fn room_code(&self) -> &str {
        self.0.strip_prefix(RENDEZVOUS_PREFIX).unwrap_or(&self.0)
    }

    /// SHA-256 of the rendezvous string.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"OBBY_RENDEZVOUS_V1");
        hasher.update(self.0.as_bytes());
        hasher.finalize().into()
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.digest()[..4])
    }

    /// Port slot in `[base, base + span)` for this rendezvous id.
    ///
    /// `span` of zero is treated as one.
    pub fn port(&self, base: u16, span: u16) -> u16 {
        let digest = self.digest();
        let raw = u16::from_le_bytes([digest[0], digest[1]]);
        base.saturating_add(raw % span.max(1))
    }
}

impl fmt::Display for RendezvousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendezvous_from_room_code() {
        let id = RendezvousId::for_room("ABCDE");
        assert_eq!(id.as_str(), "obby-room-ABCDE");
        assert_eq!(id.room_code(), "ABCDE");
    }

    #[test]
    fn test_port_is_deterministic_and_in_range() {
        let a = RendezvousId::for_room("ABCDE");
        let b = RendezvousId::for_room("ABCDE");
        assert_eq!(a.port(40000, 2000), b.port(40000, 2000));

        for code in ["ABCDE", "ZZZZZ", "23456", "HJKLM"] {
            let port = RendezvousId::for_room(code).port(40000, 2000);
            assert!((40000..42000).contains(&port));
        }
    }

    #[test]
    fn test_zero_span_pins_base_port() {
        let id = RendezvousId::for_room("ABCDE");
        assert_eq!(id.port(41000, 0), 41000);
    }

    #[test]
    fn test_fingerprint_is_hex() {
        let fp = RendezvousId::for_room("ABCDE").fingerprint();
        assert_eq!(fp.len(), 8);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
