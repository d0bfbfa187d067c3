//! Relay
//!
//! Host-side forwarding. After the host has applied a message it passes the
//! original frame text, untouched, to every open connection except the one
//! it came in on:
//!
//! ```text
//!        ┌─────── B (origin)
//!   HOST ┼──────▶ C
//!        └──────▶ D
//! ```
//!
//! Joining peers never relay, and the host never forwards its own messages,
//! so every message travels at most producer → host → everyone else.

use tracing::debug;

use crate::core::ids::EntityId;
use crate::network::connections::ConnectionSet;
use crate::network::protocol::NetworkMessage;
use crate::network::transport::ConnectionId;

/// Forwarding policy and counters for one session.
#[derive(Debug, Default)]
pub struct Relay {
    enabled: bool,
    forwarded_messages: u64,
    forwarded_frames: u64,
}

impl Relay {
    /// Relay for a host (`enabled`) or a joining peer.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    /// Whether `msg` should be forwarded at all.
    pub fn should_forward(&self, msg: &NetworkMessage, local_id: &EntityId) -> bool {
        self.enabled && msg.sender_id != *local_id
    }

    /// Forward `raw` to everyone but `origin`. Returns the number of
    /// connections it went out on.
    pub fn forward(
        &mut self,
        conns: &mut ConnectionSet,
        origin: ConnectionId,
        msg: &NetworkMessage,
        raw: &str,
        local_id: &EntityId,
    ) -> usize {
        if !self.should_forward(msg, local_id) {
            return 0;
        }

        let sent = conns.broadcast(raw, Some(origin));
        self.forwarded_messages += 1;
        self.forwarded_frames += sent as u64;
        debug!("Relayed {} from {} to {} peer(s)", msg.kind(), msg.sender_id, sent);
        sent
    }

    /// Messages forwarded so far.
    pub fn forwarded_messages(&self) -> u64 {
        self.forwarded_messages
    }

    /// Frames written so far.
    pub fn forwarded_frames(&self) -> u64 {
        self.forwarded_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn three_peers() -> (ConnectionSet, Vec<(ConnectionId, mpsc::Receiver<String>)>) {
        let mut set = ConnectionSet::new();
        let mut peers = Vec::new();
        for _ in 0..3 {
            let conn = ConnectionId::next();
            let (tx, rx) = mpsc::channel(8);
            set.insert(conn, tx, conn.to_string());
            peers.push((conn, rx));
        }
        (set, peers)
    }

    fn removal_from(sender: &str) -> (NetworkMessage, String) {
        let msg = NetworkMessage::remove_object(EntityId::new("obj-1"), EntityId::new(sender));
        let raw = msg.to_json().unwrap();
        (msg, raw)
    }

    #[test]
    fn test_no_echo_to_origin() {
        let (mut set, mut peers) = three_peers();
        let mut relay = Relay::new(true);
        let (msg, raw) = removal_from("b");
        let origin = peers[0].0;

        assert_eq!(relay.forward(&mut set, origin, &msg, &raw, &EntityId::new("host")), 2);
        assert!(peers[0].1.try_recv().is_err());
        assert_eq!(peers[1].1.try_recv().unwrap(), raw);
        assert_eq!(peers[2].1.try_recv().unwrap(), raw);
    }

    #[test]
    fn test_own_messages_not_relayed() {
        let (mut set, mut peers) = three_peers();
        let mut relay = Relay::new(true);
        let (msg, raw) = removal_from("host");

        assert_eq!(relay.forward(&mut set, peers[0].0, &msg, &raw, &EntityId::new("host")), 0);
        for (_, rx) in peers.iter_mut() {
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_peer_never_relays() {
        let (mut set, mut peers) = three_peers();
        let mut relay = Relay::new(false);
        let (msg, raw) = removal_from("c");

        assert_eq!(relay.forward(&mut set, peers[0].0, &msg, &raw, &EntityId::new("b")), 0);
        assert!(peers[1].1.try_recv().is_err());
        assert_eq!(relay.forwarded_messages(), 0);
    }

    #[test]
    fn test_counters() {
        let (mut set, peers) = three_peers();
        let mut relay = Relay::new(true);
        let (msg, raw) = removal_from("b");
        relay.forward(&mut set, peers[0].0, &msg, &raw, &EntityId::new("host"));
        relay.forward(&mut set, peers[1].0, &msg, &raw, &EntityId::new("host"));
        assert_eq!(relay.forwarded_messages(), 2);
        assert_eq!(relay.forwarded_frames(), 4);
    }
}
