//! Open Connections
//!
//! The set of connections a session can send on. A connection whose remote
//! side is gone is skipped on send and pruned by its `Closed` event.
//!
//! Each connection has a bounded outbound channel. Frames that must arrive
//! (the greeting a host sends a newcomer) go through a per-connection
//! backlog that is moved into the channel as it drains. While a backlog is
//! pending, later frames queue behind it so ordering holds.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::network::transport::ConnectionId;

/// Ordinary frames a backlog accepts on top of its reliable ones.
pub const BACKLOG_LIMIT: usize = 256;

/// One open connection.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::Sender<String>,
    backlog: VecDeque<String>,
    /// Remote address, for logs
    pub remote: String,
    /// When the connection opened
    pub opened_at: Instant,
}

impl Connection {
    /// Whether the remote side is still reading.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// How long the connection has been open.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Frames waiting for room in the outbound channel.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Move as much of the backlog into the channel as fits.
    fn flush(&mut self) {
        while let Some(text) = self.backlog.pop_front() {
            match self.outbound.try_send(text) {
                Ok(()) => {}
                Err(TrySendError::Full(text)) => {
                    self.backlog.push_front(text);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    return;
                }
            }
        }
    }
}

/// Connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    conns: BTreeMap<ConnectionId, Connection>,
}

impl ConnectionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened connection.
    pub fn insert(&mut self, conn: ConnectionId, outbound: mpsc::Sender<String>, remote: String) {
        self.conns.insert(conn, Connection {
            outbound,
            backlog: VecDeque::new(),
            remote,
            opened_at: Instant::now(),
        });
    }

    /// Forget a connection. Dropping its sender closes it.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<Connection> {
        self.conns.remove(&conn)
    }

    /// Number of connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Whether there are no connections.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Connection ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.conns.keys().copied()
    }

    /// Queue one frame on `conn` without waiting.
    ///
    /// Returns false if the connection is unknown, closed or backed up.
    /// Frames are never retried.
    pub fn send_to(&mut self, conn: ConnectionId, text: &str) -> bool {
        let Some(c) = self.conns.get_mut(&conn) else {
            return false;
        };
        if !c.is_open() {
            return false;
        }

        c.flush();
        if !c.backlog.is_empty() {
            if c.backlog.len() >= BACKLOG_LIMIT {
                warn!("Backlog full on {} ({}), dropping frame", conn, c.remote);
                return false;
            }
            c.backlog.push_back(text.to_string());
            return true;
        }

        match c.outbound.try_send(text.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full on {} ({}), dropping frame", conn, c.remote);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("{} closed mid-send", conn);
                false
            }
        }
    }

    /// Queue frames on `conn` that must all arrive, in order.
    ///
    /// Whatever does not fit in the channel waits in the backlog and is
    /// moved over by later sends and `flush`. Returns false if the
    /// connection is unknown or closed.
    pub fn send_all(&mut self, conn: ConnectionId, frames: impl IntoIterator<Item = String>) -> bool {
        let Some(c) = self.conns.get_mut(&conn) else {
            return false;
        };
        if !c.is_open() {
            return false;
        }

        c.backlog.extend(frames);
        c.flush();
        if !c.backlog.is_empty() {
            debug!("{} frame(s) backlogged on {}", c.backlog.len(), conn);
        }
        true
    }

    /// Move pending backlogs into their channels.
    pub fn flush(&mut self) {
        for c in self.conns.values_mut() {
            c.flush();
        }
    }

    /// Queue one frame on every open connection except `except`.
    ///
    /// Returns how many connections accepted it.
    pub fn broadcast(&mut self, text: &str, except: Option<ConnectionId>) -> usize {
        let targets: Vec<_> = self.ids().filter(|id| Some(*id) != except).collect();
        targets.into_iter()
            .filter(|id| self.send_to(*id, text))
            .count()
    }
}
