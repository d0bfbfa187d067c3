//! Transport Seam
//!
//! A transport turns a rendezvous id into connections and reports their
//! lifecycle to the session driver as `TransportEvent`s:
//!
//! ```text
//!   Opened { conn, outbound }   ──▶  driver registers `outbound`
//!   Frame  { conn, text }       ──▶  driver parses / applies / relays
//!   Closed { conn }             ──▶  driver forgets `conn`
//! ```
//!
//! Frames on one connection arrive in the order they were sent. Dropping the
//! `outbound` sender closes the connection.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::rendezvous::RendezvousId;

/// Buffered frames per connection direction.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Buffered transport events per session.
pub const EVENT_CAPACITY: usize = 256;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Connection lifecycle event.
#[derive(Debug)]
pub enum TransportEvent {
    /// A connection is ready. Frames pushed into `outbound` go to the remote.
    Opened {
        /// New connection
        conn: ConnectionId,
        /// Frames for the remote
        outbound: mpsc::Sender<String>,
        /// Remote address, for logs
        remote: String,
    },
    /// One text frame from the remote.
    Frame {
        /// Connection it arrived on
        conn: ConnectionId,
        /// Raw frame text
        text: String,
    },
    /// The connection is gone.
    Closed {
        /// Connection that closed
        conn: ConnectionId,
    },
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Someone else already hosts this rendezvous id.
    #[error("Address in use: {0}")]
    AddressInUse(String),

    /// Nobody hosts this rendezvous id.
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The session stopped listening.
    #[error("Event channel closed")]
    Closed,
}

/// A claimed rendezvous id. Dropping it stops accepting connections.
#[derive(Debug)]
pub struct Listener {
    address: String,
    accept_task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Listener backed by an accept loop task.
    pub fn new(address: impl Into<String>, accept_task: JoinHandle<()>) -> Self {
        Self {
            address: address.into(),
            accept_task: Some(accept_task),
        }
    }

    /// Listener with no task of its own.
    pub fn detached(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            accept_task: None,
        }
    }

    /// Where peers reach this listener.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// Something that can host or reach a rendezvous id.
pub trait Transport: Send + Sync + 'static {
    /// Claim `rendezvous` and accept every inbound connection, reporting
    /// each one on `events`.
    fn claim(
        &self,
        rendezvous: &RendezvousId,
        events: mpsc::Sender<TransportEvent>,
    ) -> impl Future<Output = Result<Listener, TransportError>> + Send;

    /// Open one connection to whoever claimed `rendezvous`.
    ///
    /// `Opened` has been delivered on `events` when this returns `Ok`.
    fn dial(
        &self,
        rendezvous: &RendezvousId,
        events: mpsc::Sender<TransportEvent>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
