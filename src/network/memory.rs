//! In-Process Transport
//!
//! A broker mapping rendezvous ids to the host session's event channel.
//! Every participant in the same process shares one `MemoryTransport`
//! (it is cheap to clone). Used by the multi-participant tests and for
//! running several participants in one binary.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::core::rendezvous::RendezvousId;
use crate::network::transport::{
    ConnectionId, Listener, Transport, TransportError, TransportEvent, OUTBOUND_CAPACITY,
};

/// In-process rendezvous broker.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hosts: Arc<RwLock<BTreeMap<String, mpsc::Sender<TransportEvent>>>>,
}

impl MemoryTransport {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live claims.
    pub async fn claimed(&self) -> usize {
        self.hosts.read().await.values().filter(|tx| !tx.is_closed()).count()
    }
}

/// Forward frames written on one side as `Frame` events for the other.
fn spawn_pump(
    mut frames: mpsc::Receiver<String>,
    events: mpsc::Sender<TransportEvent>,
    conn: ConnectionId,
) {
    tokio::spawn(async move {
        while let Some(text) = frames.recv().await {
            if events.send(TransportEvent::Frame { conn, text }).await.is_err() {
                break;
            }
        }
        let _ = events.send(TransportEvent::Closed { conn }).await;
    });
}

impl Transport for MemoryTransport {
    async fn claim(
        &self,
        rendezvous: &RendezvousId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Listener, TransportError> {
        let mut hosts = self.hosts.write().await;

        // A claim whose session has gone away is free again
        if hosts.get(rendezvous.as_str()).is_some_and(|tx| !tx.is_closed()) {
            return Err(TransportError::AddressInUse(rendezvous.to_string()));
        }

        hosts.insert(rendezvous.as_str().to_string(), events);
        debug!("Claimed {} in memory", rendezvous);
        Ok(Listener::detached(format!("memory://{}", rendezvous)))
    }

    async fn dial(
        &self,
        rendezvous: &RendezvousId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let host_events = {
            let hosts = self.hosts.read().await;
            hosts.get(rendezvous.as_str())
                .filter(|tx| !tx.is_closed())
                .cloned()
                .ok_or_else(|| TransportError::PeerUnavailable(rendezvous.to_string()))?
        };

        let dialer_conn = ConnectionId::next();
        let host_conn = ConnectionId::next();
        let (to_host, from_dialer) = mpsc::channel(OUTBOUND_CAPACITY);
        let (to_dialer, from_host) = mpsc::channel(OUTBOUND_CAPACITY);

        events.send(TransportEvent::Opened {
            conn: dialer_conn,
            outbound: to_host,
            remote: format!("memory://{}", rendezvous),
        }).await.map_err(|_| TransportError::Closed)?;

        host_events.send(TransportEvent::Opened {
            conn: host_conn,
            outbound: to_dialer,
            remote: format!("memory://{}", dialer_conn),
        }).await.map_err(|_| TransportError::PeerUnavailable(rendezvous.to_string()))?;

        // Pumps start only after both sides know the connection
        spawn_pump(from_dialer, host_events, host_conn);
        spawn_pump(from_host, events, dialer_conn);

        Ok(())
    }
}
