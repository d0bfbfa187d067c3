//! WebSocket Transport
//!
//! Hosts listen on a port derived from the rendezvous id; peers connect to
//! `ws://<host_ip>:<port>/<rendezvous>`. Each connection gets a writer task
//! fed by the `outbound` channel and a reader task feeding `Frame` events.
//!
//! Several rooms can hash to the same port, so the host only accepts a
//! handshake whose path is its own rendezvous id and answers 404 otherwise.

use std::net::SocketAddr;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::core::rendezvous::RendezvousId;
use crate::network::config::TransportConfig;
use crate::network::transport::{
    ConnectionId, Listener, Transport, TransportError, TransportEvent, OUTBOUND_CAPACITY,
};

/// TCP/WebSocket transport.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    config: TransportConfig,
}

impl WsTransport {
    /// Create with the given addresses.
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Socket a host binds for `rendezvous`.
    pub fn bind_addr(&self, rendezvous: &RendezvousId) -> SocketAddr {
        SocketAddr::new(self.config.bind_ip, rendezvous.port(self.config.base_port, self.config.port_span))
    }

    /// URL a peer dials for `rendezvous`.
    pub fn dial_url(&self, rendezvous: &RendezvousId) -> String {
        let port = rendezvous.port(self.config.base_port, self.config.port_span);
        format!("ws://{}/{}", SocketAddr::new(self.config.host_ip, port), rendezvous)
    }
}

/// Handshake check: only `/<rendezvous>` is served.
fn check_path(expected: &str, request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == expected {
        return Ok(response);
    }
    let mut refusal = ErrorResponse::new(Some(format!("No room at {}", request.uri().path())));
    *refusal.status_mut() = StatusCode::NOT_FOUND;
    Err(refusal)
}

/// Report a new connection and run its reader and writer.
async fn spawn_link<S>(
    ws: WebSocketStream<S>,
    events: mpsc::Sender<TransportEvent>,
    remote: String,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn = ConnectionId::next();
    let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let (mut ws_sender, mut ws_receiver) = ws.split();

    events.send(TransportEvent::Opened { conn, outbound, remote: remote.clone() })
        .await
        .map_err(|_| TransportError::Closed)?;

    tokio::spawn(async move {
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Frame { conn, text }).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("{} ({}) closed", conn, remote);
                    break;
                }
                Some(Err(e)) => {
                    debug!("WebSocket error on {} ({}): {}", conn, remote, e);
                    break;
                }
                // Ping/pong is answered by tungstenite; binary frames are not part of the protocol
                Some(Ok(_)) => {}
            }
        }

        writer.abort();
        let _ = events.send(TransportEvent::Closed { conn }).await;
    });

    Ok(())
}

impl Transport for WsTransport {
    async fn claim(
        &self,
        rendezvous: &RendezvousId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Listener, TransportError> {
        let addr = self.bind_addr(rendezvous);
        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => TransportError::AddressInUse(rendezvous.to_string()),
            _ => TransportError::Io(e),
        })?;
        let local_addr = listener.local_addr()?;
        let path = format!("/{}", rendezvous);
        info!("Hosting {} on {} ({})", rendezvous, local_addr, rendezvous.fingerprint());

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                };
                let events = events.clone();
                let path = path.clone();
                tokio::spawn(async move {
                    let ws = match accept_hdr_async(stream, |req: &Request, resp| check_path(&path, req, resp)).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!("WebSocket handshake refused for {}: {}", peer, e);
                            return;
                        }
                    };
                    if spawn_link(ws, events, peer.to_string()).await.is_err() {
                        debug!("Session gone before {} was registered", peer);
                    }
                });
            }
        });

        Ok(Listener::new(format!("ws://{}", local_addr), accept_task))
    }

    async fn dial(
        &self,
        rendezvous: &RendezvousId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        use tokio_tungstenite::tungstenite::Error as WsError;

        let url = self.dial_url(rendezvous);
        let (ws, _response) = connect_async(url.as_str()).await.map_err(|e| match e {
            WsError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                TransportError::PeerUnavailable(rendezvous.to_string())
            }
            // Someone else's room owns this port
            WsError::Http(response) if response.status() == StatusCode::NOT_FOUND => {
                TransportError::PeerUnavailable(rendezvous.to_string())
            }
            other => TransportError::WebSocket(other),
        })?;
        info!("Connected to {}", url);

        spawn_link(ws, events, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback(base_port: u16) -> WsTransport {
        WsTransport::new(TransportConfig {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            host_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port,
            port_span: 1,
        })
    }

    #[test]
    fn test_dial_url_shape() {
        let transport = loopback(47000);
        let room = RendezvousId::for_room("ABCDE");
        assert_eq!(transport.dial_url(&room), "ws://127.0.0.1:47000/obby-room-ABCDE");
        assert_eq!(transport.bind_addr(&room).port(), 47000);
    }

    #[tokio::test]
    async fn test_claim_twice_is_address_in_use() {
        let transport = loopback(47311);
        let room = RendezvousId::for_room("WSAAA");
        let (tx, _rx) = mpsc::channel(16);

        let _listener = transport.claim(&room, tx.clone()).await.unwrap();
        let err = transport.claim(&room, tx).await.unwrap_err();
        assert!(matches!(err, TransportError::AddressInUse(_)));
    }

    #[tokio::test]
    async fn test_frame_over_loopback() {
        let transport = loopback(47322);
        let room = RendezvousId::for_room("WSBBB");
        let (host_tx, mut host_rx) = mpsc::channel(16);
        let (peer_tx, mut peer_rx) = mpsc::channel(16);

        let _listener = transport.claim(&room, host_tx).await.unwrap();
        transport.dial(&room, peer_tx).await.unwrap();

        let outbound = match peer_rx.recv().await {
            Some(TransportEvent::Opened { outbound, .. }) => outbound,
            other => panic!("Expected Opened, got {:?}", other),
        };
        outbound.send("hello".to_string()).await.unwrap();

        assert!(matches!(host_rx.recv().await, Some(TransportEvent::Opened { .. })));
        match host_rx.recv().await {
            Some(TransportEvent::Frame { text, .. }) => assert_eq!(text, "hello"),
            other => panic!("Expected Frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shared_port_refuses_other_room() {
        let transport = loopback(47333);
        let (host_tx, mut host_rx) = mpsc::channel(16);
        let (peer_tx, _peer_rx) = mpsc::channel(16);

        let _listener = transport.claim(&RendezvousId::for_room("AAAAA"), host_tx).await.unwrap();
        let err = transport.dial(&RendezvousId::for_room("BBBBB"), peer_tx).await.unwrap_err();
        assert!(matches!(err, TransportError::PeerUnavailable(_)));

        let opened = tokio::time::timeout(std::time::Duration::from_millis(200), host_rx.recv()).await;
        assert!(opened.is_err());
    }
}
