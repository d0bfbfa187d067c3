//! Network Layer
//!
//! Session setup, transports, relay and the broadcast loop.
//! All entity state mutation still goes through `game/`.

pub mod protocol;
pub mod transport;
pub mod memory;
pub mod websocket;
pub mod connections;
pub mod relay;
pub mod broadcast;
pub mod config;
pub mod session;

pub use protocol::{NetworkMessage, MessageBody, MessageKind, UpdatePayload, ProtocolError};
pub use transport::{Transport, TransportEvent, TransportError, ConnectionId, Listener};
pub use memory::MemoryTransport;
pub use websocket::WsTransport;
pub use config::{TransportConfig, SessionConfig, PlayerProfile, ConfigError};
pub use session::{start_session, SessionHandle, SessionError, SessionInfo, WorldView};
