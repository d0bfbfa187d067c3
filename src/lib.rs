//! # Obby Sync
//!
//! Peer session, relay and replication layer for the Obby multiplayer sandbox.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        OBBY SYNC                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/              - Shared primitives                      │
//! │  ├── vec3.rs        - 3D vector and yaw helpers              │
//! │  ├── ids.rs         - Room codes and entity ids              │
//! │  └── rendezvous.rs  - Room code → rendezvous id → port       │
//! │                                                              │
//! │  game/              - Replicated state (no I/O)              │
//! │  ├── state.rs       - Entity store                           │
//! │  ├── reconcile.rs   - Merge rules for inbound messages       │
//! │  ├── events.rs      - Events pushed to consumers             │
//! │  └── command.rs     - Local chat commands                    │
//! │                                                              │
//! │  network/           - Sessions and transports                │
//! │  ├── protocol.rs    - Wire messages                          │
//! │  ├── transport.rs   - Transport seam                         │
//! │  ├── memory.rs      - In-process transport                   │
//! │  ├── websocket.rs   - WebSocket transport                    │
//! │  ├── connections.rs - Open connection set                    │
//! │  ├── relay.rs       - Host-side forwarding                   │
//! │  ├── broadcast.rs   - Heartbeat and outgoing queue           │
//! │  ├── config.rs      - Runtime configuration                  │
//! │  └── session.rs     - Session driver and handle              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Topology
//!
//! One host, any number of joining peers, each peer connected only to the
//! host. The host applies every inbound message and forwards it unchanged to
//! everyone else, so peers see each other as if fully meshed.
//!
//! ## Consistency
//!
//! There is no authoritative server and no cross-sender ordering:
//! - Transforms are last-write-wins, refreshed by a 20 Hz heartbeat
//! - Discrete events (kill, place, remove, spawn, chat) apply idempotently
//! - Every participant iterates state in id order (BTreeMap)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::{Vec3, EntityId, RendezvousId};
pub use game::state::{EntityStore, PlayerEntity, WorldObject, WorldObjectType, ChatMessage, Role};
pub use game::events::SessionEvent;
pub use network::protocol::NetworkMessage;
pub use network::session::{start_session, SessionHandle, SessionError, WorldView};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Heartbeat rate (Hz)
pub const TICK_RATE: u32 = network::config::DEFAULT_TICK_RATE;

/// Chat log capacity
pub const CHAT_LOG_CAPACITY: usize = game::state::CHAT_LOG_CAPACITY;
