//! Core primitives.
//!
//! Vector math, identifiers and rendezvous derivation shared by the
//! entity store and the network layer.

pub mod vec3;
pub mod ids;
pub mod rendezvous;

// Re-export core types
pub use vec3::Vec3;
pub use ids::{EntityId, generate_room_code, normalize_room_code};
pub use rendezvous::RendezvousId;
