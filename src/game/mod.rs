//! Game State Module
//!
//! Everything that touches replicated game state. No I/O.
//!
//! ## Module Structure
//!
//! - `state`: Entity store, players, world objects, chat log
//! - `reconcile`: Merge rules for inbound messages
//! - `events`: Events pushed to consumers
//! - `command`: Local chat commands

pub mod state;
pub mod reconcile;
pub mod events;
pub mod command;

// Re-export key types
pub use state::{
    EntityStore, PlayerEntity, WorldObject, WorldObjectType, ChatMessage, ChatLog,
    Role, ItemType, GameMode, LocalStatus, Pose, LeaderboardEntry, TransientFlag,
};
pub use reconcile::{apply, parse_frame, ApplyOutcome};
pub use events::SessionEvent;
pub use command::{ChatCommand, ChatInput};
