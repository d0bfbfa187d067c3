//! Session Events
//!
//! The few things the sync layer pushes to consumers. Everything else is
//! polled from a `WorldView` once per frame.

use crate::core::ids::EntityId;

/// Event pushed from the session to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A KILL named the local participant as victim.
    LocalDeath {
        /// Who gets the credit
        killer_id: EntityId,
    },

    /// A joining peer lost its only connection. The session is over.
    HostDisconnected,
}

impl SessionEvent {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::LocalDeath { .. } => "local_death",
            SessionEvent::HostDisconnected => "host_disconnected",
        }
    }
}
