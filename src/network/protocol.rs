//! Protocol Messages
//!
//! Wire format exchanged between participants.
//! Every frame is one JSON object:
//!
//! ```text
//! { "type": "UPDATE", "payload": { ... }, "senderId": "<producer id>" }
//! ```
//!
//! `senderId` is always the id of the participant that produced the message
//! and is never rewritten by the relay.

use std::fmt;
use serde::{Serialize, Deserialize, Deserializer};

use crate::core::ids::EntityId;
use crate::core::vec3::Vec3;
use crate::game::state::{PlayerEntity, WorldObject, ChatMessage};

/// Error decoding or encoding a frame.
pub type ProtocolError = serde_json::Error;

// =============================================================================
// ENVELOPE
// =============================================================================

/// Message envelope carried by every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMessage {
    /// Typed payload, tagged by `type`.
    #[serde(flatten)]
    pub body: MessageBody,
    /// Original producer of the message.
    pub sender_id: EntityId,
}

/// The seven message kinds and their payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    /// A participant announces (or re-announces) its full record.
    Join(PlayerEntity),

    /// Periodic transform and transient-flag sample.
    Update(UpdatePayload),

    /// Chat line, appended verbatim.
    Chat(ChatMessage),

    /// Sender killed `target_id`.
    Kill(KillPayload),

    /// A dummy entity was spawned by the sender.
    Spawn(PlayerEntity),

    /// A world object was placed.
    PlaceObject(WorldObject),

    /// A world object was removed.
    RemoveObject(RemoveObjectPayload),
}

/// Message kind without payload, for logging and dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    /// JOIN
    Join,
    /// UPDATE
    Update,
    /// CHAT
    Chat,
    /// KILL
    Kill,
    /// SPAWN
    Spawn,
    /// PLACE_OBJECT
    PlaceObject,
    /// REMOVE_OBJECT
    RemoveObject,
}

impl MessageKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Join => "JOIN",
            MessageKind::Update => "UPDATE",
            MessageKind::Chat => "CHAT",
            MessageKind::Kill => "KILL",
            MessageKind::Spawn => "SPAWN",
            MessageKind::PlaceObject => "PLACE_OBJECT",
            MessageKind::RemoveObject => "REMOVE_OBJECT",
        }
    }

    /// Discrete events are one-shot; UPDATE is the only continuous sample.
    pub fn is_discrete(self) -> bool {
        !matches!(self, MessageKind::Update | MessageKind::Join)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// UPDATE payload.
///
/// Position and rotation are always present and always replace the stored
/// value. Every other field is merged only when present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    /// Entity being updated.
    pub id: EntityId,
    /// World position.
    pub position: Vec3,
    /// Euler rotation (yaw in `y`).
    pub rotation: Vec3,
    /// Attack animation flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_attacking: Option<bool>,
    /// Jump flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_jumping: Option<bool>,
    /// Emote identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emote: Option<String>,
    /// Throw animation flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_throwing: Option<bool>,
    /// Current health.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
    /// Vehicle being driven. Absent keeps the stored value, `null` clears it.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub driving_vehicle_id: Option<Option<EntityId>>,
}

/// KILL payload. The killer is the envelope's `senderId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillPayload {
    /// Victim id.
    pub target_id: EntityId,
}

/// REMOVE_OBJECT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveObjectPayload {
    /// Object id.
    pub id: EntityId,
}

/// Distinguishes an explicit `null` from a missing field.
fn deserialize_present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// =============================================================================
// CONSTRUCTORS & SERIALIZATION
// =============================================================================

impl NetworkMessage {
    /// Wrap a body with its producer id.
    pub fn new(body: MessageBody, sender_id: EntityId) -> Self {
        Self { body, sender_id }
    }

    /// JOIN carrying `player`, attributed to the player itself.
    pub fn join(player: PlayerEntity) -> Self {
        let sender_id = player.id.clone();
        Self::new(MessageBody::Join(player), sender_id)
    }

    /// SPAWN of `dummy` by `spawner`.
    pub fn spawn(dummy: PlayerEntity, spawner: EntityId) -> Self {
        Self::new(MessageBody::Spawn(dummy), spawner)
    }

    /// UPDATE for the payload's own entity.
    pub fn update(payload: UpdatePayload) -> Self {
        let sender_id = payload.id.clone();
        Self::new(MessageBody::Update(payload), sender_id)
    }

    /// KILL credited to `killer`.
    pub fn kill(killer: EntityId, target_id: EntityId) -> Self {
        Self::new(MessageBody::Kill(KillPayload { target_id }), killer)
    }

    /// CHAT line.
    pub fn chat(message: ChatMessage, sender_id: EntityId) -> Self {
        Self::new(MessageBody::Chat(message), sender_id)
    }

    /// PLACE_OBJECT.
    pub fn place_object(object: WorldObject, sender_id: EntityId) -> Self {
        Self::new(MessageBody::PlaceObject(object), sender_id)
    }

    /// REMOVE_OBJECT.
    pub fn remove_object(id: EntityId, sender_id: EntityId) -> Self {
        Self::new(MessageBody::RemoveObject(RemoveObjectPayload { id }), sender_id)
    }

    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        match &self.body {
            MessageBody::Join(_) => MessageKind::Join,
            MessageBody::Update(_) => MessageKind::Update,
            MessageBody::Chat(_) => MessageKind::Chat,
            MessageBody::Kill(_) => MessageKind::Kill,
            MessageBody::Spawn(_) => MessageKind::Spawn,
            MessageBody::PlaceObject(_) => MessageKind::PlaceObject,
            MessageBody::RemoveObject(_) => MessageKind::RemoveObject,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(s)
    }
}
