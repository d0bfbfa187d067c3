//! Reconciler
//!
//! Applies one inbound message to the entity store using the per-type merge
//! rules. Every rule is idempotent or last-write-wins; there is no
//! sequencing across senders.
//!
//! ## Merge Rules
//!
//! | Type          | Keyed by     | Effect                                        |
//! |---------------|--------------|-----------------------------------------------|
//! | JOIN / SPAWN  | payload id   | insert (chat line) or overwrite                |
//! | UPDATE        | payload id   | field merge, unknown id is inert               |
//! | KILL          | sender/target| kills +1, deaths +1 or dummy removed           |
//! | CHAT          | -            | append                                         |
//! | PLACE_OBJECT  | payload id   | insert if absent                               |
//! | REMOVE_OBJECT | payload id   | delete if present                              |

use tracing::{debug, info};

use crate::core::ids::EntityId;
use crate::game::state::{ChatMessage, EntityStore, PlayerEntity, VictimOutcome};
use crate::network::protocol::{MessageBody, NetworkMessage, UpdatePayload};

/// What applying a message did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The store changed.
    pub changed: bool,
    /// The local participant was killed by this id.
    pub local_death: Option<EntityId>,
}

impl ApplyOutcome {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed(changed: bool) -> Self {
        Self { changed, local_death: None }
    }
}

/// Parse a raw frame. Malformed frames are logged and dropped.
pub fn parse_frame(text: &str) -> Option<NetworkMessage> {
    match NetworkMessage::from_json(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!("Dropping malformed frame: {}", e);
            None
        }
    }
}

/// Apply one message to the store.
pub fn apply(store: &mut EntityStore, msg: &NetworkMessage) -> ApplyOutcome {
    let sender = &msg.sender_id;

    match &msg.body {
        MessageBody::Join(player) => apply_join(store, player.clone(), false),
        MessageBody::Spawn(dummy) => {
            let mut dummy = dummy.clone();
            dummy.is_dummy = true;
            if dummy.spawned_by.is_none() {
                dummy.spawned_by = Some(sender.clone());
            }
            apply_join(store, dummy, true)
        }
        MessageBody::Update(update) => apply_update(store, sender, update),
        MessageBody::Kill(kill) => apply_kill(store, sender, &kill.target_id),
        MessageBody::Chat(line) => {
            store.add_chat_message(line.clone());
            ApplyOutcome::changed(true)
        }
        MessageBody::PlaceObject(object) => ApplyOutcome::changed(store.place_object(object.clone())),
        MessageBody::RemoveObject(remove) => ApplyOutcome::changed(store.remove_object(&remove.id)),
    }
}

fn apply_join(store: &mut EntityStore, player: PlayerEntity, spawned: bool) -> ApplyOutcome {
    if store.is_local(&player.id) {
        return ApplyOutcome::unchanged();
    }

    let name = player.username.clone();
    if store.add_player(player) {
        let line = if spawned {
            format!("Dummy spawned: {}", name)
        } else {
            format!("{} joined", name)
        };
        info!("{}", line);
        store.add_chat_message(ChatMessage::system(line));
    }
    ApplyOutcome::changed(true)
}

/// A sender may move itself, or a dummy it spawned.
fn has_update_authority(sender: &EntityId, target: &PlayerEntity) -> bool {
    target.id == *sender || (target.is_dummy && target.spawned_by.as_ref() == Some(sender))
}

fn apply_update(store: &mut EntityStore, sender: &EntityId, update: &UpdatePayload) -> ApplyOutcome {
    if store.is_local(&update.id) {
        return ApplyOutcome::unchanged();
    }

    let Some(target) = store.player(&update.id) else {
        return ApplyOutcome::unchanged();
    };
    if !has_update_authority(sender, target) {
        debug!("Ignoring UPDATE for {} from {}", update.id, sender);
        return ApplyOutcome::unchanged();
    }

    ApplyOutcome::changed(store.update_player(update))
}

fn apply_kill(store: &mut EntityStore, killer: &EntityId, victim: &EntityId) -> ApplyOutcome {
    let outcome = store.register_kill(killer, victim);

    if store.is_local(victim) && outcome.victim == VictimOutcome::DeathCounted {
        let killer_name = store.player(killer)
            .map(|p| p.username.clone())
            .unwrap_or_else(|| killer.to_string());

        store.respawn_local();
        store.add_chat_message(ChatMessage::system(format!("You were killed by {}", killer_name)));
        info!("Killed by {}", killer_name);

        return ApplyOutcome {
            changed: true,
            local_death: Some(killer.clone()),
        };
    }

    ApplyOutcome::changed(outcome.changed())
}
