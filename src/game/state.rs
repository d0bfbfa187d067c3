//! Entity Store
//!
//! The local mirror of every known player and world object, the capped chat
//! log, the local-only status fields gameplay writes, and the queue of
//! outgoing discrete events.
//!
//! Pure data and mutation; no I/O. Uses BTreeMap so every participant
//! iterates players in the same order.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::ids::{self, EntityId};
use crate::core::vec3::Vec3;
use crate::network::protocol::{NetworkMessage, UpdatePayload};

/// Chat log keeps this many most recent lines.
pub const CHAT_LOG_CAPACITY: usize = 50;

/// Emote value meaning "not emoting".
pub const EMOTE_NONE: &str = "none";

/// Default (and maximum) health.
pub const DEFAULT_MAX_HEALTH: i32 = 100;

/// Magazine size.
pub const DEFAULT_MAX_AMMO: u32 = 30;

/// Palette a new participant picks its color from.
pub const PLAYER_COLORS: [&str; 7] = [
    "#ef4444", // Red
    "#3b82f6", // Blue
    "#22c55e", // Green
    "#eab308", // Yellow
    "#a855f7", // Purple
    "#ec4899", // Pink
    "#14b8a6", // Teal
];

/// Color every dummy is drawn with.
pub const DUMMY_COLOR: &str = "#e5e7eb";

// =============================================================================
// ENUMS
// =============================================================================

/// Privilege role of a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Regular player
    #[default]
    Guest,
    /// Moderator
    Admin,
    /// Room owner
    Owner,
}

impl Role {
    /// Admins and owners may moderate.
    pub fn can_moderate(self) -> bool {
        matches!(self, Role::Admin | Role::Owner)
    }
}

/// Item a player holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    /// Empty hands
    #[default]
    None,
    /// Ranged weapon, uses ammo
    Gun,
    /// Melee weapon
    Sword,
    /// Placement tool
    Build,
    /// Instrument
    Ukulele,
    /// Fishing rod
    FishingRod,
    /// Spawns a training dummy
    WeakestDummy,
}

impl ItemType {
    /// How long the attack flag stays raised after using this item.
    pub fn attack_duration(self) -> Duration {
        match self {
            ItemType::Ukulele | ItemType::FishingRod => Duration::from_millis(500),
            _ => Duration::from_millis(300),
        }
    }
}

/// Kind of placed world object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorldObjectType {
    /// Cube
    Block,
    /// Ball
    Sphere,
    /// Prefab house
    House,
    /// Drivable vehicle
    Car,
}

/// Game mode of the local session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    /// Obstacle course sandbox
    #[default]
    Obby,
    /// Combat; respawn refills health and ammo
    Rivals,
    /// Vehicle racing
    Racing,
    /// Exploration
    Backrooms,
}

// =============================================================================
// ENTITIES
// =============================================================================

fn default_emote() -> String {
    EMOTE_NONE.to_string()
}

fn default_health() -> i32 {
    DEFAULT_MAX_HEALTH
}

/// One participant, human or dummy.
///
/// Fields older senders may omit default to a fresh player's values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntity {
    /// Unique id within the session
    pub id: EntityId,
    /// Display name
    pub username: String,
    /// Privilege role
    #[serde(default)]
    pub role: Role,
    /// World position
    pub position: Vec3,
    /// Euler rotation (yaw in `y`)
    pub rotation: Vec3,
    /// Color tag
    #[serde(default)]
    pub color: String,
    /// Held item
    #[serde(default)]
    pub held_item: ItemType,
    /// Mid-attack
    #[serde(default)]
    pub is_attacking: bool,
    /// Mid-throw
    #[serde(default)]
    pub is_throwing: bool,
    /// In the air
    #[serde(default)]
    pub is_jumping: bool,
    /// Emote id, `"none"` when idle
    #[serde(default = "default_emote")]
    pub emote: String,
    /// Current health
    #[serde(default = "default_health")]
    pub health: i32,
    /// Health cap
    #[serde(default = "default_health")]
    pub max_health: i32,
    /// Kills credited
    #[serde(default)]
    pub kills: u32,
    /// Deaths counted
    #[serde(default)]
    pub deaths: u32,
    /// Vehicle this player is driving
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driving_vehicle_id: Option<EntityId>,
    /// Training dummy rather than a participant
    #[serde(default)]
    pub is_dummy: bool,
    /// Participant that spawned this dummy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawned_by: Option<EntityId>,
}

impl PlayerEntity {
    /// Create a fresh player at the spawn point.
    pub fn new(id: EntityId, username: impl Into<String>, role: Role, color: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            role,
            position: Vec3::SPAWN,
            rotation: Vec3::ZERO,
            color: color.into(),
            held_item: ItemType::None,
            is_attacking: false,
            is_throwing: false,
            is_jumping: false,
            emote: default_emote(),
            health: DEFAULT_MAX_HEALTH,
            max_health: DEFAULT_MAX_HEALTH,
            kills: 0,
            deaths: 0,
            driving_vehicle_id: None,
            is_dummy: false,
            spawned_by: None,
        }
    }

    /// Create a dummy owned by `spawner`.
    pub fn dummy(id: EntityId, name: impl Into<String>, position: Vec3, rotation: Vec3, spawner: EntityId) -> Self {
        Self {
            position,
            rotation,
            is_dummy: true,
            spawned_by: Some(spawner),
            ..Self::new(id, name, Role::Guest, DUMMY_COLOR)
        }
    }

    /// Apply an UPDATE sample.
    ///
    /// Transform is last-write-wins; every other field only when present.
    pub fn merge_update(&mut self, update: &UpdatePayload) {
        self.position = update.position;
        self.rotation = update.rotation;
        if let Some(v) = update.is_attacking {
            self.is_attacking = v;
        }
        if let Some(v) = update.is_jumping {
            self.is_jumping = v;
        }
        if let Some(v) = &update.emote {
            self.emote = v.clone();
        }
        if let Some(v) = update.is_throwing {
            self.is_throwing = v;
        }
        if let Some(v) = update.health {
            self.health = v;
        }
        if let Some(v) = &update.driving_vehicle_id {
            self.driving_vehicle_id = v.clone();
        }
    }
}

/// A placed, persistent environment object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldObject {
    /// Unique id
    pub id: EntityId,
    /// Object kind
    #[serde(rename = "type")]
    pub kind: WorldObjectType,
    /// World position
    pub position: Vec3,
    /// Euler rotation
    pub rotation: Vec3,
    /// Color override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Participant that placed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<EntityId>,
}

/// Position and rotation pair.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Pose {
    /// World position
    pub position: Vec3,
    /// Euler rotation
    pub rotation: Vec3,
}

/// One chat line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique line id
    pub id: String,
    /// Sender label (display name, "System", ...)
    pub sender: String,
    /// Line body
    pub text: String,
    /// Generated by the system, not typed
    #[serde(default)]
    pub is_system: bool,
    /// Generated by an assistant
    #[serde(default)]
    pub is_ai: bool,
}

impl ChatMessage {
    /// Line typed by a player.
    pub fn from_player(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: ids::chat_id(),
            sender: sender.into(),
            text: text.into(),
            is_system: false,
            is_ai: false,
        }
    }

    /// Line generated locally by the system.
    pub fn system(text: impl Into<String>) -> Self {
        Self::system_as("System", text)
    }

    /// System line with a custom sender label.
    pub fn system_as(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            is_system: true,
            ..Self::from_player(sender, text)
        }
    }
}

/// Append-only chat log keeping the most recent `capacity` lines.
#[derive(Clone, Debug)]
pub struct ChatLog {
    entries: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ChatLog {
    /// Create an empty log.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&mut self, message: ChatMessage) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    /// Lines, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    /// Number of lines kept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log has no lines.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent line.
    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.back()
    }

    /// Owned copy, oldest first.
    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(CHAT_LOG_CAPACITY)
    }
}

// =============================================================================
// LOCAL STATUS
// =============================================================================

/// Fields only the local gameplay writes. Sampled into every heartbeat.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalStatus {
    /// Attack flag
    pub is_attacking: bool,
    /// Throw flag
    pub is_throwing: bool,
    /// Jump flag
    pub is_jumping: bool,
    /// Current emote
    pub emote: String,
    /// Current health
    pub health: i32,
    /// Health cap
    pub max_health: i32,
    /// Rounds left
    pub ammo: u32,
    /// Magazine size
    pub max_ammo: u32,
    /// Vehicle being driven
    pub driving_vehicle_id: Option<EntityId>,
    /// Local game mode
    pub game_mode: GameMode,
}

impl Default for LocalStatus {
    fn default() -> Self {
        Self {
            is_attacking: false,
            is_throwing: false,
            is_jumping: false,
            emote: default_emote(),
            health: DEFAULT_MAX_HEALTH,
            max_health: DEFAULT_MAX_HEALTH,
            ammo: DEFAULT_MAX_AMMO,
            max_ammo: DEFAULT_MAX_AMMO,
            driving_vehicle_id: None,
            game_mode: GameMode::Obby,
        }
    }
}

/// Transient flag with a delayed reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransientFlag {
    /// `is_attacking`
    Attacking,
    /// `is_throwing`
    Throwing,
    /// `is_jumping`
    Jumping,
}

// =============================================================================
// KILL OUTCOME
// =============================================================================

/// What a kill did to the victim record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VictimOutcome {
    /// Victim was a dummy and has been deleted.
    DummyRemoved,
    /// Victim's death counter was incremented.
    DeathCounted,
    /// Victim is not in the store.
    Unknown,
}

/// Result of `EntityStore::register_kill`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KillOutcome {
    /// Killer was known and got a kill.
    pub killer_credited: bool,
    /// What happened to the victim
    pub victim: VictimOutcome,
}

impl KillOutcome {
    /// True when anything in the store changed.
    pub fn changed(&self) -> bool {
        self.killer_credited || self.victim != VictimOutcome::Unknown
    }
}

/// Row of the kill/death leaderboard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// Player id
    pub id: EntityId,
    /// Display name
    pub username: String,
    /// Privilege role
    pub role: Role,
    /// Kills credited
    pub kills: u32,
    /// Deaths counted
    pub deaths: u32,
    /// Whether this row is the local participant
    pub is_local: bool,
}

// =============================================================================
// ENTITY STORE
// =============================================================================

/// Local mirror of shared game state.
#[derive(Clone, Debug)]
pub struct EntityStore {
    /// Id of the local participant (always present in `players`)
    local_id: EntityId,

    /// All known players, including the local one and dummies
    players: BTreeMap<EntityId, PlayerEntity>,

    /// World objects in placement order
    world_objects: Vec<WorldObject>,

    /// Local driver's pose overrides for vehicles (never broadcast)
    vehicle_poses: BTreeMap<EntityId, Pose>,

    /// Capped chat log
    chat: ChatLog,

    /// Local-only status
    local: LocalStatus,

    /// Discrete messages waiting for the next broadcast tick
    outgoing: Vec<NetworkMessage>,
}

impl EntityStore {
    /// Create a store containing only the local participant.
    pub fn new(local_player: PlayerEntity) -> Self {
        let local_id = local_player.id.clone();
        let mut players = BTreeMap::new();
        players.insert(local_id.clone(), local_player);

        Self {
            local_id,
            players,
            world_objects: Vec::new(),
            vehicle_poses: BTreeMap::new(),
            chat: ChatLog::default(),
            local: LocalStatus::default(),
            outgoing: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Players
    // -------------------------------------------------------------------------

    /// Id of the local participant.
    pub fn local_id(&self) -> &EntityId {
        &self.local_id
    }

    /// Local participant's record.
    pub fn local_player(&self) -> Option<&PlayerEntity> {
        self.players.get(&self.local_id)
    }

    /// Local participant's record, mutably.
    pub fn local_player_mut(&mut self) -> Option<&mut PlayerEntity> {
        self.players.get_mut(&self.local_id)
    }

    /// Whether `id` is the local participant.
    pub fn is_local(&self, id: &EntityId) -> bool {
        *id == self.local_id
    }

    /// All players, sorted by id.
    pub fn players(&self) -> &BTreeMap<EntityId, PlayerEntity> {
        &self.players
    }

    /// Get a player by id.
    pub fn player(&self, id: &EntityId) -> Option<&PlayerEntity> {
        self.players.get(id)
    }

    /// Number of known players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Insert or overwrite a player record.
    ///
    /// Returns true if the id was not known before.
    pub fn add_player(&mut self, player: PlayerEntity) -> bool {
        self.players.insert(player.id.clone(), player).is_none()
    }

    /// Merge an UPDATE sample. Unknown ids are ignored.
    ///
    /// Returns true if a record was updated.
    pub fn update_player(&mut self, update: &UpdatePayload) -> bool {
        match self.players.get_mut(&update.id) {
            Some(player) => {
                player.merge_update(update);
                true
            }
            None => false,
        }
    }

    /// Delete a player record. The local participant cannot be removed.
    pub fn remove_player(&mut self, id: &EntityId) -> Option<PlayerEntity> {
        if self.is_local(id) {
            return None;
        }
        self.players.remove(id)
    }

    /// Find a player by display name.
    pub fn find_by_username(&self, username: &str) -> Option<&PlayerEntity> {
        self.players.values().find(|p| p.username == username)
    }

    /// Credit `killer_id` with a kill and `victim_id` with a death.
    ///
    /// A dummy victim is deleted instead of getting a death.
    pub fn register_kill(&mut self, killer_id: &EntityId, victim_id: &EntityId) -> KillOutcome {
        let killer_credited = match self.players.get_mut(killer_id) {
            Some(killer) => {
                killer.kills = killer.kills.saturating_add(1);
                true
            }
            None => false,
        };

        let victim = match self.players.get(victim_id).map(|p| p.is_dummy) {
            Some(true) => {
                self.players.remove(victim_id);
                VictimOutcome::DummyRemoved
            }
            Some(false) => {
                if let Some(p) = self.players.get_mut(victim_id) {
                    p.deaths = p.deaths.saturating_add(1);
                }
                VictimOutcome::DeathCounted
            }
            None => VictimOutcome::Unknown,
        };

        KillOutcome { killer_credited, victim }
    }

    /// Players sorted by kills (desc), then deaths (asc).
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut rows: Vec<_> = self.players.values()
            .map(|p| LeaderboardEntry {
                id: p.id.clone(),
                username: p.username.clone(),
                role: p.role,
                kills: p.kills,
                deaths: p.deaths,
                is_local: p.id == self.local_id,
            })
            .collect();

        rows.sort_by(|a, b| b.kills.cmp(&a.kills).then(a.deaths.cmp(&b.deaths)));
        rows
    }

    // -------------------------------------------------------------------------
    // World objects
    // -------------------------------------------------------------------------

    /// World objects in placement order.
    pub fn world_objects(&self) -> &[WorldObject] {
        &self.world_objects
    }

    /// Get an object by id.
    pub fn object(&self, id: &EntityId) -> Option<&WorldObject> {
        self.world_objects.iter().find(|o| o.id == *id)
    }

    /// Insert an object unless its id is already present.
    ///
    /// Returns true if inserted.
    pub fn place_object(&mut self, object: WorldObject) -> bool {
        if self.object(&object.id).is_some() {
            return false;
        }
        self.world_objects.push(object);
        true
    }

    /// Delete an object if present. Returns true if removed.
    pub fn remove_object(&mut self, id: &EntityId) -> bool {
        let before = self.world_objects.len();
        self.world_objects.retain(|o| o.id != *id);
        self.vehicle_poses.remove(id);
        self.world_objects.len() != before
    }

    /// Cache the local driver's pose for a vehicle.
    ///
    /// Ignored for unknown objects.
    pub fn set_vehicle_pose(&mut self, id: &EntityId, pose: Pose) -> bool {
        if self.object(id).is_none() {
            return false;
        }
        self.vehicle_poses.insert(id.clone(), pose);
        true
    }

    /// Current pose of an object: the cached driver pose if any,
    /// else where it was placed.
    pub fn object_pose(&self, id: &EntityId) -> Option<Pose> {
        if let Some(pose) = self.vehicle_poses.get(id) {
            return Some(*pose);
        }
        self.object(id).map(|o| Pose {
            position: o.position,
            rotation: o.rotation,
        })
    }

    // -------------------------------------------------------------------------
    // Chat
    // -------------------------------------------------------------------------

    /// The chat log.
    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Append a chat line.
    pub fn add_chat_message(&mut self, message: ChatMessage) {
        self.chat.push(message);
    }

    // -------------------------------------------------------------------------
    // Outgoing queue
    // -------------------------------------------------------------------------

    /// Queue a discrete message for the next tick.
    ///
    /// Only discrete events are queued; transforms and presence go out with
    /// the heartbeat.
    pub fn queue_message(&mut self, message: NetworkMessage) {
        if !message.kind().is_discrete() {
            debug!("Not queueing continuous {}", message.kind());
            return;
        }
        self.outgoing.push(message);
    }

    /// Take every queued message, leaving the queue empty.
    pub fn drain_outgoing(&mut self) -> Vec<NetworkMessage> {
        std::mem::take(&mut self.outgoing)
    }

    /// Queued messages.
    pub fn outgoing(&self) -> &[NetworkMessage] {
        &self.outgoing
    }

    // -------------------------------------------------------------------------
    // Local status
    // -------------------------------------------------------------------------

    /// Local-only status.
    pub fn local_status(&self) -> &LocalStatus {
        &self.local
    }

    /// Local-only status, mutably.
    pub fn local_status_mut(&mut self) -> &mut LocalStatus {
        &mut self.local
    }

    /// Move the local participant.
    pub fn move_local(&mut self, position: Vec3, rotation: Vec3) {
        if let Some(p) = self.local_player_mut() {
            p.position = position;
            p.rotation = rotation;
        }
    }

    /// Raise or lower a transient flag.
    pub fn set_flag(&mut self, flag: TransientFlag, value: bool) {
        match flag {
            TransientFlag::Attacking => self.local.is_attacking = value,
            TransientFlag::Throwing => self.local.is_throwing = value,
            TransientFlag::Jumping => self.local.is_jumping = value,
        }
    }

    /// Set the local emote.
    pub fn set_emote(&mut self, emote: impl Into<String>) {
        self.local.emote = emote.into();
    }

    /// Change the local held item.
    pub fn set_held_item(&mut self, item: ItemType) {
        if let Some(p) = self.local_player_mut() {
            p.held_item = item;
        }
    }

    /// Lose health, clamped at zero.
    pub fn take_damage(&mut self, amount: i32) {
        self.local.health = self.local.health.saturating_sub(amount.max(0)).max(0);
    }

    /// Gain health, clamped at max.
    pub fn heal(&mut self, amount: i32) {
        self.local.health = self.local.health.saturating_add(amount.max(0)).min(self.local.max_health);
    }

    /// Spend one round. Returns false when empty.
    pub fn use_ammo(&mut self) -> bool {
        if self.local.ammo == 0 {
            return false;
        }
        self.local.ammo -= 1;
        true
    }

    /// Refill the magazine.
    pub fn reload_ammo(&mut self) {
        self.local.ammo = self.local.max_ammo;
    }

    /// Respawn after a local death.
    ///
    /// Returns to the spawn point and stops emoting; RIVALS also refills
    /// health and ammo.
    pub fn respawn_local(&mut self) {
        self.local.emote = default_emote();
        if self.local.game_mode == GameMode::Rivals {
            self.local.health = self.local.max_health;
            self.local.ammo = self.local.max_ammo;
        }
        if let Some(p) = self.local_player_mut() {
            p.position = Vec3::SPAWN;
        }
    }

    /// Spawn a dummy owned by the local participant and queue its SPAWN.
    pub fn spawn_dummy(&mut self, name: impl Into<String>, position: Vec3, rotation: Vec3) -> EntityId {
        let id = EntityId::dummy();
        let dummy = PlayerEntity::dummy(id.clone(), name, position, rotation, self.local_id.clone());
        self.players.insert(id.clone(), dummy.clone());
        self.queue_message(NetworkMessage::spawn(dummy, self.local_id.clone()));
        id
    }

    // -------------------------------------------------------------------------
    // Sampling
    // -------------------------------------------------------------------------

    /// Full record of the local participant with local status folded in.
    ///
    /// This is what a JOIN announces.
    pub fn join_snapshot(&self) -> Option<PlayerEntity> {
        let mut p = self.local_player()?.clone();
        p.is_attacking = self.local.is_attacking;
        p.is_throwing = self.local.is_throwing;
        p.is_jumping = self.local.is_jumping;
        p.emote = self.local.emote.clone();
        p.health = self.local.health;
        p.max_health = self.local.max_health;
        p.driving_vehicle_id = self.local.driving_vehicle_id.clone();
        Some(p)
    }

    /// Current heartbeat sample of the local participant.
    pub fn heartbeat(&self) -> Option<UpdatePayload> {
        let p = self.local_player()?;
        Some(UpdatePayload {
            id: self.local_id.clone(),
            position: p.position,
            rotation: p.rotation,
            is_attacking: Some(self.local.is_attacking),
            is_jumping: Some(self.local.is_jumping),
            emote: Some(self.local.emote.clone()),
            is_throwing: Some(self.local.is_throwing),
            health: Some(self.local.health),
            driving_vehicle_id: Some(self.local.driving_vehicle_id.clone()),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn local() -> PlayerEntity {
        PlayerEntity::new(EntityId::new("me"), "Me", Role::Owner, PLAYER_COLORS[0])
    }

    fn remote(id: &str) -> PlayerEntity {
        PlayerEntity::new(EntityId::new(id), id.to_uppercase(), Role::Guest, PLAYER_COLORS[1])
    }

    fn block(id: &str) -> WorldObject {
        WorldObject {
            id: EntityId::new(id),
            kind: WorldObjectType::Block,
            position: Vec3::new(1.0, 0.0, 1.0),
            rotation: Vec3::ZERO,
            color: None,
            owner_id: None,
        }
    }

    #[test]
    fn test_local_player_present_on_creation() {
        let store = EntityStore::new(local());
        assert_eq!(store.player_count(), 1);
        assert_eq!(store.local_player().unwrap().username, "Me");
    }

    #[test]
    fn test_local_player_cannot_be_removed() {
        let mut store = EntityStore::new(local());
        assert!(store.remove_player(&EntityId::new("me")).is_none());
        assert!(store.local_player().is_some());
    }

    #[test]
    fn test_update_merges_present_fields_only() {
        let mut store = EntityStore::new(local());
        let mut b = remote("b");
        b.emote = "dance1".to_string();
        b.health = 80;
        store.add_player(b);

        let update = UpdatePayload {
            id: EntityId::new("b"),
            position: Vec3::new(4.0, 1.0, 2.0),
            rotation: Vec3::from_yaw(1.0),
            is_attacking: Some(true),
            ..Default::default()
        };
        assert!(store.update_player(&update));

        let b = store.player(&EntityId::new("b")).unwrap();
        assert_eq!(b.position, Vec3::new(4.0, 1.0, 2.0));
        assert!(b.is_attacking);
        assert_eq!(b.emote, "dance1");
        assert_eq!(b.health, 80);
    }

    #[test]
    fn test_update_unknown_is_noop() {
        let mut store = EntityStore::new(local());
        let update = UpdatePayload {
            id: EntityId::new("ghost"),
            ..Default::default()
        };
        assert!(!store.update_player(&update));
        assert!(store.player(&EntityId::new("ghost")).is_none());
    }

    #[test]
    fn test_kill_dummy_removes_it() {
        let mut store = EntityStore::new(local());
        let dummy_id = store.spawn_dummy("Weakest Dummy", Vec3::ZERO, Vec3::ZERO);

        let outcome = store.register_kill(&EntityId::new("me"), &dummy_id);
        assert_eq!(outcome.victim, VictimOutcome::DummyRemoved);
        assert!(store.player(&dummy_id).is_none());
        assert_eq!(store.local_player().unwrap().kills, 1);
    }

    #[test]
    fn test_kill_player_counts_death() {
        let mut store = EntityStore::new(local());
        store.add_player(remote("b"));

        let outcome = store.register_kill(&EntityId::new("me"), &EntityId::new("b"));
        assert!(outcome.killer_credited);
        assert_eq!(outcome.victim, VictimOutcome::DeathCounted);

        let b = store.player(&EntityId::new("b")).unwrap();
        assert_eq!(b.deaths, 1);
    }

    #[test]
    fn test_kill_unknown_ids() {
        let mut store = EntityStore::new(local());
        let outcome = store.register_kill(&EntityId::new("x"), &EntityId::new("y"));
        assert!(!outcome.changed());
    }

    #[test]
    fn test_place_object_idempotent() {
        let mut store = EntityStore::new(local());
        assert!(store.place_object(block("obj-1")));
        assert!(!store.place_object(block("obj-1")));
        assert_eq!(store.world_objects().len(), 1);
    }

    #[test]
    fn test_vehicle_pose_cache() {
        let mut store = EntityStore::new(local());
        let mut car = block("car-1");
        car.kind = WorldObjectType::Car;
        store.place_object(car);

        let moved = Pose {
            position: Vec3::new(10.0, 0.0, 3.0),
            rotation: Vec3::from_yaw(0.3),
        };
        assert!(store.set_vehicle_pose(&EntityId::new("car-1"), moved));
        assert_eq!(store.object_pose(&EntityId::new("car-1")), Some(moved));
        assert!(!store.set_vehicle_pose(&EntityId::new("nope"), moved));

        store.remove_object(&EntityId::new("car-1"));
        assert_eq!(store.object_pose(&EntityId::new("car-1")), None);
    }

    #[test]
    fn test_spawn_dummy_queues_spawn() {
        let mut store = EntityStore::new(local());
        let id = store.spawn_dummy("Bob", Vec3::new(0.0, 1.0, 3.0), Vec3::ZERO);

        let dummy = store.player(&id).unwrap();
        assert!(dummy.is_dummy);
        assert_eq!(dummy.color, DUMMY_COLOR);
        assert_eq!(dummy.spawned_by, Some(EntityId::new("me")));

        let queued = store.drain_outgoing();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].sender_id, EntityId::new("me"));
        assert!(store.outgoing().is_empty());
    }

    #[test]
    fn test_health_and_ammo_clamps() {
        let mut store = EntityStore::new(local());
        store.take_damage(250);
        assert_eq!(store.local_status().health, 0);
        store.heal(500);
        assert_eq!(store.local_status().health, DEFAULT_MAX_HEALTH);

        for _ in 0..DEFAULT_MAX_AMMO {
            assert!(store.use_ammo());
        }
        assert!(!store.use_ammo());
        store.reload_ammo();
        assert_eq!(store.local_status().ammo, DEFAULT_MAX_AMMO);
    }

    #[test]
    fn test_extreme_amounts_do_not_overflow() {
        let mut store = EntityStore::new(local());
        store.heal(i32::MAX);
        assert_eq!(store.local_status().health, DEFAULT_MAX_HEALTH);
        store.take_damage(i32::MAX);
        assert_eq!(store.local_status().health, 0);
        store.take_damage(i32::MIN);
        assert_eq!(store.local_status().health, 0);
        store.heal(i32::MIN);
        assert_eq!(store.local_status().health, 0);
    }

    #[test]
    fn test_only_discrete_messages_queued() {
        let mut store = EntityStore::new(local());
        let hb = store.heartbeat().unwrap();
        store.queue_message(NetworkMessage::update(hb));
        assert!(store.outgoing().is_empty());

        store.queue_message(NetworkMessage::remove_object(EntityId::new("obj-1"), EntityId::new("me")));
        assert_eq!(store.outgoing().len(), 1);
    }

    #[test]
    fn test_respawn_resets_by_mode() {
        let mut store = EntityStore::new(local());
        store.move_local(Vec3::new(50.0, -30.0, 2.0), Vec3::ZERO);
        store.set_emote("dance2");
        store.take_damage(60);

        store.respawn_local();
        assert_eq!(store.local_player().unwrap().position, Vec3::SPAWN);
        assert_eq!(store.local_status().emote, EMOTE_NONE);
        // Obby keeps health as-is
        assert_eq!(store.local_status().health, 40);

        store.local_status_mut().game_mode = GameMode::Rivals;
        store.use_ammo();
        store.respawn_local();
        assert_eq!(store.local_status().health, DEFAULT_MAX_HEALTH);
        assert_eq!(store.local_status().ammo, DEFAULT_MAX_AMMO);
    }

    #[test]
    fn test_leaderboard_order() {
        let mut store = EntityStore::new(local());
        let mut a = remote("a");
        a.kills = 3;
        a.deaths = 2;
        let mut b = remote("b");
        b.kills = 3;
        b.deaths = 0;
        store.add_player(a);
        store.add_player(b);

        let board = store.leaderboard();
        let order: Vec<_> = board.iter().map(|r| r.id.as_str().to_string()).collect();
        assert_eq!(order, vec!["b", "a", "me"]);
        assert!(board[2].is_local);
    }

    #[test]
    fn test_heartbeat_samples_local_status() {
        let mut store = EntityStore::new(local());
        store.move_local(Vec3::new(1.0, 2.0, 3.0), Vec3::from_yaw(0.7));
        store.set_flag(TransientFlag::Attacking, true);
        store.take_damage(10);

        let hb = store.heartbeat().unwrap();
        assert_eq!(hb.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(hb.is_attacking, Some(true));
        assert_eq!(hb.health, Some(90));
        assert_eq!(hb.driving_vehicle_id, Some(None));

        let snapshot = store.join_snapshot().unwrap();
        assert_eq!(snapshot.health, 90);
        assert!(snapshot.is_attacking);
    }

    #[test]
    fn test_chat_log_cap() {
        let mut log = ChatLog::new(3);
        for i in 0..5 {
            log.push(ChatMessage::system(format!("line {}", i)));
        }
        let texts: Vec<_> = log.iter().map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
    }

    proptest! {
        #[test]
        fn prop_chat_log_keeps_most_recent(n in 0usize..200) {
            let mut store = EntityStore::new(local());
            for i in 0..n {
                store.add_chat_message(ChatMessage::from_player("p", i.to_string()));
            }
            let texts: Vec<String> = store.chat().iter().map(|m| m.text.clone()).collect();
            let expected: Vec<String> = (n.saturating_sub(CHAT_LOG_CAPACITY)..n).map(|i| i.to_string()).collect();
            prop_assert!(store.chat().len() <= CHAT_LOG_CAPACITY);
            prop_assert_eq!(texts, expected);
        }

        #[test]
        fn prop_repeated_place_keeps_one(repeats in 1usize..20) {
            let mut store = EntityStore::new(local());
            for _ in 0..repeats {
                store.place_object(block("obj-1"));
            }
            let count = store.world_objects().iter().filter(|o| o.id.as_str() == "obj-1").count();
            prop_assert_eq!(count, 1);
        }
    }
}
