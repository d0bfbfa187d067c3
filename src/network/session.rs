//! Session Management
//!
//! Starts a session as host or joining peer and runs its driver.
//!
//! The driver is one task that owns the entity store and the connection set.
//! It reacts to three inputs:
//!
//! ```text
//!   transport events ──┐
//!   local intents  ────┼──▶ SessionDriver ──▶ ConnectionSet ──▶ peers
//!   tick / resets  ────┘          │
//!                                 └──▶ SessionEvent subscribers
//! ```
//!
//! Consumers talk to it through a `SessionHandle` and read `WorldView`
//! snapshots.

use std::time::Duration;
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::ids::{self, EntityId};
use crate::core::rendezvous::RendezvousId;
use crate::core::vec3::Vec3;
use crate::game::command::{self, ChatInput};
use crate::game::events::SessionEvent;
use crate::game::reconcile;
use crate::game::state::{
    ChatMessage, EntityStore, GameMode, ItemType, LeaderboardEntry, LocalStatus, PlayerEntity,
    Pose, TransientFlag, WorldObject, WorldObjectType, PLAYER_COLORS,
};
use crate::network::broadcast::{self as broadcast_loop, ActionTimers, FlagReset, THROW_DURATION};
use crate::network::config::SessionConfig;
use crate::network::connections::ConnectionSet;
use crate::network::protocol::NetworkMessage;
use crate::network::relay::Relay;
use crate::network::transport::{
    ConnectionId, Listener, Transport, TransportError, TransportEvent, EVENT_CAPACITY,
};

/// Buffered local intents.
const COMMAND_CAPACITY: usize = 128;

/// Buffered consumer events.
const SESSION_EVENT_CAPACITY: usize = 16;

/// Distance in front of the local player a dummy appears at.
pub const DUMMY_SPAWN_DISTANCE: f32 = 3.0;

// =============================================================================
// ERRORS & METADATA
// =============================================================================

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Another host already owns this room.
    #[error("Session unavailable: room {0} is already hosted")]
    SessionUnavailable(String),

    /// No host answered for this room.
    #[error("Host unreachable for room {0}")]
    HostUnreachable(String),

    /// Room code has the wrong shape.
    #[error("Invalid room code: {0:?}")]
    InvalidRoomCode(String),

    /// Transport failed during start.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session has ended.
    #[error("Session closed")]
    Closed,
}

/// Static facts about a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Shareable room code.
    pub room_code: String,
    /// Rendezvous id derived from the room code.
    pub rendezvous: RendezvousId,
    /// Local participant id.
    pub local_id: EntityId,
    /// Whether this participant hosts the room.
    pub is_host: bool,
}

/// Read-only snapshot for rendering and UI.
#[derive(Debug, Clone)]
pub struct WorldView {
    /// Shareable room code
    pub room_code: String,
    /// Local participant id
    pub local_id: EntityId,
    /// Whether this participant hosts the room
    pub is_host: bool,
    /// Open connections right now.
    pub connections: usize,
    /// All players, ordered by id.
    pub players: Vec<PlayerEntity>,
    /// World objects in placement order, vehicle poses applied.
    pub world_objects: Vec<WorldObject>,
    /// Chat log, oldest first.
    pub chat: Vec<ChatMessage>,
    /// Kills descending, then deaths ascending.
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Local-only gameplay fields
    pub local_status: LocalStatus,
}

impl WorldView {
    /// Find a player.
    pub fn player(&self, id: &EntityId) -> Option<&PlayerEntity> {
        self.players.iter().find(|p| p.id == *id)
    }

    /// The local participant.
    pub fn local_player(&self) -> Option<&PlayerEntity> {
        self.player(&self.local_id)
    }

    /// Find a world object.
    pub fn object(&self, id: &EntityId) -> Option<&WorldObject> {
        self.world_objects.iter().find(|o| o.id == *id)
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Local intents sent from the handle to the driver.
#[derive(Debug)]
enum Command {
    Move { position: Vec3, rotation: Vec3 },
    SetFlag(TransientFlag, bool),
    SetEmote(String),
    SetHeldItem(ItemType),
    Attack,
    Throw,
    ReportKill(EntityId),
    PlaceObject(WorldObject),
    RemoveObject(EntityId),
    SubmitChat(String),
    SpawnDummy { name: String, pose: Option<Pose>, reply: oneshot::Sender<EntityId> },
    DriveVehicle(Option<EntityId>),
    SetVehiclePose { id: EntityId, pose: Pose },
    TakeDamage(i32),
    Heal(i32),
    UseAmmo(oneshot::Sender<bool>),
    Reload,
    SetGameMode(GameMode),
    Snapshot(oneshot::Sender<WorldView>),
    Leave,
}

// =============================================================================
// START
// =============================================================================

fn resolve_room_code(config: &SessionConfig) -> Result<String, SessionError> {
    match (&config.room_code, config.is_host) {
        (Some(code), _) => {
            ids::normalize_room_code(code).ok_or_else(|| SessionError::InvalidRoomCode(code.clone()))
        }
        (None, true) => Ok(ids::generate_room_code()),
        (None, false) => Err(SessionError::InvalidRoomCode(String::new())),
    }
}

fn bootstrap_store(local_id: EntityId, config: &SessionConfig) -> EntityStore {
    let profile = &config.profile;
    let color = profile.color.clone().unwrap_or_else(|| {
        PLAYER_COLORS.choose(&mut rand::thread_rng()).copied().unwrap_or(PLAYER_COLORS[0]).to_string()
    });

    let local = PlayerEntity::new(local_id, profile.username.clone(), profile.role, color);
    let mut store = EntityStore::new(local);
    store.local_status_mut().game_mode = profile.game_mode;
    store
}

/// Start a session over `transport`.
///
/// A host claims the room's rendezvous id; a claim conflict is
/// `SessionUnavailable` and nothing is left running. A joining peer dials
/// the host once; failure is `HostUnreachable`.
pub async fn start_session<T: Transport>(
    transport: &T,
    config: SessionConfig,
) -> Result<SessionHandle, SessionError> {
    let room_code = resolve_room_code(&config)?;
    let rendezvous = RendezvousId::for_room(&room_code);
    let local_id = EntityId::local();

    let (transport_tx, transport_rx) = mpsc::channel(EVENT_CAPACITY);

    let listener = if config.is_host {
        let listener = transport.claim(&rendezvous, transport_tx).await.map_err(|e| match e {
            TransportError::AddressInUse(_) => SessionError::SessionUnavailable(room_code.clone()),
            other => SessionError::Transport(other),
        })?;
        info!("Hosting room {} at {}", room_code, listener.address());
        Some(listener)
    } else {
        transport.dial(&rendezvous, transport_tx).await.map_err(|e| match e {
            TransportError::PeerUnavailable(_) => SessionError::HostUnreachable(room_code.clone()),
            other => SessionError::Transport(other),
        })?;
        info!("Joined room {}", room_code);
        None
    };

    let info = SessionInfo {
        room_code,
        rendezvous,
        local_id: local_id.clone(),
        is_host: config.is_host,
    };

    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (resets_tx, resets_rx) = mpsc::unbounded_channel();
    let (events_tx, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

    let driver = SessionDriver {
        store: bootstrap_store(local_id, &config),
        conns: ConnectionSet::new(),
        relay: Relay::new(config.is_host),
        timers: ActionTimers::new(resets_tx),
        events: events_tx.clone(),
        info: info.clone(),
        host_lost: false,
        _listener: listener,
    };
    let task = tokio::spawn(driver.run(transport_rx, commands_rx, resets_rx, config.tick_interval()));

    Ok(SessionHandle {
        commands: commands_tx,
        events: events_tx,
        info,
        task,
    })
}

// =============================================================================
// HANDLE
// =============================================================================

/// Consumer-side handle to a running session.
///
/// Dropping it ends the session.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    info: SessionInfo,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Session metadata.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Shareable room code.
    pub fn room_code(&self) -> &str {
        &self.info.room_code
    }

    /// Local participant id.
    pub fn local_id(&self) -> &EntityId {
        &self.info.local_id
    }

    /// Whether this participant hosts the room.
    pub fn is_host(&self) -> bool {
        self.info.is_host
    }

    /// Receive pushed events (local death, host loss).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    async fn request<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Current state of everything.
    pub async fn snapshot(&self) -> Result<WorldView, SessionError> {
        self.request(Command::Snapshot).await
    }

    /// Local transform changed.
    pub async fn move_to(&self, position: Vec3, rotation: Vec3) -> Result<(), SessionError> {
        self.send(Command::Move { position, rotation }).await
    }

    /// Raise or lower a transient flag directly.
    pub async fn set_flag(&self, flag: TransientFlag, value: bool) -> Result<(), SessionError> {
        self.send(Command::SetFlag(flag, value)).await
    }

    /// Start an emote, or `"none"` to stop.
    pub async fn set_emote(&self, emote: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::SetEmote(emote.into())).await
    }

    /// Switch the held item.
    pub async fn set_held_item(&self, item: ItemType) -> Result<(), SessionError> {
        self.send(Command::SetHeldItem(item)).await
    }

    /// Swing the held item. The attack flag drops after the item's
    /// animation time.
    pub async fn attack(&self) -> Result<(), SessionError> {
        self.send(Command::Attack).await
    }

    /// Throw. The throw flag drops after 300 ms.
    pub async fn throw(&self) -> Result<(), SessionError> {
        self.send(Command::Throw).await
    }

    /// The local player killed `target`.
    pub async fn report_kill(&self, target: EntityId) -> Result<(), SessionError> {
        self.send(Command::ReportKill(target)).await
    }

    /// Place an object with a fresh id. Returns the id.
    pub async fn place_object(
        &self,
        kind: WorldObjectType,
        position: Vec3,
        rotation: Vec3,
        color: Option<String>,
    ) -> Result<EntityId, SessionError> {
        let object = WorldObject {
            id: EntityId::object(),
            kind,
            position,
            rotation,
            color,
            owner_id: Some(self.info.local_id.clone()),
        };
        let id = object.id.clone();
        self.place(object).await?;
        Ok(id)
    }

    /// Place a fully specified object.
    pub async fn place(&self, object: WorldObject) -> Result<(), SessionError> {
        self.send(Command::PlaceObject(object)).await
    }

    /// Remove a world object everywhere.
    pub async fn remove_object(&self, id: EntityId) -> Result<(), SessionError> {
        self.send(Command::RemoveObject(id)).await
    }

    /// Chat input as typed. Slash commands run locally.
    pub async fn submit_chat(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::SubmitChat(text.into())).await
    }

    /// Spawn a dummy at `pose`, or in front of the local player facing it.
    pub async fn spawn_dummy(&self, name: impl Into<String>, pose: Option<Pose>) -> Result<EntityId, SessionError> {
        let name = name.into();
        self.request(|reply| Command::SpawnDummy { name, pose, reply }).await
    }

    /// Start (`Some`) or stop (`None`) driving a vehicle.
    pub async fn drive_vehicle(&self, vehicle: Option<EntityId>) -> Result<(), SessionError> {
        self.send(Command::DriveVehicle(vehicle)).await
    }

    /// Local driver moved a vehicle. Never broadcast.
    pub async fn set_vehicle_pose(&self, id: EntityId, pose: Pose) -> Result<(), SessionError> {
        self.send(Command::SetVehiclePose { id, pose }).await
    }

    /// Lose health, clamped at zero.
    pub async fn take_damage(&self, amount: i32) -> Result<(), SessionError> {
        self.send(Command::TakeDamage(amount)).await
    }

    /// Gain health, clamped at max.
    pub async fn heal(&self, amount: i32) -> Result<(), SessionError> {
        self.send(Command::Heal(amount)).await
    }

    /// Spend a round. False when empty.
    pub async fn use_ammo(&self) -> Result<bool, SessionError> {
        self.request(Command::UseAmmo).await
    }

    /// Refill the magazine.
    pub async fn reload(&self) -> Result<(), SessionError> {
        self.send(Command::Reload).await
    }

    /// Change the local game mode.
    pub async fn set_game_mode(&self, mode: GameMode) -> Result<(), SessionError> {
        self.send(Command::SetGameMode(mode)).await
    }

    /// End the session and wait for the driver to stop.
    pub async fn leave(self) {
        let _ = self.commands.send(Command::Leave).await;
        let _ = self.task.await;
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct SessionDriver {
    store: EntityStore,
    conns: ConnectionSet,
    relay: Relay,
    timers: ActionTimers,
    events: broadcast::Sender<SessionEvent>,
    info: SessionInfo,
    host_lost: bool,
    /// Held so the claim lives as long as the driver
    _listener: Option<Listener>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
        mut commands_rx: mpsc::Receiver<Command>,
        mut resets_rx: mpsc::UnboundedReceiver<FlagReset>,
        tick_interval: Duration,
    ) {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    broadcast_loop::tick(&mut self.store, &mut self.conns);
                }
                Some(event) = transport_rx.recv() => {
                    self.on_transport(event);
                }
                Some(reset) = resets_rx.recv() => {
                    if self.timers.take(reset) {
                        self.store.set_flag(reset.0, false);
                    }
                }
                command = commands_rx.recv() => match command {
                    Some(Command::Leave) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }

        info!(
            "Left room {} (relayed {} message(s) as {} frame(s))",
            self.info.room_code,
            self.relay.forwarded_messages(),
            self.relay.forwarded_frames(),
        );
    }

    fn publish(&self, event: SessionEvent) {
        debug!("Publishing {}", event.label());
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { conn, outbound, remote } => {
                info!("{} opened ({})", conn, remote);
                self.conns.insert(conn, outbound, remote);
                self.greet(conn);
            }
            TransportEvent::Frame { conn, text } => self.on_frame(conn, &text),
            TransportEvent::Closed { conn } => {
                // The peer's entity stays; no removal is broadcast
                if let Some(c) = self.conns.remove(conn) {
                    info!("{} closed ({}) after {:?}", conn, c.remote, c.age());
                    if c.backlog_len() > 0 {
                        debug!("{} frame(s) never sent on {}", c.backlog_len(), conn);
                    }
                }
                if !self.info.is_host && self.conns.is_empty() && !self.host_lost {
                    self.host_lost = true;
                    warn!("Lost connection to host of room {}", self.info.room_code);
                    self.store.add_chat_message(ChatMessage::system("Disconnected from host."));
                    self.publish(SessionEvent::HostDisconnected);
                }
            }
        }
    }

    /// Announce ourselves on a new connection; a host also replays what it
    /// knows so the newcomer converges without a full-sync message.
    fn greet(&mut self, conn: ConnectionId) {
        let mut messages = Vec::new();
        if let Some(me) = self.store.join_snapshot() {
            messages.push(NetworkMessage::join(me));
        }

        if self.info.is_host {
            for player in self.store.players().values() {
                if self.store.is_local(&player.id) {
                    continue;
                }
                let msg = match (&player.spawned_by, player.is_dummy) {
                    (Some(spawner), true) => NetworkMessage::spawn(player.clone(), spawner.clone()),
                    _ => NetworkMessage::join(player.clone()),
                };
                messages.push(msg);
            }
            for object in self.store.world_objects() {
                messages.push(NetworkMessage::place_object(object.clone(), self.info.local_id.clone()));
            }
        }

        let frames: Vec<String> = messages.iter()
            .filter_map(|msg| match msg.to_json() {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Failed to serialize {} for {}: {}", msg.kind(), conn, e);
                    None
                }
            })
            .collect();
        let count = frames.len();

        // Every frame must arrive or the newcomer misses state
        self.conns.send_all(conn, frames);
        debug!("Greeted {} with {} message(s)", conn, count);
    }

    fn on_frame(&mut self, conn: ConnectionId, text: &str) {
        let Some(msg) = reconcile::parse_frame(text) else {
            return;
        };

        #[cfg(feature = "debug-tracing")]
        tracing::trace!("{} from {} via {}", msg.kind(), msg.sender_id, conn);

        if self.store.is_local(&msg.sender_id) {
            debug!("Dropping echo of own {} on {}", msg.kind(), conn);
            return;
        }

        let outcome = reconcile::apply(&mut self.store, &msg);
        if let Some(killer_id) = outcome.local_death {
            self.publish(SessionEvent::LocalDeath { killer_id });
        }

        self.relay.forward(&mut self.conns, conn, &msg, text, &self.info.local_id);
    }

    // -------------------------------------------------------------------------
    // Local intents
    // -------------------------------------------------------------------------

    /// Apply a discrete message locally and queue it for the next tick.
    fn emit(&mut self, msg: NetworkMessage) {
        reconcile::apply(&mut self.store, &msg);
        self.store.queue_message(msg);
    }

    fn on_command(&mut self, command: Command) {
        let local_id = self.info.local_id.clone();

        match command {
            Command::Move { position, rotation } => self.store.move_local(position, rotation),
            Command::SetFlag(flag, value) => {
                self.timers.cancel(flag);
                self.store.set_flag(flag, value);
            }
            Command::SetEmote(emote) => self.store.set_emote(emote),
            Command::SetHeldItem(item) => self.store.set_held_item(item),
            Command::Attack => {
                let item = self.store.local_player().map(|p| p.held_item).unwrap_or_default();
                self.store.set_flag(TransientFlag::Attacking, true);
                self.timers.arm(TransientFlag::Attacking, item.attack_duration());
            }
            Command::Throw => {
                self.store.set_flag(TransientFlag::Throwing, true);
                self.timers.arm(TransientFlag::Throwing, THROW_DURATION);
            }
            Command::ReportKill(target) => {
                // Self-kills are not reported
                if target == local_id {
                    return;
                }
                self.emit(NetworkMessage::kill(local_id, target));
            }
            Command::PlaceObject(object) => self.emit(NetworkMessage::place_object(object, local_id)),
            Command::RemoveObject(id) => self.emit(NetworkMessage::remove_object(id, local_id)),
            Command::SubmitChat(text) => self.submit_chat(text),
            Command::SpawnDummy { name, pose, reply } => {
                let pose = pose.unwrap_or_else(|| self.pose_in_front());
                let id = self.store.spawn_dummy(name.clone(), pose.position, pose.rotation);
                self.store.add_chat_message(ChatMessage::system(format!("Dummy spawned: {}", name)));
                let _ = reply.send(id);
            }
            Command::DriveVehicle(vehicle) => {
                self.store.local_status_mut().driving_vehicle_id = vehicle;
            }
            Command::SetVehiclePose { id, pose } => {
                if !self.store.set_vehicle_pose(&id, pose) {
                    debug!("Pose for unknown vehicle {}", id);
                }
            }
            Command::TakeDamage(amount) => self.store.take_damage(amount),
            Command::Heal(amount) => self.store.heal(amount),
            Command::UseAmmo(reply) => {
                let _ = reply.send(self.store.use_ammo());
            }
            Command::Reload => self.store.reload_ammo(),
            Command::SetGameMode(mode) => self.store.local_status_mut().game_mode = mode,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.view());
            }
            // Handled by the run loop
            Command::Leave => {}
        }
    }

    fn submit_chat(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        let Some((username, role)) = self.store.local_player().map(|p| (p.username.clone(), p.role)) else {
            return;
        };

        match command::parse_chat_input(&text, role) {
            ChatInput::Command(cmd) => command::execute(&mut self.store, cmd),
            ChatInput::Say(text) => {
                let line = ChatMessage::from_player(username, text);
                self.emit(NetworkMessage::chat(line, self.info.local_id.clone()));
            }
        }
    }

    /// Pose `DUMMY_SPAWN_DISTANCE` in front of the local player, facing it.
    fn pose_in_front(&self) -> Pose {
        let Some(me) = self.store.local_player() else {
            return Pose::default();
        };
        let yaw = me.rotation.yaw();
        Pose {
            position: me.position.in_front(yaw, DUMMY_SPAWN_DISTANCE),
            rotation: Vec3::from_yaw(yaw + std::f32::consts::PI),
        }
    }

    fn view(&self) -> WorldView {
        let world_objects = self.store.world_objects().iter()
            .map(|o| {
                let mut o = o.clone();
                if let Some(pose) = self.store.object_pose(&o.id) {
                    o.position = pose.position;
                    o.rotation = pose.rotation;
                }
                o
            })
            .collect();

        WorldView {
            room_code: self.info.room_code.clone(),
            local_id: self.info.local_id.clone(),
            is_host: self.info.is_host,
            connections: self.conns.len(),
            players: self.store.players().values().cloned().collect(),
            world_objects,
            chat: self.store.chat().to_vec(),
            leaderboard: self.store.leaderboard(),
            local_status: self.store.local_status().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Role;
    use crate::network::config::PlayerProfile;
    use crate::network::memory::MemoryTransport;

    const WAIT: Duration = Duration::from_secs(3);

    fn profile(name: &str, role: Role) -> PlayerProfile {
        PlayerProfile {
            username: name.to_string(),
            role,
            ..PlayerProfile::default()
        }
    }

    async fn host(transport: &MemoryTransport, code: &str) -> SessionHandle {
        start_session(transport, SessionConfig::host(Some(code.to_string()), profile("Host", Role::Owner)))
            .await
            .unwrap()
    }

    async fn join(transport: &MemoryTransport, code: &str, name: &str) -> SessionHandle {
        start_session(transport, SessionConfig::join(code, profile(name, Role::Guest)))
            .await
            .unwrap()
    }

    /// Poll snapshots until `check` holds.
    async fn eventually(handle: &SessionHandle, check: impl Fn(&WorldView) -> bool) -> WorldView {
        let poll = async {
            loop {
                let view = handle.snapshot().await.unwrap();
                if check(&view) {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(WAIT, poll).await.expect("condition not reached in time")
    }

    fn block(id: &str) -> WorldObject {
        WorldObject {
            id: EntityId::new(id),
            kind: WorldObjectType::Block,
            position: Vec3::new(2.0, 0.5, 2.0),
            rotation: Vec3::ZERO,
            color: None,
            owner_id: None,
        }
    }

    #[tokio::test]
    async fn test_host_and_peer_converge() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "ABCDE").await;
        let b = join(&transport, "abcde", "Bea").await;
        assert_eq!(b.room_code(), "ABCDE");

        let host_id = h.local_id().clone();
        let b_id = b.local_id().clone();

        let hv = eventually(&h, |v| v.player(&b_id).is_some()).await;
        assert_eq!(hv.player(&b_id).unwrap().username, "Bea");
        eventually(&b, |v| v.player(&host_id).is_some()).await;

        h.place(block("obj-1")).await.unwrap();
        let bv = eventually(&b, |v| v.object(&EntityId::new("obj-1")).is_some()).await;
        let count = bv.world_objects.iter().filter(|o| o.id.as_str() == "obj-1").count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_kill_fires_one_local_death() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "KILLA").await;
        let mut deaths = h.subscribe();
        let b = join(&transport, "KILLA", "Bea").await;

        let host_id = h.local_id().clone();
        let b_id = b.local_id().clone();
        eventually(&b, |v| v.player(&host_id).is_some()).await;

        b.report_kill(host_id.clone()).await.unwrap();

        let event = tokio::time::timeout(WAIT, deaths.recv()).await.unwrap().unwrap();
        assert_eq!(event, SessionEvent::LocalDeath { killer_id: b_id.clone() });

        let hv = h.snapshot().await.unwrap();
        assert_eq!(hv.player(&b_id).unwrap().kills, 1);
        assert_eq!(hv.local_player().unwrap().deaths, 1);
        assert_eq!(hv.local_player().unwrap().position, Vec3::SPAWN);

        // Exactly once
        let again = tokio::time::timeout(Duration::from_millis(300), deaths.recv()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_second_host_gets_session_unavailable() {
        let transport = MemoryTransport::new();
        let _h = host(&transport, "TAKEN").await;

        let err = start_session(&transport, SessionConfig::host(Some("taken".to_string()), PlayerProfile::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionUnavailable(code) if code == "TAKEN"));
    }

    #[tokio::test]
    async fn test_room_reusable_after_host_leaves() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "REUSE").await;
        h.leave().await;

        assert!(start_session(&transport, SessionConfig::host(Some("REUSE".to_string()), PlayerProfile::default()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_join_errors() {
        let transport = MemoryTransport::new();

        let err = start_session(&transport, SessionConfig::join("NOONE", PlayerProfile::default())).await.unwrap_err();
        assert!(matches!(err, SessionError::HostUnreachable(_)));

        let err = start_session(&transport, SessionConfig::join("AB", PlayerProfile::default())).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidRoomCode(_)));
    }

    #[tokio::test]
    async fn test_relay_reaches_third_peer_without_echo() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "RELAY").await;
        let b = join(&transport, "RELAY", "Bea").await;
        let c = join(&transport, "RELAY", "Cy").await;

        let b_id = b.local_id().clone();
        let c_id = c.local_id().clone();

        // C learns about B only through the host
        eventually(&c, |v| v.player(&b_id).is_some()).await;
        eventually(&b, |v| v.player(&c_id).is_some()).await;

        b.submit_chat("hello from b").await.unwrap();
        eventually(&c, |v| v.chat.iter().any(|m| m.text == "hello from b")).await;
        eventually(&h, |v| v.chat.iter().any(|m| m.text == "hello from b")).await;

        // Give any echo time to arrive
        tokio::time::sleep(Duration::from_millis(200)).await;
        let bv = b.snapshot().await.unwrap();
        assert_eq!(bv.chat.iter().filter(|m| m.text == "hello from b").count(), 1);
    }

    #[tokio::test]
    async fn test_remote_transform_follows_heartbeat() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "MOVES").await;
        let b = join(&transport, "MOVES", "Bea").await;
        let b_id = b.local_id().clone();

        b.move_to(Vec3::new(7.0, 1.0, -3.0), Vec3::from_yaw(1.5)).await.unwrap();
        b.set_emote("dance1").await.unwrap();

        let hv = eventually(&h, |v| {
            v.player(&b_id).is_some_and(|p| p.position == Vec3::new(7.0, 1.0, -3.0) && p.emote == "dance1")
        }).await;
        assert_eq!(hv.connections, 1);
    }

    #[tokio::test]
    async fn test_dummy_spawn_and_kill_propagate() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "DUMMY").await;
        let b = join(&transport, "DUMMY", "Bea").await;
        eventually(&h, |v| v.players.len() == 2).await;

        let dummy_id = b.spawn_dummy("Target", None).await.unwrap();
        assert!(dummy_id.as_str().starts_with("dummy-"));

        let hv = eventually(&h, |v| v.player(&dummy_id).is_some()).await;
        let dummy = hv.player(&dummy_id).unwrap();
        assert!(dummy.is_dummy);
        assert_eq!(dummy.spawned_by.as_ref(), Some(b.local_id()));

        h.report_kill(dummy_id.clone()).await.unwrap();
        eventually(&b, |v| v.player(&dummy_id).is_none()).await;
    }

    #[tokio::test]
    async fn test_late_joiner_gets_objects_and_dummies() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "LATER").await;
        h.place(block("obj-9")).await.unwrap();
        let dummy_id = h.spawn_dummy("Old Dummy", None).await.unwrap();

        let b = join(&transport, "LATER", "Bea").await;
        let bv = eventually(&b, |v| v.object(&EntityId::new("obj-9")).is_some() && v.player(&dummy_id).is_some()).await;
        assert!(bv.chat.iter().any(|m| m.text == "Dummy spawned: Old Dummy"));
    }

    #[tokio::test]
    async fn test_peer_notified_when_host_leaves() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "GONER").await;
        let b = join(&transport, "GONER", "Bea").await;
        let mut events = b.subscribe();
        eventually(&b, |v| v.connections == 1).await;

        h.leave().await;

        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event, SessionEvent::HostDisconnected);
        let bv = b.snapshot().await.unwrap();
        assert_eq!(bv.connections, 0);
    }

    #[tokio::test]
    async fn test_attack_flag_resets() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "SWING").await;

        h.set_held_item(ItemType::Sword).await.unwrap();
        h.attack().await.unwrap();
        assert!(h.snapshot().await.unwrap().local_status.is_attacking);

        eventually(&h, |v| !v.local_status.is_attacking).await;
    }

    #[tokio::test]
    async fn test_vehicle_pose_is_local_only() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "CARSS").await;
        let b = join(&transport, "CARSS", "Bea").await;

        let car = WorldObject { kind: WorldObjectType::Car, ..block("car-1") };
        h.place(car).await.unwrap();
        eventually(&b, |v| v.object(&EntityId::new("car-1")).is_some()).await;

        let moved = Pose { position: Vec3::new(30.0, 0.0, 5.0), rotation: Vec3::ZERO };
        h.drive_vehicle(Some(EntityId::new("car-1"))).await.unwrap();
        h.set_vehicle_pose(EntityId::new("car-1"), moved).await.unwrap();

        let hv = h.snapshot().await.unwrap();
        assert_eq!(hv.object(&EntityId::new("car-1")).unwrap().position, moved.position);

        let h_id = h.local_id().clone();
        let bv = eventually(&b, |v| {
            v.player(&h_id).is_some_and(|p| p.driving_vehicle_id == Some(EntityId::new("car-1")))
        }).await;
        assert_eq!(bv.object(&EntityId::new("car-1")).unwrap().position, Vec3::new(2.0, 0.5, 2.0));
    }

    #[tokio::test]
    async fn test_chat_commands_stay_local() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "CMDSS").await;
        let b = join(&transport, "CMDSS", "Bea").await;
        let b_id = b.local_id().clone();
        eventually(&h, |v| v.player(&b_id).is_some()).await;

        h.submit_chat("/announce maintenance").await.unwrap();
        h.submit_chat("/kick Bea").await.unwrap();

        let hv = h.snapshot().await.unwrap();
        assert!(hv.chat.iter().any(|m| m.text == "maintenance" && m.is_system));
        assert!(hv.chat.iter().any(|m| m.text == "Bea was kicked."));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let bv = b.snapshot().await.unwrap();
        assert!(!bv.chat.iter().any(|m| m.text == "maintenance"));
    }

    /// Dial the host directly and hand back the raw link.
    async fn raw_link(transport: &MemoryTransport, code: &str) -> (mpsc::Sender<String>, mpsc::Receiver<TransportEvent>) {
        let (tx, mut rx) = mpsc::channel(EVENT_CAPACITY);
        transport.dial(&RendezvousId::for_room(code), tx).await.unwrap();
        match rx.recv().await {
            Some(TransportEvent::Opened { outbound, .. }) => (outbound, rx),
            other => panic!("Expected Opened, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_joiner_gets_more_objects_than_channel_holds() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "BULKY").await;
        let total = crate::network::transport::OUTBOUND_CAPACITY + 36;
        for i in 0..total {
            h.place(block(&format!("obj-{}", i))).await.unwrap();
        }
        let dummy_id = h.spawn_dummy("Last", None).await.unwrap();
        eventually(&h, |v| v.world_objects.len() == total).await;

        let b = join(&transport, "BULKY", "Bea").await;
        let bv = eventually(&b, |v| v.world_objects.len() == total && v.player(&dummy_id).is_some()).await;
        assert_eq!(bv.world_objects[0].id.as_str(), "obj-0");
        assert_eq!(bv.world_objects[total - 1].id, EntityId::new(format!("obj-{}", total - 1)));
    }

    #[tokio::test]
    async fn test_malformed_frame_not_applied_or_relayed() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "JUNKY").await;
        let (b_out, _b_rx) = raw_link(&transport, "JUNKY").await;
        let (_c_out, mut c_rx) = raw_link(&transport, "JUNKY").await;
        eventually(&h, |v| v.connections == 2).await;

        let junk = [r#"{"type":"KILL"}"#, "not json at all", r#"{"type":"WARP","payload":{},"senderId":"b"}"#];
        for text in junk {
            b_out.send(text.to_string()).await.unwrap();
        }
        let line = ChatMessage::from_player("Raw", "after the junk");
        let chat = NetworkMessage::chat(line, EntityId::new("raw-b")).to_json().unwrap();
        b_out.send(chat.clone()).await.unwrap();

        // Frames arrive in order, so once the chat is seen the junk had its chance
        let mut received = Vec::new();
        let wait = async {
            while let Some(event) = c_rx.recv().await {
                if let TransportEvent::Frame { text, .. } = event {
                    let done = text == chat;
                    received.push(text);
                    if done {
                        break;
                    }
                }
            }
        };
        tokio::time::timeout(WAIT, wait).await.unwrap();
        assert!(!received.iter().any(|t| junk.contains(&t.as_str())));

        let hv = h.snapshot().await.unwrap();
        assert_eq!(hv.players.len(), 1);
        assert_eq!(hv.chat.iter().filter(|m| !m.is_system).count(), 1);
    }

    #[tokio::test]
    async fn test_closed_peer_dropped_but_entity_kept() {
        let transport = MemoryTransport::new();
        let h = host(&transport, "QUITS").await;
        let b = join(&transport, "QUITS", "Bea").await;
        let c = join(&transport, "QUITS", "Cy").await;
        let b_id = b.local_id().clone();

        eventually(&h, |v| v.connections == 2 && v.player(&b_id).is_some()).await;
        eventually(&c, |v| v.player(&b_id).is_some()).await;

        b.leave().await;

        let hv = eventually(&h, |v| v.connections == 1).await;
        assert!(hv.player(&b_id).is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let cv = c.snapshot().await.unwrap();
        assert!(cv.player(&b_id).is_some());
        assert_eq!(cv.connections, 1);
    }
}
