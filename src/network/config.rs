//! Runtime Configuration
//!
//! Defaults, overridable from `OBBY_*` environment variables. The binary
//! layers its command-line arguments on top.

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::state::{GameMode, Role};

/// Default heartbeat rate (Hz).
pub const DEFAULT_TICK_RATE: u32 = 20;

/// First port of the rendezvous port range.
pub const DEFAULT_BASE_PORT: u16 = 41000;

/// Width of the rendezvous port range.
pub const DEFAULT_PORT_SPAN: u16 = 1000;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable did not parse.
    #[error("Invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| ConfigError::Invalid { key, value }),
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Where the WebSocket transport listens and dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Interface a host binds.
    pub bind_ip: IpAddr,
    /// Address a joining peer dials.
    pub host_ip: IpAddr,
    /// First port of the rendezvous range.
    pub base_port: u16,
    /// Width of the rendezvous range.
    pub port_span: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            host_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: DEFAULT_BASE_PORT,
            port_span: DEFAULT_PORT_SPAN,
        }
    }
}

impl TransportConfig {
    /// Defaults with `OBBY_BIND_IP`, `OBBY_HOST_IP`, `OBBY_BASE_PORT` and
    /// `OBBY_PORT_SPAN` applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ip) = parse_var::<IpAddr>(&lookup, "OBBY_BIND_IP")? {
            config.bind_ip = ip;
        }
        if let Some(ip) = parse_var::<IpAddr>(&lookup, "OBBY_HOST_IP")? {
            config.host_ip = ip;
        }
        if let Some(port) = parse_var::<u16>(&lookup, "OBBY_BASE_PORT")? {
            config.base_port = port;
        }
        if let Some(span) = parse_var::<u16>(&lookup, "OBBY_PORT_SPAN")? {
            config.port_span = span;
        }
        Ok(config)
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Who the local participant is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    /// Display name.
    pub username: String,
    /// Privilege role.
    pub role: Role,
    /// Color tag. A random palette color when unset.
    pub color: Option<String>,
    /// Starting game mode.
    pub game_mode: GameMode,
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self {
            username: "Player".to_string(),
            role: Role::Guest,
            color: None,
            game_mode: GameMode::Obby,
        }
    }
}

/// Session start parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Host a room (true) or join one (false).
    pub is_host: bool,
    /// Room code. A host without one generates a fresh code.
    pub room_code: Option<String>,
    /// Heartbeat rate (Hz).
    pub tick_rate: u32,
    /// Local participant.
    pub profile: PlayerProfile,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            is_host: true,
            room_code: None,
            tick_rate: DEFAULT_TICK_RATE,
            profile: PlayerProfile::default(),
        }
    }
}

impl SessionConfig {
    /// Host a room.
    pub fn host(room_code: Option<String>, profile: PlayerProfile) -> Self {
        Self {
            is_host: true,
            room_code,
            profile,
            ..Self::default()
        }
    }

    /// Join an existing room.
    pub fn join(room_code: impl Into<String>, profile: PlayerProfile) -> Self {
        Self {
            is_host: false,
            room_code: Some(room_code.into()),
            profile,
            ..Self::default()
        }
    }

    /// Apply `OBBY_TICK_RATE`.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `with_env` with a custom variable source.
    pub fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(rate) = parse_var::<u32>(&lookup, "OBBY_TICK_RATE")? {
            if rate == 0 {
                return Err(ConfigError::Invalid { key: "OBBY_TICK_RATE", value: rate.to_string() });
            }
            self.tick_rate = rate;
        }
        Ok(self)
    }

    /// Heartbeat period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate.max(1)))
    }
}
