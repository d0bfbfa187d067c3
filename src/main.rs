//! Obby Sync Node
//!
//! Runs one headless participant over WebSocket: hosts or joins a room,
//! sends stdin lines as chat, and prints what arrives.

use std::time::Duration;
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use obby_sync::{
    SessionEvent, VERSION, TICK_RATE,
    game::state::{GameMode, Role},
    network::{
        config::{PlayerProfile, SessionConfig, TransportConfig},
        session::{start_session, SessionHandle},
        websocket::WsTransport,
    },
};

#[derive(Parser, Debug)]
#[command(name = "obby-sync")]
#[command(about = "Obby multiplayer sync node", version)]
struct Args {
    #[command(subcommand)]
    session: SessionArg,

    /// Display name
    #[arg(short, long, default_value = "Player")]
    name: String,

    /// Privilege role
    #[arg(long, value_enum, default_value_t = RoleArg::Guest)]
    role: RoleArg,

    /// Game mode
    #[arg(long, value_enum, default_value_t = ModeArg::Obby)]
    mode: ModeArg,
}

#[derive(Subcommand, Debug)]
enum SessionArg {
    /// Host a room
    Host {
        /// Room code to claim (random if omitted)
        #[arg(long)]
        code: Option<String>,
    },
    /// Join a room
    Join {
        /// Room code shared by the host
        #[arg(long)]
        code: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    Guest,
    Admin,
    Owner,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Guest => Role::Guest,
            RoleArg::Admin => Role::Admin,
            RoleArg::Owner => Role::Owner,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Obby,
    Rivals,
    Racing,
    Backrooms,
}

impl From<ModeArg> for GameMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Obby => GameMode::Obby,
            ModeArg::Rivals => GameMode::Rivals,
            ModeArg::Racing => GameMode::Racing,
            ModeArg::Backrooms => GameMode::Backrooms,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let args = Args::parse();
    info!("Obby Sync v{}", VERSION);

    let profile = PlayerProfile {
        username: args.name,
        role: args.role.into(),
        color: None,
        game_mode: args.mode.into(),
    };
    let config = match args.session {
        SessionArg::Host { code } => SessionConfig::host(code, profile),
        SessionArg::Join { code } => SessionConfig::join(code, profile),
    }
    .with_env()?;
    info!("Tick Rate: {} Hz (default {})", config.tick_rate, TICK_RATE);

    let transport = WsTransport::new(TransportConfig::from_env()?);
    let handle = start_session(&transport, config).await.context("Could not start session")?;
    info!("Room code: {} (share it to let others join)", handle.room_code());

    run(&handle).await?;

    handle.leave().await;
    info!("Bye");
    Ok(())
}

/// Pump stdin into chat and print chat lines until ctrl-c or host loss.
async fn run(handle: &SessionHandle) -> anyhow::Result<()> {
    let mut events = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut refresh = interval(Duration::from_millis(250));
    let mut last_seen: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                return Ok(());
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(text) => handle.submit_chat(text).await?,
                None => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(SessionEvent::LocalDeath { killer_id }) => warn!("You were killed by {}", killer_id),
                Ok(SessionEvent::HostDisconnected) => {
                    warn!("Host left, session over");
                    return Ok(());
                }
                Err(RecvError::Lagged(n)) => warn!("Missed {} session event(s)", n),
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = refresh.tick() => {
                let view = handle.snapshot().await?;
                let start = last_seen.as_ref()
                    .and_then(|id| view.chat.iter().position(|m| m.id == *id))
                    .map_or(0, |i| i + 1);
                for line in &view.chat[start..] {
                    println!("[{}] {}", line.sender, line.text);
                }
                if let Some(last) = view.chat.last() {
                    last_seen = Some(last.id.clone());
                }
            }
        }
    }
}
