//! Chat Commands
//!
//! Slash commands typed into chat. They act on the local store only and are
//! never sent on the wire. Anything not recognized (or not permitted for the
//! local role) goes out as an ordinary chat line.
//!
//! - `/e <dance1|dance2|dance3>`: play an emote (anyone)
//! - `/announce <text>`: local announcement line (ADMIN/OWNER)
//! - `/kick <name>`: drop a player from the local store (ADMIN/OWNER)

use crate::game::state::{ChatMessage, EntityStore, Role};

/// Emotes `/e` accepts.
pub const EMOTES: [&str; 3] = ["dance1", "dance2", "dance3"];

/// Sender label on announcement lines.
pub const ANNOUNCEMENT_SENDER: &str = "[ANNOUNCEMENT]";

/// A recognized command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    /// Start an emote.
    Emote(String),
    /// Post an announcement.
    Announce(String),
    /// Remove a player by display name.
    Kick(String),
}

/// How a line of chat input should be handled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatInput {
    /// Run locally.
    Command(ChatCommand),
    /// Send as chat.
    Say(String),
}

/// Classify a line typed by a participant with `role`.
pub fn parse_chat_input(text: &str, role: Role) -> ChatInput {
    let mut args = text.split_whitespace();
    let cmd = args.next().unwrap_or_default().to_lowercase();

    match cmd.as_str() {
        "/e" => {
            if let Some(emote) = args.next().filter(|e| EMOTES.contains(e)) {
                return ChatInput::Command(ChatCommand::Emote(emote.to_string()));
            }
        }
        "/announce" if role.can_moderate() => {
            let rest: Vec<_> = args.collect();
            return ChatInput::Command(ChatCommand::Announce(rest.join(" ")));
        }
        "/kick" if role.can_moderate() => {
            if let Some(name) = args.next() {
                return ChatInput::Command(ChatCommand::Kick(name.to_string()));
            }
        }
        _ => {}
    }

    ChatInput::Say(text.to_string())
}

/// Run a command against the local store.
pub fn execute(store: &mut EntityStore, command: ChatCommand) {
    match command {
        ChatCommand::Emote(emote) => store.set_emote(emote),
        ChatCommand::Announce(text) => {
            store.add_chat_message(ChatMessage::system_as(ANNOUNCEMENT_SENDER, text));
        }
        ChatCommand::Kick(name) => {
            let target = store.find_by_username(&name)
                .filter(|p| !store.is_local(&p.id))
                .map(|p| p.id.clone());

            let line = match target {
                Some(id) => {
                    store.remove_player(&id);
                    format!("{} was kicked.", name)
                }
                None => format!("Player {} not found.", name),
            };
            store.add_chat_message(ChatMessage::system(line));
        }
    }
}
