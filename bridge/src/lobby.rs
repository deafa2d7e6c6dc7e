//! Lobby replica and the dispatcher that routes incoming documents

use crate::holder::OrderedEntityHolder;
use crate::lifecycle::{Action, ActionSet, BridgeError};
use crate::reconciler::DiffReconciler;
use log::{debug, error, info, warn};
use shared::wml::{self, Node};
use shared::{Entity, Game, User};

/// Marker of the public notice sent before the server restarts
pub const SERVER_RESTART_NOTICE: &str = "The server has been restarted";

/// Scenario containers; their contents are game data, not lobby traffic
const SCENARIO_TAGS: [&str; 6] = ["era", "music", "time", "multiplayer", "event", "side"];

/// Users and games as currently listed by the server
#[derive(Debug, Default)]
pub struct LobbyState {
    pub users: OrderedEntityHolder<User>,
    pub games: OrderedEntityHolder<Game>,
}

impl LobbyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears both lists; users replay a "left" event each
    pub fn reset(&mut self) {
        self.users.reset();
        self.games.reset();
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get_by_key(&name.to_string()).ok()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.user(name).map_or(false, |u| u.registered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// Private message to the bridge
    Whisper,
    /// Public message in a lobby room
    Lobby,
    /// In-game chat
    Speak,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub kind: ChatKind,
    pub sender: String,
    pub message: String,
    pub room: String,
}

impl ChatMessage {
    pub fn is_private(&self) -> bool {
        self.kind == ChatKind::Whisper
    }
}

/// What one incoming document produced besides state changes
#[derive(Debug, Default)]
pub struct Dispatch {
    pub chat: Vec<ChatMessage>,
    pub actions: ActionSet,
}

#[derive(Debug, Default)]
pub struct LobbyDispatcher {
    reconciler: DiffReconciler,
}

impl LobbyDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_text(&self, state: &mut LobbyState, text: &str) -> Result<Dispatch, BridgeError> {
        let document = wml::parse(text)?;
        self.handle(state, &document)
    }

    pub fn handle(&self, state: &mut LobbyState, document: &Node) -> Result<Dispatch, BridgeError> {
        let mut out = Dispatch::default();
        self.walk(state, document, &mut out)?;
        Ok(out)
    }

    fn walk(&self, state: &mut LobbyState, node: &Node, out: &mut Dispatch) -> Result<(), BridgeError> {
        for child in node.children() {
            match child.name() {
                "gamelist_diff" => self.reconciler.apply(state, child)?,
                "gamelist" => {
                    for game in child.children_named(Game::TAG) {
                        add_snapshot_entry(&mut state.games, game);
                    }
                    debug!("Snapshot holds {} games", state.games.len());
                }
                "user" => add_snapshot_entry(&mut state.users, child),
                "whisper" => on_chat(child, ChatKind::Whisper, "sender", out),
                "message" => on_chat(child, ChatKind::Lobby, "sender", out),
                "speak" => on_chat(child, ChatKind::Speak, "id", out),
                "error" => warn!("Lobby error: {}", child.attr_or_empty("message")),
                "observer" | "observer_quit" => {
                    debug!("[{}] {}", child.name(), child.attr_or_empty("name"))
                }
                tag if SCENARIO_TAGS.contains(&tag) => debug!("Skipping [{}]", tag),
                _ => self.walk(state, child, out)?,
            }
        }
        Ok(())
    }
}

fn add_snapshot_entry<T: Entity + std::fmt::Display>(holder: &mut OrderedEntityHolder<T>, node: &Node) {
    match T::from_node(node) {
        Ok(entity) => {
            debug!("Snapshot entry {}", entity);
            holder.add_initial(entity);
        }
        Err(e) => warn!("Ignoring snapshot entry: {}", e),
    }
}

fn on_chat(node: &Node, kind: ChatKind, sender_key: &str, out: &mut Dispatch) {
    let sender = node.attr_or_empty(sender_key);
    let message = node.attr_or_empty("message");

    if sender == "server" {
        info!("Server says: {}", message);
        if kind != ChatKind::Whisper && message.contains(SERVER_RESTART_NOTICE) {
            out.actions.insert(Action::ReconnectLobby);
        }
        return;
    }
    if sender.is_empty() || message.is_empty() {
        error!("[{}] without sender or message", node.name());
        return;
    }

    debug!("{} {} > {}", node.name(), sender, message);
    out.chat.push(ChatMessage {
        kind,
        sender: sender.to_string(),
        message: message.to_string(),
        room: node.attr_or_empty("room").to_string(),
    });
}
