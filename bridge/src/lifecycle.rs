//! Failure classification and the actions the top-level loop executes
//!
//! Any layer reports trouble as a [`BridgeError`]; each error maps to a set
//! of [`Action`]s. The loop collects pending actions over one iteration and
//! turns them into a [`Plan`] once no connection is borrowed.

use crate::config::ConfigError;
use crate::holder::HolderError;
use crate::transport::TransportError;
use shared::entity::EntityError;
use shared::wml::WmlError;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Attempts at connect + login before the session gives up
pub const LOGIN_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    RetryLogin,
    Fatal,
    ReconnectChat,
    ReconnectLobby,
    DisableChat,
    DisableLobby,
    Quit,
    RestartProcess,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet(BTreeSet<Action>);

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(action: Action) -> Self {
        let mut set = Self::new();
        set.insert(action);
        set
    }

    pub fn with(mut self, action: Action) -> Self {
        self.insert(action);
        self
    }

    pub fn insert(&mut self, action: Action) {
        self.0.insert(action);
    }

    pub fn merge(&mut self, other: ActionSet) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, action: Action) -> bool {
        self.0.contains(&action)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        self.0.iter().copied()
    }

    /// Hands over the pending actions, leaving the set empty
    pub fn take(&mut self) -> ActionSet {
        std::mem::take(self)
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which of the two connections a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Lobby,
    Chat,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Lobby => write!(f, "lobby"),
            Link::Chat => write!(f, "chat"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Unrecoverable: protocol mismatch, redirect loop, login exhausted
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{link} connection lost: {reason}")]
    ConnectionLost { link: Link, reason: String },

    /// The local lobby replica no longer matches the server
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server refused this login; the next attempt starts from scratch
    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    pub fn connection_lost(link: Link, reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            link,
            reason: reason.into(),
        }
    }

    pub fn actions(&self) -> ActionSet {
        match self {
            BridgeError::Fatal(_) | BridgeError::Config(_) => {
                ActionSet::of(Action::Fatal).with(Action::Quit)
            }
            BridgeError::ConnectionLost {
                link: Link::Lobby, ..
            } => ActionSet::of(Action::ReconnectLobby),
            BridgeError::ConnectionLost {
                link: Link::Chat, ..
            } => ActionSet::of(Action::ReconnectChat),
            BridgeError::ProtocolViolation(_) => ActionSet::of(Action::ReconnectLobby),
            BridgeError::LoginFailed(_) => ActionSet::of(Action::RetryLogin),
        }
    }
}

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        BridgeError::connection_lost(Link::Lobby, err.to_string())
    }
}

impl From<WmlError> for BridgeError {
    fn from(err: WmlError) -> Self {
        BridgeError::ProtocolViolation(format!("unparsable lobby document: {}", err))
    }
}

impl From<HolderError> for BridgeError {
    fn from(err: HolderError) -> Self {
        BridgeError::ProtocolViolation(err.to_string())
    }
}

impl From<EntityError> for BridgeError {
    fn from(err: EntityError) -> Self {
        BridgeError::ProtocolViolation(format!("undecodable entity: {}", err))
    }
}

/// How the process should end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Quit,
    Fatal,
    Restart,
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Exit::Quit | Exit::Restart => 0,
            Exit::Fatal => 1,
        }
    }
}

/// What the loop does with a batch of pending actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub exit: Option<Exit>,
    pub teardown_lobby: bool,
    pub teardown_chat: bool,
    pub lobby_enabled: bool,
    pub chat_enabled: bool,
}

/// Turns pending actions into teardown and exit decisions.
///
/// Disabling wins over reconnecting for the same link, restart wins over
/// quit, and a bridge with both links disabled quits.
pub fn plan(actions: &ActionSet, lobby_enabled: bool, chat_enabled: bool) -> Plan {
    let mut plan = Plan {
        exit: None,
        teardown_lobby: false,
        teardown_chat: false,
        lobby_enabled,
        chat_enabled,
    };

    if actions.contains(Action::ReconnectLobby) || actions.contains(Action::RetryLogin) {
        plan.teardown_lobby = true;
        plan.lobby_enabled = true;
    }
    if actions.contains(Action::ReconnectChat) {
        plan.teardown_chat = true;
        plan.chat_enabled = true;
    }
    if actions.contains(Action::DisableLobby) {
        plan.teardown_lobby = true;
        plan.lobby_enabled = false;
    }
    if actions.contains(Action::DisableChat) {
        plan.teardown_chat = true;
        plan.chat_enabled = false;
    }

    if actions.contains(Action::RestartProcess) {
        plan.exit = Some(Exit::Restart);
    } else if actions.contains(Action::Fatal) {
        plan.exit = Some(Exit::Fatal);
    } else if actions.contains(Action::Quit) || (!plan.lobby_enabled && !plan.chat_enabled) {
        plan.exit = Some(Exit::Quit);
    }

    if plan.exit.is_some() {
        plan.teardown_lobby = true;
        plan.teardown_chat = true;
    }
    plan
}
