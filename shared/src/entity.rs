//! Users and games as listed by the lobby

use crate::wml::Node;
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityError {
    #[error("expected a [{expected}] tag, got [{found}]")]
    WrongTag {
        expected: &'static str,
        found: String,
    },

    #[error("[{tag}] is missing its `{attribute}` attribute")]
    MissingKey {
        tag: &'static str,
        attribute: &'static str,
    },

    #[error("[game] id `{0}` is not numeric")]
    BadGameId(String),
}

/// A lobby list entry decoded from one tag node.
///
/// Entities are keyed by a stable identifier, but the lobby addresses them
/// by list position, so the key and the position are tracked separately.
pub trait Entity: Clone + fmt::Debug {
    type Key: Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display;

    /// Tag name of this entity inside snapshots and diffs
    const TAG: &'static str;

    /// Whether a delete+insert of the same key in one diff is an attribute
    /// update rather than a departure and an arrival
    const TRACKS_MOVES: bool;

    /// Whether clearing the list replays a "left" event per entry
    const REPLAY_ON_RESET: bool;

    fn from_node(node: &Node) -> Result<Self, EntityError>;

    fn key(&self) -> Self::Key;
}

fn expect_tag(node: &Node, expected: &'static str) -> Result<(), EntityError> {
    if node.name() == expected {
        Ok(())
    } else {
        Err(EntityError::WrongTag {
            expected,
            found: node.name().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub registered: bool,
    pub game_id: String,
    pub status: String,
    pub available: String,
    pub location: String,
}

impl User {
    /// The game this user is currently in, if any
    pub fn current_game(&self) -> Option<&str> {
        match self.game_id.as_str() {
            "" | "0" => None,
            id => Some(id),
        }
    }
}

impl Entity for User {
    type Key = String;

    const TAG: &'static str = "user";
    const TRACKS_MOVES: bool = true;
    const REPLAY_ON_RESET: bool = true;

    fn from_node(node: &Node) -> Result<Self, EntityError> {
        expect_tag(node, Self::TAG)?;
        let name = node.attr_or_empty("name");
        if name.is_empty() {
            return Err(EntityError::MissingKey {
                tag: Self::TAG,
                attribute: "name",
            });
        }

        Ok(Self {
            name: name.to_string(),
            registered: node.attr("registered") == Some("yes"),
            game_id: node.attr_or_empty("game_id").to_string(),
            status: node.attr_or_empty("status").to_string(),
            available: node.attr_or_empty("available").to_string(),
            location: node.attr_or_empty("location").to_string(),
        })
    }

    fn key(&self) -> String {
        self.name.clone()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User({})", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub id: u64,
    pub name: String,
    pub mp_scenario: String,
    pub mp_era: String,
    pub mp_use_map_settings: String,
    pub observer: bool,
}

impl Entity for Game {
    type Key = u64;

    const TAG: &'static str = "game";
    const TRACKS_MOVES: bool = false;
    const REPLAY_ON_RESET: bool = false;

    fn from_node(node: &Node) -> Result<Self, EntityError> {
        expect_tag(node, Self::TAG)?;
        let raw_id = node.attr_or_empty("id");
        if raw_id.is_empty() {
            return Err(EntityError::MissingKey {
                tag: Self::TAG,
                attribute: "id",
            });
        }
        let id = raw_id
            .parse()
            .map_err(|_| EntityError::BadGameId(raw_id.to_string()))?;

        Ok(Self {
            id,
            name: node.attr_or_empty("name").to_string(),
            mp_scenario: node.attr_or_empty("mp_scenario").to_string(),
            mp_era: node.attr_or_empty("mp_era").to_string(),
            mp_use_map_settings: node.attr_or_empty("mp_use_map_settings").to_string(),
            observer: node.attr("observer") == Some("yes"),
        })
    }

    fn key(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Game({}={})", self.id, self.name)
    }
}
