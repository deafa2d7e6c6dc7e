//! Outgoing lobby requests and the markers used to read login replies

use crate::wml::Node;

/// Exact reply (after trimming) that confirms the lobby was joined
pub const JOIN_LOBBY: &str = "[join_lobby]\n[/join_lobby]";

/// The password hash was checked and did not match
pub const BAD_PASSWORD_MARKER: &str = "incorrect.\"\npassword_request=\"yes\"";

/// The server wants a (valid) password for this name
pub const PASSWORD_REQUEST_MARKER: &str = "password_request=\"yes\"";

/// Somebody else is online under this name
pub const NAME_TAKEN_MARKER: &str = "is already taken.";

/// Classification of a reply to a `[login]` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReply {
    Joined,
    BadPassword,
    PasswordRequested,
    NameTaken,
    Unrecognized,
}

pub fn classify_login_reply(reply: &str) -> LoginReply {
    if reply.trim() == JOIN_LOBBY {
        LoginReply::Joined
    } else if reply.contains(BAD_PASSWORD_MARKER) {
        LoginReply::BadPassword
    } else if reply.contains(PASSWORD_REQUEST_MARKER) {
        LoginReply::PasswordRequested
    } else if reply.contains(NAME_TAKEN_MARKER) {
        LoginReply::NameTaken
    } else {
        LoginReply::Unrecognized
    }
}

/// Finds the `salt=` line of a login reply and strips its quotes
pub fn find_salt(reply: &str) -> Option<String> {
    reply
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .find(|(key, _)| *key == "salt")
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|salt| !salt.is_empty())
}

pub fn version(version: &str) -> Node {
    Node::new("version").with_attr("version", version)
}

/// First login attempt carries an empty password; the hashed retry sets
/// `force_confirmation`
pub fn login(username: &str, password: &str, force_confirmation: bool) -> Node {
    let mut login = Node::new("login");
    if force_confirmation {
        login.set_attr("force_confirmation", "yes");
    }
    login.set_attr("password", password);
    login.set_attr("username", username);
    login
}

pub fn whisper(sender: &str, receiver: &str, message: &str) -> Node {
    Node::new("whisper")
        .with_attr("message", message)
        .with_attr("receiver", receiver)
        .with_attr("sender", sender)
}

/// A public lobby message; the empty room is the main lobby
pub fn lobby_message(message: &str, room: &str) -> Node {
    Node::new("message")
        .with_attr("message", message)
        .with_attr("room", room)
}

pub fn observe_game(game_id: &str) -> Node {
    Node::new("join")
        .with_attr("id", game_id)
        .with_attr("observe", "yes")
}

pub fn leave_game() -> Node {
    Node::new("leave_game")
}

pub fn change_controller(side: &str, player: &str) -> Node {
    Node::new("change_controller")
        .with_attr("controller", "human")
        .with_attr("player", player)
        .with_attr("side", side)
}

/// Wraps request tags into one document ready for framing
pub fn document(tags: impl IntoIterator<Item = Node>) -> String {
    tags.into_iter()
        .fold(Node::root(), |root, tag| root.with_child(tag))
        .to_string()
}
