//! Builders for the documents a lobby pushes to its clients

use shared::wml::Node;

pub fn user(name: &str) -> Node {
    Node::new("user")
        .with_attr("available", "yes")
        .with_attr("game_id", "0")
        .with_attr("location", "")
        .with_attr("name", name)
        .with_attr("registered", "no")
        .with_attr("status", "lobby")
}

pub fn registered_user(name: &str) -> Node {
    user(name).with_attr("registered", "yes")
}

pub fn game(id: u64, name: &str) -> Node {
    Node::new("game")
        .with_attr("id", id.to_string())
        .with_attr("mp_era", "era_default")
        .with_attr("mp_scenario", "multiplayer_2p_Caves_of_the_Bats")
        .with_attr("mp_use_map_settings", "yes")
        .with_attr("name", name)
        .with_attr("observer", "yes")
}

/// The full lobby state sent right after a client joins
pub fn snapshot(users: impl IntoIterator<Item = Node>, games: impl IntoIterator<Item = Node>) -> Node {
    let gamelist = games
        .into_iter()
        .fold(Node::new("gamelist"), |list, game| list.with_child(game));
    users
        .into_iter()
        .fold(Node::root().with_child(gamelist), |root, user| root.with_child(user))
}

/// Accumulates one `[gamelist_diff]`.
///
/// User operations go on the top level, game operations inside the single
/// `[change_child]` block, in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct DiffBuilder {
    users: Vec<Node>,
    games: Vec<Node>,
}

impl DiffBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(mut self, index: usize, user: Node) -> Self {
        self.users.push(insert_child(index, user));
        self
    }

    pub fn delete_user(mut self, index: usize) -> Self {
        self.users.push(delete_child(index, "user"));
        self
    }

    pub fn insert_game(mut self, index: usize, game: Node) -> Self {
        self.games.push(insert_child(index, game));
        self
    }

    pub fn delete_game(mut self, index: usize) -> Self {
        self.games.push(delete_child(index, "game"));
        self
    }

    pub fn build(self) -> Node {
        let mut diff = Node::new("gamelist_diff");
        for op in self.users {
            diff.push_child(op);
        }
        if !self.games.is_empty() {
            let gamelist = self
                .games
                .into_iter()
                .fold(Node::new("gamelist"), |list, op| list.with_child(op));
            diff.push_child(
                Node::new("change_child")
                    .with_attr("index", "0")
                    .with_child(gamelist),
            );
        }
        Node::root().with_child(diff)
    }
}

fn insert_child(index: usize, entity: Node) -> Node {
    Node::new("insert_child")
        .with_attr("index", index.to_string())
        .with_child(entity)
}

fn delete_child(index: usize, tag: &str) -> Node {
    Node::new("delete_child")
        .with_attr("index", index.to_string())
        .with_child(Node::new(tag))
}

/// A whisper as the server forwards it to its receiver
pub fn whisper(sender: &str, receiver: &str, message: &str) -> Node {
    Node::root().with_child(
        Node::new("whisper")
            .with_attr("message", message)
            .with_attr("receiver", receiver)
            .with_attr("sender", sender),
    )
}

/// A public message in the main lobby room
pub fn lobby_message(sender: &str, message: &str) -> Node {
    Node::root().with_child(
        Node::new("message")
            .with_attr("message", message)
            .with_attr("room", "lobby")
            .with_attr("sender", sender),
    )
}
