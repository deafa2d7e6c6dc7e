//! Applies `[gamelist_diff]` documents to the lobby replica
//!
//! Each diff level is handled per entity kind in two phases. First every
//! delete is resolved to a key without touching the holder, so that an
//! insert of a key that is about to be deleted can be recognised as a move.
//! Then inserts and deletes are applied in message order, with the events
//! of both halves of a move suppressed.
//!
//! Delete indices count positions after this level's inserts: the server
//! puts an updated entry one slot ahead and deletes the stale copy behind
//! it. The read-only pass therefore works on a key projection of the list
//! with the inserts already applied.

use crate::holder::OrderedEntityHolder;
use crate::lifecycle::BridgeError;
use crate::lobby::LobbyState;
use log::{debug, error};
use shared::wml::Node;
use shared::Entity;
use std::collections::{HashSet, VecDeque};

/// Deepest `[change_child]` nesting accepted in one diff
pub const MAX_CHANGE_DEPTH: usize = 8;

/// Operations of one diff level, split by entity kind
#[derive(Default)]
struct Level<'a> {
    user_inserts: Vec<(usize, &'a Node)>,
    user_deletes: Vec<usize>,
    game_inserts: Vec<(usize, &'a Node)>,
    game_deletes: Vec<usize>,
    changes: Vec<&'a Node>,
}

#[derive(Debug, Clone, Copy)]
pub struct DiffReconciler {
    max_depth: usize,
}

impl Default for DiffReconciler {
    fn default() -> Self {
        Self {
            max_depth: MAX_CHANGE_DEPTH,
        }
    }
}

impl DiffReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one `[gamelist_diff]` tag.
    ///
    /// Nested `[change_child]` levels are processed breadth first after
    /// their parent level.
    pub fn apply(&self, state: &mut LobbyState, diff: &Node) -> Result<(), BridgeError> {
        let mut queue = VecDeque::from([(diff, 0usize)]);

        while let Some((node, depth)) = queue.pop_front() {
            let level = split_level(node)?;
            reconcile(&mut state.users, &level.user_inserts, &level.user_deletes)?;
            reconcile(&mut state.games, &level.game_inserts, &level.game_deletes)?;

            for change in level.changes {
                if depth + 1 > self.max_depth {
                    return Err(violation(format!(
                        "[change_child] nested deeper than {}",
                        self.max_depth
                    )));
                }
                let mut lists = change.children_named("gamelist");
                match (lists.next(), lists.next()) {
                    (Some(nested), None) => queue.push_back((nested, depth + 1)),
                    _ => {
                        return Err(violation(format!(
                            "[change_child] must hold exactly one [gamelist], got {}",
                            change.children_named("gamelist").count()
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

fn split_level(node: &Node) -> Result<Level<'_>, BridgeError> {
    let mut level = Level::default();

    for child in node.children() {
        match child.name() {
            "insert_child" => {
                let index = index_of(child)?;
                for entity in child.children() {
                    match entity.name() {
                        "user" => level.user_inserts.push((index, entity)),
                        "game" => level.game_inserts.push((index, entity)),
                        other => debug!("Skipping [{}] inside [insert_child]", other),
                    }
                }
            }
            "delete_child" => {
                let index = index_of(child)?;
                let users = child.children_named("user").count();
                let games = child.children_named("game").count();
                match (users, games) {
                    (1, _) => level.user_deletes.push(index),
                    (_, 1) => level.game_deletes.push(index),
                    _ => {
                        return Err(violation(format!(
                            "[delete_child] with {} users and {} games",
                            users, games
                        )))
                    }
                }
            }
            "change_child" => {
                let index = index_of(child)?;
                if index != 0 {
                    return Err(violation(format!(
                        "[change_child] index={}, 0 expected",
                        index
                    )));
                }
                level.changes.push(child);
            }
            other => debug!("Skipping [{}] inside [{}]", other, node.name()),
        }
    }
    Ok(level)
}

fn reconcile<T: Entity>(
    holder: &mut OrderedEntityHolder<T>,
    inserts: &[(usize, &Node)],
    deletes: &[usize],
) -> Result<(), BridgeError> {
    if inserts.is_empty() && deletes.is_empty() {
        return Ok(());
    }

    let entities = inserts
        .iter()
        .map(|&(index, node)| Ok((index, T::from_node(node)?)))
        .collect::<Result<Vec<_>, BridgeError>>()?;

    // read-only pass: which keys do this level's deletes remove?
    let mut projection = holder.keys();
    for (index, entity) in &entities {
        if *index > projection.len() {
            return Err(violation(format!(
                "insert of {} at {} past the end of {} entries",
                T::TAG,
                index,
                projection.len()
            )));
        }
        projection.insert(*index, entity.key());
    }
    let mut removing = HashSet::new();
    for &index in deletes {
        if index >= projection.len() {
            return Err(violation(format!(
                "delete of {} at {} past the end of {} entries",
                T::TAG,
                index,
                projection.len()
            )));
        }
        removing.insert(projection.remove(index));
    }

    let mut adding = HashSet::new();
    for (index, entity) in entities {
        let key = entity.key();
        let moved = T::TRACKS_MOVES && removing.contains(&key);
        if moved {
            debug!("{} {} moved to {}", T::TAG, key, index);
            adding.insert(key);
        }
        holder.insert_at(index, entity, moved)?;
    }

    for &index in deletes {
        let key = holder.get_by_index(index)?.key();
        let moved = T::TRACKS_MOVES && adding.contains(&key);
        holder.delete_at(index, moved)?;
    }
    Ok(())
}

fn index_of(node: &Node) -> Result<usize, BridgeError> {
    let raw = node.attr_or_empty("index");
    raw.parse()
        .map_err(|_| violation(format!("[{}] has bad index `{}`", node.name(), raw)))
}

fn violation(message: String) -> BridgeError {
    error!("Lobby diff rejected: {}", message);
    BridgeError::ProtocolViolation(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::Membership;
    use shared::wml;
    use shared::{Game, User};

    fn apply(state: &mut LobbyState, text: &str) -> Result<(), BridgeError> {
        let doc = wml::parse(text).unwrap();
        let diff = doc.child("gamelist_diff").unwrap();
        DiffReconciler::new().apply(state, diff)
    }

    fn state_with_users(names: &[&str]) -> LobbyState {
        let mut state = LobbyState::new();
        for name in names {
            state.users.add_initial(User::from_node(&Node::new("user").with_attr("name", *name)).unwrap());
        }
        state.users.take_events();
        state
    }

    fn user_names(state: &LobbyState) -> Vec<String> {
        state.users.keys()
    }

    #[test]
    fn test_insert_then_delete_slides_into_place() {
        let mut state = state_with_users(&["A", "B", "C"]);
        apply(
            &mut state,
            r#"[gamelist_diff]
[insert_child]
index="1"
[user]
name="D"
[/user]
[/insert_child]
[delete_child]
index="3"
[user]
[/user]
[/delete_child]
[/gamelist_diff]"#,
        )
        .unwrap();

        assert_eq!(user_names(&state), vec!["A", "D", "B"]);
        let events = state.users.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Membership::Appeared(u) if u.name == "D"));
        assert!(matches!(&events[1], Membership::Left(u) if u.name == "C"));
    }

    #[test]
    fn test_move_is_silent() {
        let mut state = state_with_users(&["A"]);
        apply(
            &mut state,
            r#"[gamelist_diff]
[delete_child]
index="0"
[user]
[/user]
[/delete_child]
[insert_child]
index="0"
[user]
name="A"
status="playing"
[/user]
[/insert_child]
[/gamelist_diff]"#,
        )
        .unwrap();

        assert_eq!(user_names(&state), vec!["A"]);
        assert!(state.users.take_events().is_empty());
    }

    #[test]
    fn test_update_lands_ahead_of_stale_copy() {
        let mut state = state_with_users(&["A", "B"]);
        apply(
            &mut state,
            r#"[gamelist_diff]
[insert_child]
index="1"
[user]
name="A"
status="playing"
[/user]
[/insert_child]
[delete_child]
index="0"
[user]
[/user]
[/delete_child]
[/gamelist_diff]"#,
        )
        .unwrap();

        assert_eq!(user_names(&state), vec!["A", "B"]);
        assert_eq!(state.users.get_by_key(&"A".to_string()).unwrap().status, "playing");
        assert!(state.users.take_events().is_empty());
    }

    #[test]
    fn test_nested_game_changes() {
        let mut state = LobbyState::new();
        apply(
            &mut state,
            r#"[gamelist_diff]
[change_child]
index="0"
[gamelist]
[insert_child]
index="0"
[game]
id="5"
name="first"
[/game]
[/insert_child]
[insert_child]
index="1"
[game]
id="6"
name="second"
[/game]
[/insert_child]
[/gamelist]
[/change_child]
[/gamelist_diff]"#,
        )
        .unwrap();
        assert_eq!(state.games.keys(), vec![5, 6]);

        apply(
            &mut state,
            r#"[gamelist_diff]
[change_child]
index="0"
[gamelist]
[delete_child]
index="0"
[game]
[/game]
[/delete_child]
[/gamelist]
[/change_child]
[/gamelist_diff]"#,
        )
        .unwrap();
        assert_eq!(state.games.keys(), vec![6]);
    }

    #[test]
    fn test_games_do_not_track_moves() {
        let mut state = LobbyState::new();
        state
            .games
            .add_initial(Game::from_node(&Node::new("game").with_attr("id", "1")).unwrap());
        state.games.take_events();

        apply(
            &mut state,
            r#"[gamelist_diff]
[change_child]
index="0"
[gamelist]
[insert_child]
index="1"
[game]
id="1"
name="renamed"
[/game]
[/insert_child]
[delete_child]
index="0"
[game]
[/game]
[/delete_child]
[/gamelist]
[/change_child]
[/gamelist_diff]"#,
        )
        .unwrap();

        assert_eq!(state.games.get_by_key(&1).unwrap().name, "renamed");
        assert_eq!(state.games.take_events().len(), 2);
    }

    #[test]
    fn test_nonzero_change_index_is_violation() {
        let mut state = LobbyState::new();
        let result = apply(
            &mut state,
            "[gamelist_diff]\n[change_child]\nindex=\"1\"\n[gamelist]\n[/gamelist]\n[/change_child]\n[/gamelist_diff]",
        );
        assert!(matches!(result, Err(BridgeError::ProtocolViolation(_))));
    }

    #[test]
    fn test_change_without_single_gamelist_is_violation() {
        let mut state = LobbyState::new();
        let result = apply(
            &mut state,
            "[gamelist_diff]\n[change_child]\nindex=\"0\"\n[/change_child]\n[/gamelist_diff]",
        );
        assert!(matches!(result, Err(BridgeError::ProtocolViolation(_))));
    }

    #[test]
    fn test_malformed_delete_is_violation() {
        let mut state = state_with_users(&["A"]);
        let result = apply(
            &mut state,
            "[gamelist_diff]\n[delete_child]\nindex=\"0\"\n[/delete_child]\n[/gamelist_diff]",
        );
        assert!(matches!(result, Err(BridgeError::ProtocolViolation(_))));
    }

    #[test]
    fn test_out_of_bounds_delete_is_violation() {
        let mut state = state_with_users(&["A"]);
        let result = apply(
            &mut state,
            "[gamelist_diff]\n[delete_child]\nindex=\"4\"\n[user]\n[/user]\n[/delete_child]\n[/gamelist_diff]",
        );
        assert!(matches!(result, Err(BridgeError::ProtocolViolation(_))));
        assert_eq!(user_names(&state), vec!["A"]);
    }

    #[test]
    fn test_nameless_user_is_violation() {
        let mut state = LobbyState::new();
        let result = apply(
            &mut state,
            "[gamelist_diff]\n[insert_child]\nindex=\"0\"\n[user]\nstatus=\"lobby\"\n[/user]\n[/insert_child]\n[/gamelist_diff]",
        );
        assert!(matches!(result, Err(BridgeError::ProtocolViolation(_))));
    }

    #[test]
    fn test_unknown_tags_are_skipped() {
        let mut state = state_with_users(&["A"]);
        apply(
            &mut state,
            "[gamelist_diff]\n[ping]\n[/ping]\n[insert_child]\nindex=\"1\"\n[user]\nname=\"B\"\n[/user]\n[/insert_child]\n[/gamelist_diff]",
        )
        .unwrap();
        assert_eq!(user_names(&state), vec!["A", "B"]);
    }

    #[test]
    fn test_depth_cap() {
        let mut inner = Node::new("gamelist");
        for _ in 0..=MAX_CHANGE_DEPTH {
            inner = Node::new("gamelist").with_child(
                Node::new("change_child")
                    .with_attr("index", "0")
                    .with_child(inner),
            );
        }
        let diff = Node::new("gamelist_diff").with_child(inner.children()[0].clone());

        let result = DiffReconciler::new().apply(&mut LobbyState::new(), &diff);
        assert!(matches!(result, Err(BridgeError::ProtocolViolation(_))));
    }
}
