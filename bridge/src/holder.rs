//! Position-addressed replica of one lobby list
//!
//! The server names list entries by position, the rest of the bridge by
//! key. [`OrderedEntityHolder`] keeps both views in step: `entries[i]` is
//! the list as the server sees it and `positions` maps every key to a
//! position holding an entity with that key.
//!
//! A move arrives as an insert of the new copy followed by a delete of the
//! old one, so a key may briefly sit at two positions. The key index then
//! points at one of them and is repaired when either copy is deleted.

use log::debug;
use shared::Entity;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HolderError {
    #[error("no {tag} at index {index}, list has {len}")]
    IndexOutOfBounds {
        tag: &'static str,
        index: usize,
        len: usize,
    },

    #[error("no {tag} with key {key}")]
    NotFound { tag: &'static str, key: String },
}

/// A list membership change, reported to statistics and the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership<T> {
    Appeared(T),
    Left(T),
}

#[derive(Debug, Clone)]
pub struct OrderedEntityHolder<T: Entity> {
    entries: Vec<T>,
    positions: HashMap<T::Key, usize>,
    events: Vec<Membership<T>>,
}

impl<T: Entity> Default for OrderedEntityHolder<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
            events: Vec::new(),
        }
    }
}

impl<T: Entity> OrderedEntityHolder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entity from a snapshot.
    ///
    /// Returns `false` and changes nothing when the key is already present.
    pub fn add_initial(&mut self, entity: T) -> bool {
        let key = entity.key();
        if self.positions.contains_key(&key) {
            debug!("Snapshot repeats {} {}, ignoring", T::TAG, key);
            return false;
        }
        self.positions.insert(key, self.entries.len());
        self.events.push(Membership::Appeared(entity.clone()));
        self.entries.push(entity);
        true
    }

    /// Inserts at `index` in `0..=len`, shifting later entries up
    pub fn insert_at(
        &mut self,
        index: usize,
        entity: T,
        suppress_event: bool,
    ) -> Result<(), HolderError> {
        if index > self.entries.len() {
            return Err(self.out_of_bounds(index));
        }

        for position in self.positions.values_mut() {
            if *position >= index {
                *position += 1;
            }
        }
        self.positions.insert(entity.key(), index);
        if !suppress_event {
            self.events.push(Membership::Appeared(entity.clone()));
        }
        self.entries.insert(index, entity);
        Ok(())
    }

    /// Removes the entity at `index` in `0..len`, shifting later entries down
    pub fn delete_at(&mut self, index: usize, suppress_event: bool) -> Result<T, HolderError> {
        if index >= self.entries.len() {
            return Err(self.out_of_bounds(index));
        }

        let entity = self.entries.remove(index);
        let key = entity.key();
        let indexed_here = self.positions.get(&key) == Some(&index);
        if indexed_here {
            self.positions.remove(&key);
        }
        for position in self.positions.values_mut() {
            if *position > index {
                *position -= 1;
            }
        }
        if indexed_here {
            // a second copy of a moved entity keeps the key alive
            if let Some(other) = self.entries.iter().position(|e| e.key() == key) {
                self.positions.insert(key, other);
            }
        }

        if !suppress_event {
            self.events.push(Membership::Left(entity.clone()));
        }
        Ok(entity)
    }

    pub fn get_by_index(&self, index: usize) -> Result<&T, HolderError> {
        self.entries
            .get(index)
            .ok_or_else(|| self.out_of_bounds(index))
    }

    pub fn get_by_key(&self, key: &T::Key) -> Result<&T, HolderError> {
        self.positions
            .get(key)
            .and_then(|&i| self.entries.get(i))
            .ok_or_else(|| HolderError::NotFound {
                tag: T::TAG,
                key: key.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Keys in list order, duplicates included
    pub fn keys(&self) -> Vec<T::Key> {
        self.entries.iter().map(Entity::key).collect()
    }

    /// Empties the list. Users report every present entry as having left.
    pub fn reset(&mut self) {
        if T::REPLAY_ON_RESET {
            for entity in self.entries.drain(..) {
                self.events.push(Membership::Left(entity));
            }
        }
        self.entries.clear();
        self.positions.clear();
    }

    /// Hands over buffered membership events, oldest first
    pub fn take_events(&mut self) -> Vec<Membership<T>> {
        std::mem::take(&mut self.events)
    }

    fn out_of_bounds(&self, index: usize) -> HolderError {
        HolderError::IndexOutOfBounds {
            tag: T::TAG,
            index,
            len: self.entries.len(),
        }
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let indexed = self
            .positions
            .iter()
            .all(|(key, &i)| self.entries.get(i).map(Entity::key).as_ref() == Some(key));
        let covered = self
            .entries
            .iter()
            .all(|e| self.positions.contains_key(&e.key()));
        indexed && covered
    }
}
