//! Dense entity storage with O(1) id lookup.
//!
//! Entities reference each other by id only. A stale id simply misses the
//! index, so there are no ownership cycles between clips, tracks, overlaps
//! and groups.

use std::collections::HashMap;
use std::hash::Hash;

use crate::clip::Clip;
use crate::group::ClipGroup;
use crate::overlap::Overlap;
use crate::track::Track;
use crate::types::{ClipId, GroupId, OverlapId, TrackId};

pub trait Keyed {
    type Key: Copy + Eq + Hash + Ord + std::fmt::Debug;
    fn key(&self) -> Self::Key;
}

impl Keyed for Clip {
    type Key = ClipId;
    fn key(&self) -> ClipId {
        self.id
    }
}

impl Keyed for Track {
    type Key = TrackId;
    fn key(&self) -> TrackId {
        self.id
    }
}

impl Keyed for Overlap {
    type Key = OverlapId;
    fn key(&self) -> OverlapId {
        self.id
    }
}

impl Keyed for ClipGroup {
    type Key = GroupId;
    fn key(&self) -> GroupId {
        self.id
    }
}

#[derive(Debug, Clone)]
pub struct Arena<V: Keyed> {
    items: Vec<V>,
    index: HashMap<V::Key, usize>,
}

impl<V: Keyed> Arena<V> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: V::Key) -> bool {
        self.index.contains_key(&key)
    }

    pub fn get(&self, key: V::Key) -> Option<&V> {
        self.index.get(&key).map(|&i| &self.items[i])
    }

    pub fn get_mut(&mut self, key: V::Key) -> Option<&mut V> {
        match self.index.get(&key) {
            Some(&i) => Some(&mut self.items[i]),
            None => None,
        }
    }

    /// Insert or replace. Returns the replaced value.
    pub fn insert(&mut self, value: V) -> Option<V> {
        let key = value.key();
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.items[i], value)),
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(value);
                None
            }
        }
    }

    pub fn remove(&mut self, key: V::Key) -> Option<V> {
        let i = self.index.remove(&key)?;
        let removed = self.items.swap_remove(i);
        if let Some(moved) = self.items.get(i) {
            self.index.insert(moved.key(), i);
        }
        Some(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.items.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = V::Key> + '_ {
        self.items.iter().map(|v| v.key())
    }

    /// Values ordered by id, for deterministic output.
    pub fn sorted(&self) -> Vec<&V> {
        let mut values: Vec<&V> = self.items.iter().collect();
        values.sort_by_key(|v| v.key());
        values
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&V) -> bool) {
        self.items.retain(|v| keep(v));
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, v)| (v.key(), i))
            .collect();
    }
}

impl<V: Keyed> Default for Arena<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Keyed> FromIterator<V> for Arena<V> {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let mut arena = Self::new();
        for value in iter {
            arena.insert(value);
        }
        arena
    }
}
