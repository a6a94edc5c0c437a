//! Insertion-ordered, deduplicated entry collection.

use std::collections::HashMap;
use std::hash::Hash;

/// Source-defined identity of a discovered entry.
///
/// Two entries with the same key are the same entry, whatever their other
/// fields say. Hosts key on `address:port`, invitations on their provider id.
pub trait Keyed {
    /// The identity type.
    type Key: Eq + Hash + Clone + Send + 'static;

    /// The entry's identity.
    fn key(&self) -> Self::Key;
}

impl Keyed for String {
    type Key = String;

    fn key(&self) -> String {
        self.clone()
    }
}

impl Keyed for &'static str {
    type Key = &'static str;

    fn key(&self) -> &'static str {
        *self
    }
}

/// Ordered set with O(1) key lookup and add-or-update semantics.
///
/// No two stored items share a key. An item's index only moves when an
/// item before it is removed.
#[derive(Debug, Clone)]
pub struct UniqueIndexedSet<T: Keyed> {
    items: Vec<T>,
    index: HashMap<T::Key, usize>,
}

impl<T: Keyed> UniqueIndexedSet<T> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Append `item` unless its key is already present.
    ///
    /// Returns `false` without mutating if the key exists.
    pub fn add(&mut self, item: T) -> bool {
        let key = item.key();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.items.len());
        self.items.push(item);
        true
    }

    /// Replace the item with the same key in place, or append.
    ///
    /// Returns the item's index.
    pub fn add_or_update(&mut self, item: T) -> usize {
        let key = item.key();
        match self.index.get(&key) {
            Some(&idx) => {
                self.items[idx] = item;
                idx
            }
            None => {
                let idx = self.items.len();
                self.index.insert(key, idx);
                self.items.push(item);
                idx
            }
        }
    }

    /// Remove the item at `index`, shifting later items down.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let item = self.items.remove(index);
        self.index.remove(&item.key());
        for later in &self.items[index..] {
            if let Some(idx) = self.index.get_mut(&later.key()) {
                *idx -= 1;
            }
        }
        Some(item)
    }

    /// Remove the item with `key`, if present.
    pub fn remove_key(&mut self, key: &T::Key) -> Option<T> {
        let idx = self.get_index(key)?;
        self.remove(idx)
    }

    /// True if an item with `key` is stored.
    pub fn contains(&self, key: &T::Key) -> bool {
        self.index.contains_key(key)
    }

    /// Index of the item with `key`.
    pub fn get_index(&self, key: &T::Key) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Item at `index`.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Item with `key`.
    pub fn get_by_key(&self, key: &T::Key) -> Option<&T> {
        self.get_index(key).and_then(|idx| self.items.get(idx))
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    /// Items in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Items as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: Keyed> Default for UniqueIndexedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Keyed> IntoIterator for &'a UniqueIndexedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: Keyed> FromIterator<T> for UniqueIndexedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.add(item);
        }
        set
    }
}
