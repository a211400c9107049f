// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::fmt;

/// A set whose membership is decided by a caller-supplied key function.
///
/// Structural equality is not enough for the records this crate diffs (a grouped
/// ingress permission and its ungrouped parts describe the same rules), so each
/// set carries the normalization that maps an item to its identity. Items are
/// kept ordered by key, which makes `to_vec` deterministic.
#[derive(Clone)]
pub struct KeyedSet<T> {
    key_fn: fn(&T) -> String,
    items: BTreeMap<String, T>,
}

impl<T: Clone> KeyedSet<T> {
    pub fn new(key_fn: fn(&T) -> String) -> Self {
        Self {
            key_fn,
            items: BTreeMap::new(),
        }
    }

    pub fn from_items(key_fn: fn(&T) -> String, items: impl IntoIterator<Item = T>) -> Self {
        let mut set = Self::new(key_fn);
        set.extend(items);
        set
    }

    pub fn key_of(&self, item: &T) -> String {
        (self.key_fn)(item)
    }

    /// Inserts `item`, replacing any member with the same key.
    pub fn insert(&mut self, item: T) {
        let key = self.key_of(&item);
        self.items.insert(key, item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.insert(item);
        }
    }

    pub fn remove(&mut self, item: &T) -> bool {
        let key = self.key_of(item);
        self.items.remove(&key).is_some()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains_key(&self.key_of(item))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Members of `self` whose key is absent from `other`.
    pub fn difference(&self, other: &Self) -> Self {
        let items = self
            .items
            .iter()
            .filter(|(key, _)| !other.items.contains_key(*key))
            .map(|(key, item)| (key.clone(), item.clone()))
            .collect();
        Self {
            key_fn: self.key_fn,
            items,
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.items.retain(|_, item| keep(item));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }
}

/// Two sets are equal when they hold the same keys.
impl<T> PartialEq for KeyedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self.items.keys().all(|key| other.items.contains_key(key))
    }
}

impl<T> Eq for KeyedSet<T> {}

impl<T: fmt::Debug> fmt::Debug for KeyedSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.items.values()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lowercase(s: &String) -> String {
        s.to_lowercase()
    }

    #[test]
    fn test_insert_uses_key_function() {
        let mut set = KeyedSet::new(lowercase);
        set.insert("TCP".to_string());
        set.insert("tcp".to_string());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&"Tcp".to_string()));
    }

    #[test]
    fn test_difference() {
        let a = KeyedSet::from_items(lowercase, vec!["a".to_string(), "b".to_string()]);
        let b = KeyedSet::from_items(lowercase, vec!["B".to_string(), "c".to_string()]);

        let only_a = a.difference(&b);
        assert_eq!(only_a.to_vec(), vec!["a".to_string()]);
        assert!(a.difference(&a).is_empty());
        assert_eq!(a.difference(&KeyedSet::new(lowercase)), a);
    }

    #[test]
    fn test_remove_and_retain() {
        let mut set = KeyedSet::from_items(
            lowercase,
            vec!["x".to_string(), "y".to_string(), "z".to_string()],
        );
        assert!(set.remove(&"X".to_string()));
        assert!(!set.remove(&"X".to_string()));
        set.retain(|s| s != "y");
        assert_eq!(set.to_vec(), vec!["z".to_string()]);
    }
}
