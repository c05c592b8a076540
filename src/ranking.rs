//! Ordered associative container keyed by (priority, sequence).
//!
//! Iteration yields entries with the highest priority first; ties go to the
//! lowest sequence number, which callers derive from insertion or
//! registration order. Lookup by identity is O(1), ordered iteration is a
//! walk of a `BTreeMap`, and mutation never invalidates a snapshot taken with
//! [`RankedMap::values`].

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Sort key of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankKey {
    priority: Reverse<i64>,
    sequence: u64,
}

impl RankKey {
    pub fn new(priority: i64, sequence: u64) -> Self {
        Self {
            priority: Reverse(priority),
            sequence,
        }
    }

    pub fn priority(&self) -> i64 {
        self.priority.0
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Entries ordered by [`RankKey`], addressable by a stable identity `I`.
#[derive(Debug, Clone)]
pub struct RankedMap<I, V> {
    order: BTreeMap<RankKey, I>,
    entries: HashMap<I, (RankKey, V)>,
}

impl<I, V> RankedMap<I, V>
where
    I: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Insert or replace the entry for `id`. Returns `true` if an entry for
    /// `id` already existed (it is re-ranked under the new key).
    pub fn insert(&mut self, id: I, priority: i64, sequence: u64, value: V) -> bool {
        let key = RankKey::new(priority, sequence);
        let existed = match self.entries.insert(id.clone(), (key, value)) {
            Some((old_key, _)) => {
                self.order.remove(&old_key);
                true
            }
            None => false,
        };
        self.order.insert(key, id);
        existed
    }

    /// Remove the entry for `id`. Returns `true` if it existed.
    pub fn remove(&mut self, id: &I) -> bool {
        self.take(id).is_some()
    }

    /// Remove and return the value for `id`.
    pub fn take(&mut self, id: &I) -> Option<V> {
        let (key, value) = self.entries.remove(id)?;
        self.order.remove(&key);
        Some(value)
    }

    pub fn get(&self, id: &I) -> Option<&V> {
        self.entries.get(id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: &I) -> bool {
        self.entries.contains_key(id)
    }

    pub fn key_of(&self, id: &I) -> Option<RankKey> {
        self.entries.get(id).map(|(k, _)| *k)
    }

    /// Highest-ranked entry.
    pub fn first(&self) -> Option<(&I, &V)> {
        let id = self.order.values().next()?;
        self.entries.get(id).map(|(_, v)| (id, v))
    }

    /// Entries in rank order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&I, &V)> {
        self.order
            .values()
            .filter_map(move |id| self.entries.get(id).map(|(_, v)| (id, v)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<I, V> RankedMap<I, V>
where
    I: Hash + Eq + Clone,
    V: Clone,
{
    /// Snapshot of the values in rank order.
    pub fn values(&self) -> Vec<V> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }
}

impl<I, V> Default for RankedMap<I, V>
where
    I: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
