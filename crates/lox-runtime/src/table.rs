//! Open-addressed hash table keyed by interned strings.
//!
//! Linear probing over a power-of-two capacity, load factor capped at 0.75.
//! Deletion leaves a tombstone so probe chains stay walkable; tombstones
//! count toward the load factor and are dropped on growth. Entries carry the
//! key's hash so growth can re-probe without consulting the string arena;
//! callers pass the hash alongside the key (it is precomputed on every
//! interned string).
//!
//! Keys are interned, so key comparison is id equality - one integer compare
//! per probe step.

use crate::arena::Arena;
use crate::object::{LoxString, StringId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Entry {
    Empty,
    Tombstone,
    Full {
        key: StringId,
        hash: u32,
        value: Value,
    },
}

/// Map from interned string to [`Value`].
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Full entries plus tombstones; drives the load factor.
    count: usize,
    /// Full entries only.
    live: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of present keys (tombstones excluded).
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Look up `key`. Expected O(1).
    pub fn get(&self, key: StringId, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }

        match self.entries[self.find_slot(key, hash)] {
            Entry::Full { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Insert or overwrite. Returns true iff `key` was absent before; the
    /// caller uses this to detect assignment to an undefined global.
    pub fn set(&mut self, key: StringId, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }

        let slot = self.find_slot(key, hash);
        match self.entries[slot] {
            Entry::Full { key: found, .. } if found == key => {
                self.entries[slot] = Entry::Full { key, hash, value };
                false
            }
            occupied => {
                // Reusing a tombstone does not raise the load factor.
                if occupied == Entry::Empty {
                    self.count += 1;
                }
                self.live += 1;
                self.entries[slot] = Entry::Full { key, hash, value };
                true
            }
        }
    }

    /// Remove `key`, leaving a tombstone. Returns true if it was present.
    pub fn delete(&mut self, key: StringId, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }

        let slot = self.find_slot(key, hash);
        match self.entries[slot] {
            Entry::Full { key: found, .. } if found == key => {
                self.entries[slot] = Entry::Tombstone;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Shallow-copy every entry of `other` into `self`.
    pub fn add_all(&mut self, other: &Table) {
        for (key, hash, value) in other.iter_with_hash() {
            self.set(key, hash, value);
        }
    }

    /// Probe for an existing string with this exact content. Used by the
    /// interner before any id for the content exists, so the comparison is
    /// hash-then-bytes rather than id equality.
    pub fn find_string(
        &self,
        text: &str,
        hash: u32,
        strings: &Arena<StringId, LoxString>,
    ) -> Option<StringId> {
        if self.count == 0 {
            return None;
        }

        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.entries[index] {
                Entry::Empty => return None,
                Entry::Tombstone => {}
                Entry::Full {
                    key,
                    hash: found_hash,
                    ..
                } => {
                    if found_hash == hash && strings[key].chars == text {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// GC hook: tombstone every entry whose key string is still white.
    /// Must run after tracing and before the sweep frees white strings, so
    /// the interner never holds a dangling key.
    pub fn remove_white(&mut self, strings: &Arena<StringId, LoxString>) {
        for entry in &mut self.entries {
            if let Entry::Full { key, .. } = *entry {
                if !strings[key].header.dark {
                    *entry = Entry::Tombstone;
                    self.live -= 1;
                }
            }
        }
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (StringId, Value)> + '_ {
        self.entries.iter().filter_map(|entry| match *entry {
            Entry::Full { key, value, .. } => Some((key, value)),
            _ => None,
        })
    }

    /// Snapshot of the pairs, for callers that need to release the borrow.
    pub fn pairs(&self) -> Vec<(StringId, Value)> {
        self.iter().collect()
    }

    fn iter_with_hash(&self) -> impl Iterator<Item = (StringId, u32, Value)> + '_ {
        self.entries.iter().filter_map(|entry| match *entry {
            Entry::Full { key, hash, value } => Some((key, hash, value)),
            _ => None,
        })
    }

    /// Index of the entry for `key`, or of the slot an insertion should use
    /// (the first tombstone on the probe chain, else the trailing empty).
    /// Requires a non-empty entry array.
    fn find_slot(&self, key: StringId, hash: u32) -> usize {
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone = None;

        loop {
            match self.entries[index] {
                Entry::Empty => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Entry::Full { key: found, .. } => {
                    if found == key {
                        return index;
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    fn grow(&mut self) {
        let capacity = (self.entries.len() * 2).max(8);
        let old = std::mem::replace(&mut self.entries, vec![Entry::Empty; capacity]);
        self.count = 0;
        self.live = 0;

        for entry in old {
            if let Entry::Full { key, hash, value } = entry {
                self.set(key, hash, value);
            }
        }
    }
}
