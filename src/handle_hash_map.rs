//! HandleHashMap: weak-keyed structural layer with stable handles.
//!
//! Entries live in a `SlotMap`; a `HashTable` of slot keys indexes them by the
//! hash captured in each `WeakKeyBox`. Indexing always uses that stored hash,
//! so an entry whose key already died can still be unlinked through its
//! handle, and a stale handle never aliases a newer entry.

use crate::tracked::{OwnerId, Tracked};
use crate::weak_key_box::WeakKeyBox;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

#[derive(Debug)]
struct Entry<T, V> {
    key: WeakKeyBox<T>,
    value: V,
}

pub struct HandleHashMap<T, V, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<T, V>>,
}

/// Outcome of [`HandleHashMap::upsert`].
#[derive(Debug)]
pub struct Upsert<V> {
    pub handle: Handle,
    pub previous: Option<V>,
    /// Set when an equal key held by a different object was replaced.
    pub displaced_owner: Option<OwnerId>,
}

impl<T, V> HandleHashMap<T, V>
where
    T: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<T, V> Default for HandleHashMap<T, V>
where
    T: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over entries, live or not, in `HandleHashMap`.
pub struct Iter<'a, T, V> {
    it: slotmap::basic::Iter<'a, DefaultKey, Entry<T, V>>,
}

impl<'a, T, V> Iterator for Iter<'a, T, V> {
    type Item = (Handle, &'a WeakKeyBox<T>, &'a V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|(k, e)| (Handle(k), &e.key, &e.value))
    }
}

impl<T, V, S> HandleHashMap<T, V, S>
where
    T: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::with_capacity(capacity),
            slots: SlotMap::with_capacity_and_key(capacity),
        }
    }

    pub fn make_hash(&self, key: &T) -> u64 {
        self.hasher.hash_one(key)
    }

    pub fn find(&self, probe: &T) -> Option<Handle> {
        let hash = self.make_hash(probe);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|e| e.key.matches(probe, hash))
                    .unwrap_or(false)
            })
            .map(|&k| Handle(k))
    }

    pub fn contains_key(&self, probe: &T) -> bool {
        self.find(probe).is_some()
    }

    /// Insert `value` for `key`, or overwrite the entry of an equal live key.
    ///
    /// On overwrite the handle is kept. If the equal key is a different
    /// object, the entry now refers to `key` and the old owner is reported.
    pub fn upsert(&mut self, key: &Tracked<T>, value: V) -> Upsert<V> {
        let hash = self.make_hash(key);
        match self.index.entry(
            hash,
            |&kk| {
                self.slots
                    .get(kk)
                    .map(|e| e.key.matches(key, hash))
                    .unwrap_or(false)
            },
            |&kk| self.slots.get(kk).map(|e| e.key.hash()).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(o) => {
                let k = *o.get();
                let entry = &mut self.slots[k];
                let previous = core::mem::replace(&mut entry.value, value);
                let displaced_owner = if entry.key.owner() != key.owner() {
                    let old = core::mem::replace(&mut entry.key, WeakKeyBox::new(key, hash));
                    Some(old.owner())
                } else {
                    None
                };
                Upsert {
                    handle: Handle(k),
                    previous: Some(previous),
                    displaced_owner,
                }
            }
            hashbrown::hash_table::Entry::Vacant(v) => {
                let k = self.slots.insert(Entry {
                    key: WeakKeyBox::new(key, hash),
                    value,
                });
                let _ = v.insert(k);
                Upsert {
                    handle: Handle(k),
                    previous: None,
                    displaced_owner: None,
                }
            }
        }
    }
}

impl<T, V, S> HandleHashMap<T, V, S> {
    /// Stored entries, including those whose key died but were not unlinked yet.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Entries whose key is currently alive.
    pub fn live_len(&self) -> usize {
        self.slots.values().filter(|e| e.key.is_live()).count()
    }

    /// Unlink the entry behind `handle`. Stale handles yield `None`.
    pub fn remove(&mut self, handle: Handle) -> Option<(WeakKeyBox<T>, V)> {
        let k = handle.0;
        let entry = self.slots.remove(k)?;
        if let Ok(o) = self.index.find_entry(entry.key.hash(), |&kk| kk == k) {
            let _ = o.remove();
        }
        Some((entry.key, entry.value))
    }

    pub fn key(&self, h: Handle) -> Option<&WeakKeyBox<T>> {
        self.slots.get(h.0).map(|e| &e.key)
    }

    pub fn value(&self, h: Handle) -> Option<&V> {
        self.slots.get(h.0).map(|e| &e.value)
    }

    pub fn value_mut(&mut self, h: Handle) -> Option<&mut V> {
        self.slots.get_mut(h.0).map(|e| &mut e.value)
    }

    pub fn iter(&self) -> Iter<'_, T, V> {
        Iter {
            it: self.slots.iter(),
        }
    }
}
