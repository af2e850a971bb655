//! MapTable: the public weak-key map.

use crate::associated::{AssociatedStorage, Attachment, SlotId};
use crate::critical_section::CriticalSection;
use crate::handle_hash_map::{Handle, HandleHashMap};
use crate::lifecycle_hook::LifecycleHook;
use crate::tracked::{OwnerId, Tracked};
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, trace};
use std::collections::hash_map::RandomState;
use std::sync::Arc;

/// State shared between a table and the hooks attached to its keys.
struct Shared<T, V, S> {
    slot: SlotId,
    disposed: AtomicBool,
    store: CriticalSection<HandleHashMap<T, V, S>>,
}

impl<T, V, S> Shared<T, V, S> {
    /// Remove the entry of a key that just died.
    ///
    /// The entry must still belong to `owner`: an equal key set through
    /// another object may have taken it over while this hook was in flight.
    fn release_entry(&self, handle: Handle, owner: OwnerId) {
        if self.disposed.load(Ordering::Acquire) {
            trace!("{:?}: hook fired after disposal, ignoring", self.slot);
            return;
        }
        // Dropped after the section is left.
        let removed = self.store.mutate(|store| {
            if store.key(handle).map(|k| k.owner()) == Some(owner) {
                store.remove(handle)
            } else {
                None
            }
        });
        match removed {
            Some(_) => trace!("{:?}: removed entry of a dead key", self.slot),
            None => trace!("{:?}: entry already gone", self.slot),
        }
    }
}

impl<T, V, S> Shared<T, V, S>
where
    T: Send + Sync + 'static,
    V: Send + 'static,
    S: Send + 'static,
{
    fn hook_for(self: &Arc<Self>, handle: Handle, owner: OwnerId) -> LifecycleHook {
        let table = Arc::downgrade(self);
        let slot = self.slot;
        LifecycleHook::new(move || match table.upgrade() {
            Some(shared) => shared.release_entry(handle, owner),
            None => trace!("{:?}: hook fired after the table was dropped", slot),
        })
    }
}

/// A thread-safe map from weakly held keys to strongly held values.
///
/// Keys are [`Tracked`] handles; the table never keeps one alive. When the
/// last strong reference to a key drops, its entry is removed without any
/// call into the table. Lookups and counts skip entries whose key is dead,
/// so a key's death is never observable as a stale entry.
///
/// Every operation runs under one internal critical section. Closures passed
/// to [`MapTable::with_value`] run inside it and must not call back into the
/// same table.
pub struct MapTable<T, V, S = RandomState> {
    shared: Arc<Shared<T, V, S>>,
}

impl<T, V> MapTable<T, V>
where
    T: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<T, V, S> MapTable<T, V, S>
where
    T: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: SlotId::new(),
                disposed: AtomicBool::new(false),
                store: CriticalSection::new(HandleHashMap::with_capacity_and_hasher(
                    capacity, hasher,
                )),
            }),
        }
    }

    /// The attachment slot this table's hooks occupy on its keys.
    pub fn slot(&self) -> SlotId {
        self.shared.slot
    }

    pub fn get(&self, key: &Tracked<T>) -> Option<V>
    where
        V: Clone,
    {
        self.with_value(key, V::clone)
    }

    /// Run `f` on the value stored for `key`, under the table's lock.
    pub fn with_value<R, F>(&self, key: &Tracked<T>, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        self.shared.store.read(|store| {
            let handle = store.find(key)?;
            store.value(handle).map(f)
        })
    }

    pub fn contains_key(&self, key: &Tracked<T>) -> bool {
        self.shared.store.read(|store| store.contains_key(key))
    }

    /// Remove the entry for `key`, returning its value.
    ///
    /// The hook on the key is detached first, so the key's later death has
    /// nothing left to do.
    pub fn remove(&self, key: &Tracked<T>) -> Option<V> {
        let slot = self.shared.slot;
        let (value, hook) = self.shared.store.mutate(|store| {
            let handle = store.find(key)?;
            // The hook sits on whichever object the entry was last set through.
            let owner = store.key(handle)?.owner();
            let hook = AssociatedStorage::global().detach(owner, slot);
            let (_, value) = store.remove(handle)?;
            Some((value, hook))
        })?;
        drop(hook);
        Some(value)
    }

    /// Number of entries whose key is alive.
    pub fn len(&self) -> usize {
        self.shared.store.read(|store| store.live_len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live keys.
    pub fn keys(&self) -> Vec<Tracked<T>> {
        self.shared
            .store
            .read(|store| store.iter().filter_map(|(_, k, _)| k.resolve()).collect())
    }

    /// Snapshot of the values whose key is alive.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.shared.store.read(|store| {
            store
                .iter()
                .filter(|(_, k, _)| k.is_live())
                .map(|(_, _, v)| v.clone())
                .collect()
        })
    }

    /// Snapshot of the live `(key, value)` pairs, in no particular order.
    pub fn pairs(&self) -> Vec<(Tracked<T>, V)>
    where
        V: Clone,
    {
        self.shared.store.read(|store| {
            store
                .iter()
                .filter_map(|(_, k, v)| k.resolve().map(|k| (k, v.clone())))
                .collect()
        })
    }

    #[cfg(test)]
    fn stored_len(&self) -> usize {
        self.shared.store.read(|store| store.len())
    }
}

impl<T, V, S> MapTable<T, V, S>
where
    T: Eq + Hash + Send + Sync + 'static,
    V: Send + 'static,
    S: BuildHasher + Send + 'static,
{
    /// Map `key` to `value`, returning the value it replaces.
    ///
    /// An equal live key already in the table has its entry overwritten. If
    /// that key is a different object, the entry moves over to `key`: it now
    /// lives as long as `key` does.
    pub fn insert(&self, key: &Tracked<T>, value: V) -> Option<V> {
        let shared = &self.shared;
        let (previous, displaced) = shared.store.mutate(|store| {
            let upsert = store.upsert(key, value);
            let storage = AssociatedStorage::global();
            let hook = shared.hook_for(upsert.handle, key.owner());

            let mut displaced: Vec<Box<dyn Attachment>> = Vec::new();
            displaced.extend(storage.attach(key, shared.slot, Box::new(hook)));
            if let Some(old_owner) = upsert.displaced_owner {
                displaced.extend(storage.detach(old_owner, shared.slot));
            }
            (upsert.previous, displaced)
        });
        drop(displaced);
        previous
    }

    /// `Some` inserts or overwrites; `None` removes.
    pub fn set(&self, key: &Tracked<T>, value: Option<V>) -> Option<V> {
        match value {
            Some(value) => self.insert(key, value),
            None => self.remove(key),
        }
    }
}

impl<T, V, S> Drop for MapTable<T, V, S> {
    fn drop(&mut self) {
        let shared = &self.shared;
        shared.disposed.store(true, Ordering::Release);
        // The store goes away with the table; only the hooks need undoing.
        let hooks: Vec<Box<dyn Attachment>> = shared.store.read(|store| {
            store
                .iter()
                .filter(|(_, k, _)| k.is_live())
                .filter_map(|(_, k, _)| AssociatedStorage::global().detach(k.owner(), shared.slot))
                .collect()
        });
        debug!("{:?}: disposed, detached {} hook(s)", shared.slot, hooks.len());
    }
}

impl<T, V, S> Default for MapTable<T, V, S>
where
    T: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<'a, T, V, S> Extend<(&'a Tracked<T>, V)> for MapTable<T, V, S>
where
    T: Eq + Hash + Send + Sync + 'static,
    V: Send + 'static,
    S: BuildHasher + Send + 'static,
{
    fn extend<I: IntoIterator<Item = (&'a Tracked<T>, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, T, V, S> FromIterator<(&'a Tracked<T>, V)> for MapTable<T, V, S>
where
    T: Eq + Hash + Send + Sync + 'static,
    V: Send + 'static,
    S: BuildHasher + Default + Send + 'static,
{
    fn from_iter<I: IntoIterator<Item = (&'a Tracked<T>, V)>>(iter: I) -> Self {
        let mut table = Self::default();
        table.extend(iter);
        table
    }
}

/// Renders the live entries as `key : value` lines.
impl<T, V, S> fmt::Display for MapTable<T, V, S>
where
    T: Eq + Hash + fmt::Display,
    V: fmt::Display,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.shared.store.read(|store| {
            store
                .iter()
                .filter_map(|(_, k, v)| k.resolve().map(|k| format!("{} : {}", k, v)))
                .collect()
        });
        write!(f, "[\n    {}\n]", lines.join(",\n    "))
    }
}

impl<T, V, S> fmt::Debug for MapTable<T, V, S>
where
    T: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Rendered(String);
        impl fmt::Debug for Rendered {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        let entries: Vec<(Tracked<T>, Rendered)> = self.shared.store.read(|store| {
            store
                .iter()
                .filter_map(|(_, k, v)| k.resolve().map(|k| (k, Rendered(format!("{:?}", v)))))
                .collect()
        });
        f.debug_map().entries(entries).finish()
    }
}
