//! WeakKeyBox: the stored form of a key.
//!
//! Holds a non-owning reference to the key and the hash computed when the box
//! was built. The hash never changes, so a bucket can still be located after
//! the key has died. Equality requires both sides to resolve to live, equal
//! keys; a box whose key died is unequal to everything, itself included.

use crate::tracked::{OwnerId, Tracked, WeakTracked};
use core::fmt;
use core::hash::{Hash, Hasher};

pub struct WeakKeyBox<T> {
    key: WeakTracked<T>,
    hash: u64,
}

impl<T> WeakKeyBox<T> {
    pub fn new(key: &Tracked<T>, hash: u64) -> Self {
        Self {
            key: Tracked::downgrade(key),
            hash,
        }
    }

    /// The hash captured at construction.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn owner(&self) -> OwnerId {
        self.key.owner()
    }

    pub fn resolve(&self) -> Option<Tracked<T>> {
        self.key.upgrade()
    }

    pub fn is_live(&self) -> bool {
        self.key.is_live()
    }
}

impl<T: Eq> WeakKeyBox<T> {
    /// Equality against a live probe key whose hash is `hash`.
    pub fn matches(&self, probe: &T, hash: u64) -> bool {
        self.hash == hash && self.resolve().map_or(false, |key| *key == *probe)
    }
}

// Deliberately not `Eq`: a dead box is not equal to itself.
impl<T: Eq> PartialEq for WeakKeyBox<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.hash != other.hash {
            return false;
        }
        match (self.resolve(), other.resolve()) {
            (Some(a), Some(b)) => *a == *b,
            _ => false,
        }
    }
}

impl<T> Hash for WeakKeyBox<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl<T> fmt::Debug for WeakKeyBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakKeyBox")
            .field("owner", &self.owner())
            .field("hash", &self.hash)
            .field("live", &self.is_live())
            .finish()
    }
}
