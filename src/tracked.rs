//! Identity-bearing shared keys whose death can be observed.
//!
//! `Tracked<T>` is an `Arc` around an unmodified `T` plus a process-unique
//! [`OwnerId`]. When the last strong `Tracked<T>` goes away, every attachment
//! recorded for that owner in the global [`AssociatedStorage`] is released.

use crate::associated::AssociatedStorage;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identity of a tracked object, stable for its whole life and never reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OwnerId(u64);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    fn next() -> Self {
        OwnerId(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

struct Inner<T> {
    owner: OwnerId,
    value: T,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        AssociatedStorage::global().release(self.owner);
    }
}

/// A strong, cloneable reference to a tracked value.
///
/// Equality and hashing delegate to `T`; use [`Tracked::ptr_eq`] or
/// [`Tracked::owner`] for identity.
pub struct Tracked<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                owner: OwnerId::next(),
                value,
            }),
        }
    }

    pub fn owner(&self) -> OwnerId {
        self.inner.owner
    }

    pub fn downgrade(this: &Self) -> WeakTracked<T> {
        WeakTracked {
            inner: Arc::downgrade(&this.inner),
            owner: this.inner.owner,
        }
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T> AsRef<T> for Tracked<T> {
    fn as_ref(&self) -> &T {
        &self.inner.value
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.value == other.inner.value
    }
}

impl<T: Eq> Eq for Tracked<T> {}

impl<T: Hash> Hash for Tracked<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.value.hash(state)
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.value.fmt(f)
    }
}

impl<T: fmt::Display> fmt::Display for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.value.fmt(f)
    }
}

/// Non-owning counterpart of [`Tracked`].
pub struct WeakTracked<T> {
    inner: Weak<Inner<T>>,
    owner: OwnerId,
}

impl<T> WeakTracked<T> {
    /// Either a fully valid key or `None`; never a torn reference.
    pub fn upgrade(&self) -> Option<Tracked<T>> {
        self.inner.upgrade().map(|inner| Tracked { inner })
    }

    /// Liveness check that does not create a temporary strong reference.
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// The owner this reference was created from, valid even after it died.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

impl<T> Clone for WeakTracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            owner: self.owner,
        }
    }
}

impl<T> fmt::Debug for WeakTracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTracked")
            .field("owner", &self.owner)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<H: Hash>(h: &H) -> u64 {
        let mut s = DefaultHasher::new();
        h.hash(&mut s);
        s.finish()
    }

    #[test]
    fn equality_and_hash_follow_the_value() {
        let a = Tracked::new("k".to_string());
        let b = Tracked::new("k".to_string());
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&"k".to_string()));
        assert!(!Tracked::ptr_eq(&a, &b));
        assert_ne!(a.owner(), b.owner());
    }

    #[test]
    fn clones_share_identity() {
        let a = Tracked::new(1u32);
        let a2 = a.clone();
        assert!(Tracked::ptr_eq(&a, &a2));
        assert_eq!(a.owner(), a2.owner());
        assert_eq!(Tracked::strong_count(&a), 2);
        assert_eq!(*a2, 1);
    }

    #[test]
    fn weak_resolves_until_last_strong_drops() {
        let a = Tracked::new(5u32);
        let a2 = a.clone();
        let w = Tracked::downgrade(&a);
        assert!(w.is_live());
        drop(a);
        assert_eq!(w.upgrade().as_deref(), Some(&5));
        drop(a2);
        assert!(!w.is_live());
        assert!(w.upgrade().is_none());
        // The identity survives the referent.
        assert_eq!(w.clone().owner(), w.owner());
    }

    #[test]
    fn display_and_debug_delegate() {
        let a = Tracked::new("x");
        assert_eq!(format!("{}", a), "x");
        assert_eq!(format!("{:?}", a), "\"x\"");
    }
}
