//! AssociatedStorage: objects attached to the lifetime of a tracked owner.
//!
//! A registry keyed by `(OwnerId, SlotId)`. Attaching hands the object over
//! to the registry; it is dropped when the owner dies, or returned early by
//! `detach`. The registry has its own lock, independent of any table, and no
//! attachment is ever dropped while that lock is held: releasing an owner may
//! run arbitrary destructors that reach into other locks.

use crate::tracked::{OwnerId, Tracked};
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;
use log::trace;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Something that can live in an [`AssociatedStorage`] slot.
pub trait Attachment: Send + 'static {
    /// Called when the attachment leaves the registry on purpose (replaced or
    /// detached) rather than with its owner. Dropping it afterwards must not
    /// act on the owner's death.
    fn detached(&mut self) {}
}

/// Identity of an attachment slot, one per client (e.g. per table).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SlotId(u64);

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

impl SlotId {
    pub fn new() -> Self {
        SlotId(NEXT_SLOT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

type Slots = HashMap<SlotId, Box<dyn Attachment>>;

pub struct AssociatedStorage {
    owners: Mutex<HashMap<OwnerId, Slots>>,
}

static GLOBAL: Lazy<AssociatedStorage> = Lazy::new(AssociatedStorage::new);

impl AssociatedStorage {
    pub fn new() -> Self {
        Self {
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry released by `Tracked` destructors.
    ///
    /// Being a static, it is never dropped; attachments still present at
    /// process exit are reclaimed with the process.
    pub fn global() -> &'static AssociatedStorage {
        &GLOBAL
    }

    /// Attach `object` to `owner` under `slot`, returning the displaced
    /// attachment (already told it was detached).
    ///
    /// Taking the owner by strong reference guarantees it is alive, so the
    /// attachment cannot outlive a release that already happened.
    pub fn attach<T>(
        &self,
        owner: &Tracked<T>,
        slot: SlotId,
        object: Box<dyn Attachment>,
    ) -> Option<Box<dyn Attachment>> {
        let mut prior = self
            .owners
            .lock()
            .entry(owner.owner())
            .or_default()
            .insert(slot, object);
        if let Some(prior) = prior.as_mut() {
            prior.detached();
        }
        prior
    }

    /// Remove the attachment for `(owner, slot)` without waiting for the
    /// owner to die. A dead or unknown owner yields `None`.
    pub fn detach(&self, owner: OwnerId, slot: SlotId) -> Option<Box<dyn Attachment>> {
        let mut removed = {
            let mut owners = self.owners.lock();
            let slots = owners.get_mut(&owner)?;
            let removed = slots.remove(&slot);
            if slots.is_empty() {
                owners.remove(&owner);
            }
            removed
        };
        if let Some(removed) = removed.as_mut() {
            removed.detached();
        }
        removed
    }

    /// Drop every attachment of a dead owner.
    pub(crate) fn release(&self, owner: OwnerId) {
        let released = self.owners.lock().remove(&owner);
        if let Some(slots) = released {
            trace!("releasing {} attachment(s) of {:?}", slots.len(), owner);
            drop(slots);
        }
    }

    pub fn is_attached(&self, owner: OwnerId, slot: SlotId) -> bool {
        self.owners
            .lock()
            .get(&owner)
            .map(|slots| slots.contains_key(&slot))
            .unwrap_or(false)
    }

    pub fn attachment_count(&self, owner: OwnerId) -> usize {
        self.owners.lock().get(&owner).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of owners with at least one attachment.
    pub fn len(&self) -> usize {
        self.owners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.lock().is_empty()
    }
}

impl Default for AssociatedStorage {
    fn default() -> Self {
        Self::new()
    }
}
