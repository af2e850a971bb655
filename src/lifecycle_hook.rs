//! LifecycleHook: an attachment whose destruction runs a bound callback.
//!
//! Attached to a key through [`AssociatedStorage`](crate::AssociatedStorage),
//! it is dropped when the key dies, and the callback removes the matching
//! table entry. The callback never runs on the dropping thread while that
//! thread is inside a critical section; it is deferred until the thread has
//! left all of them. Detaching the hook clears the callback, so a hook taken
//! out of the registry on purpose does nothing when dropped.

use crate::associated::Attachment;
use crate::reentrancy;
use core::fmt;

type Callback = Box<dyn FnOnce() + Send>;

pub struct LifecycleHook {
    on_release: Option<Callback>,
}

impl LifecycleHook {
    pub fn new<F>(on_release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            on_release: Some(Box::new(on_release)),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.on_release.is_some()
    }
}

impl Attachment for LifecycleHook {
    fn detached(&mut self) {
        self.on_release = None;
    }
}

impl Drop for LifecycleHook {
    fn drop(&mut self) {
        if let Some(on_release) = self.on_release.take() {
            reentrancy::run_outside_sections(on_release);
        }
    }
}

impl fmt::Debug for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHook")
            .field("armed", &self.is_armed())
            .finish()
    }
}
