//! CriticalSection: a value behind a single mutual-exclusion boundary.

use crate::reentrancy::{self, SectionId};
use parking_lot::Mutex;

/// Serialized access to a `T`.
///
/// All `read` and `mutate` calls are totally ordered. Closures run with the
/// lock held, so they must stay short and must not call back into the same
/// section: doing so panics. Work deferred through
/// [`reentrancy::run_outside_sections`] while the closure runs is executed
/// after the lock is released.
pub struct CriticalSection<T> {
    id: SectionId,
    state: Mutex<T>,
}

impl<T> CriticalSection<T> {
    pub fn new(value: T) -> Self {
        Self {
            id: SectionId::new(),
            state: Mutex::new(value),
        }
    }

    pub fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.enter(|state| f(state))
    }

    pub fn mutate<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        self.enter(f)
    }

    /// Whether the calling thread is currently inside this section.
    pub fn is_held_by_current_thread(&self) -> bool {
        reentrancy::holds(self.id)
    }

    pub fn into_inner(self) -> T {
        self.state.into_inner()
    }

    fn enter<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        // Unlocks before `_held` drops and drains deferred work.
        let _held = reentrancy::enter(self.id);
        let mut guard = self.state.lock();
        f(&mut guard)
    }
}

impl<T: Default> Default for CriticalSection<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> core::fmt::Debug for CriticalSection<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CriticalSection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
