//! Per-thread critical-section bookkeeping.
//!
//! Every thread records which critical sections it currently holds. Entering
//! a section the thread already holds panics; with a plain mutex that would
//! be a silent deadlock. Work that needs to take a lock but is triggered
//! while the thread sits inside some section (typically a key's last strong
//! reference dropping inside a closure) is parked on a thread-local queue and
//! run once the thread leaves its outermost section, with no lock held.

use core::cell::RefCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU64, Ordering};
use log::trace;

/// Process-unique identity of a critical section.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SectionId(u64);

static NEXT_SECTION: AtomicU64 = AtomicU64::new(1);

impl SectionId {
    pub fn new() -> Self {
        SectionId(NEXT_SECTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SectionId {
    fn default() -> Self {
        Self::new()
    }
}

type Deferred = Box<dyn FnOnce()>;

thread_local! {
    static HELD: RefCell<Vec<SectionId>> = const { RefCell::new(Vec::new()) };
    static DEFERRED: RefCell<Vec<Deferred>> = const { RefCell::new(Vec::new()) };
}

/// Mark `id` as held by the current thread until the returned guard drops.
///
/// Panics if the current thread already holds `id`.
pub fn enter(id: SectionId) -> ReentrancyGuard {
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        assert!(
            !held.contains(&id),
            "reentrant entry into critical section {:?}",
            id
        );
        held.push(id);
    });
    ReentrancyGuard {
        id,
        _nosend: PhantomData,
    }
}

/// Whether the current thread holds `id`.
pub fn holds(id: SectionId) -> bool {
    HELD.try_with(|held| held.borrow().contains(&id)).unwrap_or(false)
}

/// Whether the current thread holds any critical section at all.
pub fn holds_any() -> bool {
    HELD.try_with(|held| !held.borrow().is_empty()).unwrap_or(false)
}

/// Run `work` now if the current thread holds no critical section, otherwise
/// queue it until the thread leaves its outermost one.
pub fn run_outside_sections<F>(work: F)
where
    F: FnOnce() + 'static,
{
    if !holds_any() {
        work();
        return;
    }
    let mut work = Some(work);
    let parked = DEFERRED.try_with(|queue| {
        if let Some(work) = work.take() {
            trace!("deferring work until critical section exit");
            queue.borrow_mut().push(Box::new(work));
        }
    });
    // The queue is gone only during thread teardown.
    if parked.is_err() {
        if let Some(work) = work.take() {
            work();
        }
    }
}

/// Drain the deferred queue if the current thread holds no section.
///
/// Deferred work may itself enter sections and defer more work; the loop
/// keeps going until the queue stays empty.
pub fn run_deferred() {
    if holds_any() {
        return;
    }
    loop {
        let batch = DEFERRED
            .try_with(|queue| core::mem::take(&mut *queue.borrow_mut()))
            .unwrap_or_default();
        if batch.is_empty() {
            break;
        }
        for work in batch {
            work();
        }
    }
}

/// RAII guard returned by [`enter`].
///
/// Releasing the outermost guard drains the deferred queue, on unwind as well
/// as on return.
pub struct ReentrancyGuard {
    id: SectionId,
    // Held sections are per thread; the guard must be released where it was taken.
    _nosend: PhantomData<*mut ()>,
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        let _ = HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&h| h == self.id) {
                held.remove(pos);
            }
        });
        run_deferred();
    }
}
