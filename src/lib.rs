//! weak-map-table: a thread-safe map whose keys are held weakly and whose
//! entries disappear on their own when the key is dropped.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a map from weakly held keys to strongly held values with no sweep,
//!   timer, or explicit cleanup call, safe under concurrent mutation and
//!   under key deaths happening on arbitrary threads.
//! - Layers:
//!   - `Tracked<T>`: an `Arc` around the caller's `T` plus a unique owner id.
//!     Its destructor releases everything attached to that owner.
//!   - `AssociatedStorage`: process-wide registry of attachments keyed by
//!     `(OwnerId, SlotId)`, behind its own lock.
//!   - `LifecycleHook`: an attachment whose drop runs a callback.
//!   - `WeakKeyBox<T>`: the stored key; weak reference plus captured hash.
//!   - `HandleHashMap<T, V, S>`: structural map returning stable generational
//!     handles; indexing uses only captured hashes.
//!   - `CriticalSection<T>`: the single lock every table operation goes
//!     through, with per-thread tracking of held sections.
//!   - `MapTable<T, V, S>`: public API composing the above.
//!
//! Flow
//! - `insert(key, value)` upserts `(box, value)` under the table's section,
//!   then attaches a hook to `key` under the table's slot. The hook knows the
//!   entry's handle and holds only a `Weak` to the table.
//! - When `key` dies the registry drops the hook; the hook removes the entry
//!   by handle through a fresh `mutate`. Handles are generational, so a late
//!   or duplicate removal is a no-op and never hits a newer entry.
//! - `remove(key)` detaches the hook before erasing the entry.
//! - Dropping the table marks it disposed and detaches every hook it still
//!   has on live keys. Hooks already in flight see the disposed flag (or a
//!   dead `Weak`) and do nothing.
//!
//! Reentrancy and lock order
//! - Lock order is table section, then registry. The registry never drops
//!   attachments while locked, and nothing takes a table section while
//!   holding the registry.
//! - Resolving a stored key creates a temporary strong reference. If that
//!   temporary turns out to be the last one, the key dies inside the
//!   section. The hook then defers its removal until the thread leaves its
//!   outermost section instead of re-entering a lock it (or an outer frame)
//!   already holds. Leaving that section drains the queue on unwind too.
//! - Re-entering a section from inside its own closure panics.
//! - Values removed or replaced by the table are dropped after the lock is
//!   released.
//!
//! Visibility of dead keys
//! - `len`, `keys`, `values`, `pairs`, and `Display` skip entries whose key
//!   is dead, so they agree with lookups even before a deferred removal has
//!   run.
//! - A dead box compares unequal to every box, including one built from a
//!   fresh equal key: a new key never inherits the value of a dead one.
//!
//! Notes and non-goals
//! - No persistence, capacity bound, eviction, or ordering of snapshots.
//! - The global registry is a static and is never dropped; whatever is still
//!   attached at exit is reclaimed with the process.

mod associated;
mod critical_section;
pub mod handle_hash_map;
mod handle_hash_map_proptest;
mod lifecycle_hook;
mod map_table;
mod reentrancy;
mod tracked;
mod weak_key_box;

// Public surface
pub use associated::{AssociatedStorage, Attachment, SlotId};
pub use critical_section::CriticalSection;
pub use lifecycle_hook::LifecycleHook;
pub use map_table::MapTable;
pub use tracked::{OwnerId, Tracked, WeakTracked};
pub use weak_key_box::WeakKeyBox;
