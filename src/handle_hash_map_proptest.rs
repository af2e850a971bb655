#![cfg(test)]

// Property tests for HandleHashMap kept inside the crate so they can drive
// key deaths and dead-entry unlinking against the structural layer directly.

use crate::handle_hash_map::{Handle, HandleHashMap};
use crate::tracked::Tracked;
use core::hash::BuildHasher;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hasher;

// Pool-indexed operations: indices shrink to earlier keys, op lists shrink in
// length.
#[derive(Clone, Debug)]
enum Op {
    Upsert(usize, i32),
    // Upsert through a new object equal to the current key, then drop the old one.
    Replace(usize, i32),
    Remove(usize),
    Find(usize),
    DropKey(usize),
    UnlinkDead,
    Iterate,
}

fn arb_scenario() -> impl Strategy<Value = (usize, Vec<Op>)> {
    (1usize..=6).prop_flat_map(|pool| {
        let idx = 0..pool;
        let op = prop_oneof![
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Upsert(i, v)),
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Replace(i, v)),
            idx.clone().prop_map(Op::Remove),
            idx.clone().prop_map(Op::Find),
            idx.clone().prop_map(Op::DropKey),
            Just(Op::UnlinkDead),
            Just(Op::Iterate),
        ];
        (Just(pool), proptest::collection::vec(op, 1..80))
    })
}

// State-machine equivalence against a model of live and dead entries.
// Invariants exercised across random operation sequences:
// - Upserting a live key overwrites in place and keeps its handle.
// - Upserting through an equal, distinct object reports the displaced owner.
// - A key's death hides its entry from `find`/`live_len` but keeps it stored
//   until unlinked by handle.
// - Removed handles never resolve again.
// - `len == live + dead` and `live_len == live` after every step.
fn run_scenario<S: BuildHasher>(
    mut sut: HandleHashMap<u8, i32, S>,
    pool: usize,
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let mut keys: Vec<Option<Tracked<u8>>> = vec![None; pool];
    let mut model: HashMap<usize, (Handle, i32)> = HashMap::new();
    let mut dead: Vec<(Handle, i32)> = Vec::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            Op::Upsert(i, v) => {
                let key = keys[i].get_or_insert_with(|| Tracked::new(i as u8));
                let u = sut.upsert(key, v);
                prop_assert!(u.displaced_owner.is_none());
                match model.get(&i) {
                    Some(&(h, old)) => {
                        prop_assert_eq!(u.handle, h);
                        prop_assert_eq!(u.previous, Some(old));
                    }
                    None => {
                        prop_assert!(u.previous.is_none());
                    }
                }
                model.insert(i, (u.handle, v));
            }
            Op::Replace(i, v) => {
                if let Some(old_key) = keys[i].take() {
                    let new_key = Tracked::new(i as u8);
                    let u = sut.upsert(&new_key, v);
                    match model.get(&i) {
                        Some(&(h, old)) => {
                            prop_assert_eq!(u.handle, h);
                            prop_assert_eq!(u.previous, Some(old));
                            prop_assert_eq!(u.displaced_owner, Some(old_key.owner()));
                        }
                        None => {
                            prop_assert!(u.previous.is_none());
                            prop_assert!(u.displaced_owner.is_none());
                        }
                    }
                    model.insert(i, (u.handle, v));
                    // The entry follows the new object; dropping the old one is harmless.
                    drop(old_key);
                    keys[i] = Some(new_key);
                }
            }
            Op::Remove(i) => {
                if let Some(key) = &keys[i] {
                    let found = sut.find(key);
                    match model.remove(&i) {
                        Some((h, v)) => {
                            prop_assert_eq!(found, Some(h));
                            let (b, vv) = sut.remove(h).expect("live handle removable");
                            prop_assert_eq!(vv, v);
                            prop_assert!(b.is_live());
                            stale.push(h);
                        }
                        None => {
                            prop_assert!(found.is_none());
                        }
                    }
                }
            }
            Op::Find(i) => {
                if let Some(key) = &keys[i] {
                    let found = sut.find(key);
                    match model.get(&i) {
                        Some(&(h, v)) => {
                            prop_assert_eq!(found, Some(h));
                            prop_assert_eq!(sut.value(h), Some(&v));
                        }
                        None => {
                            prop_assert!(found.is_none());
                        }
                    }
                }
            }
            Op::DropKey(i) => {
                if keys[i].take().is_some() {
                    if let Some(entry) = model.remove(&i) {
                        dead.push(entry);
                    }
                }
            }
            Op::UnlinkDead => {
                if let Some((h, v)) = dead.pop() {
                    let (b, vv) = sut.remove(h).expect("dead entry stays until unlinked");
                    prop_assert_eq!(vv, v);
                    prop_assert!(!b.is_live());
                    stale.push(h);
                }
            }
            Op::Iterate => {
                let seen: BTreeSet<u8> = sut
                    .iter()
                    .filter_map(|(_, k, _)| k.resolve().map(|k| *k))
                    .collect();
                let expected: BTreeSet<u8> = model.keys().map(|&i| i as u8).collect();
                prop_assert_eq!(seen, expected);
            }
        }

        for &h in &stale {
            prop_assert!(sut.value(h).is_none());
        }
        prop_assert_eq!(sut.live_len(), model.len());
        prop_assert_eq!(sut.len(), model.len() + dead.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty() && dead.is_empty());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_scenario(HandleHashMap::<u8, i32>::new(), pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Same invariants under worst-case collisions: every dead entry shares a
// bucket with every live one, so only equality keeps them apart.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_scenario(HandleHashMap::with_hasher(ConstBuildHasher), pool, ops)?;
    }
}
