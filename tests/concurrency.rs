// MapTable under concurrent use.
//
// Each test documents what behavior is being verified. The invariants:
// - Disjoint writers never lose an entry.
// - A key may die on any thread; its entry is gone once that drop returns.
// - Racing insert/remove/get/drop on shared keys leaves no stale entry and
//   no stray hook once every key is released.
// - Dropping the table while other threads kill its keys is safe.
use std::sync::{Arc, Barrier};
use std::thread;
use weak_map_table::{AssociatedStorage, MapTable, Tracked};

const THREADS: usize = 8;
const KEYS_PER_THREAD: usize = 10_000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Small deterministic generator so runs are reproducible.
fn lcg(mut x: u64) -> impl FnMut() -> u64 {
    move || {
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
        x
    }
}

// Test: eight writers on disjoint keys.
// Verifies: every write lands and is readable, and the count adds up.
#[test]
fn disjoint_writers_keep_every_entry() {
    init_logging();
    let table: Arc<MapTable<(usize, usize), usize>> = Arc::new(MapTable::new());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = table.clone();
            thread::spawn(move || {
                let mut keys = Vec::with_capacity(KEYS_PER_THREAD);
                for i in 0..KEYS_PER_THREAD {
                    let k = Tracked::new((t, i));
                    table.insert(&k, t * KEYS_PER_THREAD + i);
                    assert_eq!(table.get(&k), Some(t * KEYS_PER_THREAD + i));
                    keys.push(k);
                }
                keys
            })
        })
        .collect();

    let keys: Vec<Tracked<(usize, usize)>> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(table.len(), THREADS * KEYS_PER_THREAD);
    for k in &keys {
        let (t, i) = **k;
        assert_eq!(table.get(k), Some(t * KEYS_PER_THREAD + i));
    }

    drop(keys);
    assert!(table.is_empty());
}

// Test: keys inserted on one thread, dropped on others.
// Verifies: cleanup runs on the dropping thread and is complete on return.
#[test]
fn keys_dropped_on_other_threads() {
    init_logging();
    let table: Arc<MapTable<u32, u32>> = Arc::new(MapTable::new());
    let mut keys: Vec<Tracked<u32>> = (0..1000).map(Tracked::new).collect();
    for k in &keys {
        table.insert(k, **k);
    }
    let kept = keys.split_off(500);

    let chunks: Vec<Vec<Tracked<u32>>> = keys.chunks(125).map(<[_]>::to_vec).collect();
    drop(keys);
    let handles: Vec<_> = chunks
        .into_iter()
        .map(|chunk| thread::spawn(move || drop(chunk)))
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(table.len(), kept.len());
    let mut live: Vec<u32> = table.keys().iter().map(|k| **k).collect();
    live.sort_unstable();
    assert_eq!(live, (500..1000).collect::<Vec<_>>());
}

// Test: racing operations on a shared key pool.
// Verifies: no deadlock or panic, and a clean table once the pool is gone.
#[test]
fn mixed_operations_on_shared_keys() {
    init_logging();
    let table: Arc<MapTable<u64, u64>> = Arc::new(MapTable::new());
    let pool: Arc<Vec<Tracked<u64>>> = Arc::new((0..64).map(Tracked::new).collect());
    let owners: Vec<_> = pool.iter().map(Tracked::owner).collect();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS as u64)
        .map(|seed| {
            let table = table.clone();
            let pool = pool.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut next = lcg(seed + 1);
                barrier.wait();
                for _ in 0..5_000 {
                    let r = next();
                    let k = &pool[(r >> 33) as usize % pool.len()];
                    match r % 4 {
                        0 | 1 => {
                            table.insert(k, r);
                        }
                        2 => {
                            table.remove(k);
                        }
                        _ => {
                            if let Some(v) = table.get(k) {
                                assert_ne!(v, u64::MAX);
                            }
                        }
                    }
                    // Short-lived keys die on this thread mid-run.
                    let temp = Tracked::new(r);
                    table.insert(&temp, 0);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(table.len() <= pool.len());
    drop(pool);
    assert!(table.is_empty());
    for owner in owners {
        assert!(!AssociatedStorage::global().is_attached(owner, table.slot()));
    }
}

// Test: the table is dropped while other threads kill its keys.
// Verifies: hooks racing disposal are harmless no-ops.
#[test]
fn table_drop_races_key_deaths() {
    init_logging();
    for _ in 0..20 {
        let table: MapTable<usize, usize> = MapTable::new();
        let slot = table.slot();
        let chunks: Vec<Vec<Tracked<usize>>> = (0..4)
            .map(|c| {
                (0..250)
                    .map(|i| {
                        let k = Tracked::new(c * 250 + i);
                        table.insert(&k, i);
                        k
                    })
                    .collect()
            })
            .collect();
        let survivor = Tracked::new(usize::MAX);
        table.insert(&survivor, 0);

        let barrier = Arc::new(Barrier::new(chunks.len() + 1));
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    drop(chunk);
                })
            })
            .collect();
        barrier.wait();
        drop(table);
        for h in handles {
            h.join().unwrap();
        }
        assert!(!AssociatedStorage::global().is_attached(survivor.owner(), slot));
    }
}
