//! Shuttle schedule exploration for the durable list protocol.
//!
//! Shuttle runs each test body under many randomized thread schedules. The
//! models below mirror the list's publication protocol with shuttle atomics
//! and index links in place of pointers:
//!
//! - a node's content is written and marked persisted before the CAS that
//!   makes it reachable
//! - value overwrites happen under the version bits of the successor word
//! - readers validate version snapshots and retry on change
//!
//! Run with: `cargo test --lib tree::shuttle_tests`

use shuttle::sync::Arc;
use shuttle::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use shuttle::thread;

use crate::link::{DELETED_BIT, POINTER_MASK, VERSION_MASK, VERSION_MAX, VERSION_SHIFT};

const ITERATIONS: usize = 1_000;

// ============================================================================
//  Model List
// ============================================================================

/// A node slot. Links hold `index + 1` in the pointer bits, 0 is null.
struct Slot {
    key: AtomicI64,
    value: AtomicU64,
    next: AtomicU64,
    persisted: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        Self {
            key: AtomicI64::new(0),
            value: AtomicU64::new(0),
            next: AtomicU64::new(0),
            persisted: AtomicBool::new(false),
        }
    }
}

/// Slot 0 is the head. Worker `w` owns slots `1 + w * per_worker ..`.
struct ModelList {
    slots: Vec<Slot>,
    per_worker: usize,
}

impl ModelList {
    fn new(workers: usize, per_worker: usize) -> Self {
        let slots: Vec<Slot> = (0..=workers * per_worker).map(|_| Slot::new()).collect();
        slots[0].key.store(i64::MIN, Ordering::Relaxed);
        slots[0].persisted.store(true, Ordering::Relaxed);
        Self { slots, per_worker }
    }

    fn target(word: u64) -> Option<usize> {
        match word & POINTER_MASK {
            0 => None,
            n => Some(usize::try_from(n - 1).unwrap()),
        }
    }

    /// `(pred, observed word, existing)`
    fn find(&self, key: i64) -> (usize, u64, Option<usize>) {
        let mut pred: usize = 0;
        loop {
            let observed: u64 = self.slots[pred].next.load(Ordering::Acquire);
            let Some(next) = Self::target(observed) else {
                return (pred, observed, None);
            };

            let next_key: i64 = self.slots[next].key.load(Ordering::Relaxed);
            if next_key < key {
                pred = next;
            } else if next_key == key {
                return (pred, observed, Some(next));
            } else {
                return (pred, observed, None);
            }
        }
    }

    fn lock_version(&self, node: usize) -> u64 {
        loop {
            let current: u64 = self.slots[node].next.load(Ordering::Relaxed);
            if current & (1 << VERSION_SHIFT) != 0 {
                thread::yield_now();
                continue;
            }
            let locked: u64 = current + (1 << VERSION_SHIFT);
            if self.slots[node]
                .next
                .compare_exchange(current, locked, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return (locked & VERSION_MASK) >> VERSION_SHIFT;
            }
        }
    }

    fn unlock_version(&self, node: usize, locked: u64) {
        let released: u64 = ((locked + 1) & VERSION_MAX) << VERSION_SHIFT;
        let _ = self.slots[node]
            .next
            .fetch_update(Ordering::Release, Ordering::Relaxed, |word| {
                Some((word & !VERSION_MASK) | released)
            });
    }

    /// Insert or overwrite. `used` counts the worker's consumed slots.
    fn put(&self, worker: usize, used: &mut usize, pending: &mut Option<usize>, key: i64, value: u64) {
        loop {
            let (pred, observed, existing) = self.find(key);

            if let Some(node) = existing {
                let locked: u64 = self.lock_version(node);
                self.slots[node].value.store(value, Ordering::Relaxed);
                self.unlock_version(node, locked);
                return;
            }

            let node: usize = *pending.get_or_insert_with(|| {
                let slot: usize = 1 + worker * self.per_worker + *used;
                *used += 1;
                slot
            });

            let slot: &Slot = &self.slots[node];
            slot.key.store(key, Ordering::Relaxed);
            slot.value.store(value, Ordering::Relaxed);
            slot.next.store(observed & POINTER_MASK, Ordering::Relaxed);
            slot.persisted.store(true, Ordering::Release);

            let linked: u64 = (observed & !POINTER_MASK) | (node as u64 + 1);
            if self.slots[pred]
                .next
                .compare_exchange(observed, linked, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                *pending = None;
                return;
            }
        }
    }

    fn read_value(&self, node: usize) -> u64 {
        loop {
            let before: u64 = self.slots[node].next.load(Ordering::Acquire);
            if before & (1 << VERSION_SHIFT) != 0 {
                thread::yield_now();
                continue;
            }
            let value: u64 = self.slots[node].value.load(Ordering::Acquire);
            let after: u64 = self.slots[node].next.load(Ordering::Acquire);
            if (before ^ after) & VERSION_MASK == 0 {
                return value;
            }
        }
    }

    /// Reachable `(key, value)` pairs, checking content and order on the way.
    fn snapshot(&self) -> Vec<(i64, u64)> {
        let mut out: Vec<(i64, u64)> = Vec::new();
        let mut word: u64 = self.slots[0].next.load(Ordering::Acquire);

        while let Some(node) = Self::target(word) {
            assert!(
                self.slots[node].persisted.load(Ordering::Acquire),
                "reachable node {node} was never persisted"
            );
            let key: i64 = self.slots[node].key.load(Ordering::Relaxed);
            if let Some(&(prev, _)) = out.last() {
                assert!(prev < key, "list out of order: {prev} then {key}");
            }
            out.push((key, self.read_value(node)));
            word = self.slots[node].next.load(Ordering::Acquire);
        }

        out
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[test]
fn shuttle_concurrent_splices_stay_sorted() {
    shuttle::check_random(
        || {
            let list = Arc::new(ModelList::new(2, 4));

            let handles: Vec<_> = [[30_i64, 10, 20], [25, 15, 35]]
                .into_iter()
                .enumerate()
                .map(|(worker, keys)| {
                    let list = Arc::clone(&list);
                    thread::spawn(move || {
                        let mut used: usize = 0;
                        let mut pending: Option<usize> = None;
                        for key in keys {
                            list.put(worker, &mut used, &mut pending, key, key.unsigned_abs());
                        }
                    })
                })
                .collect();

            let observer = {
                let list = Arc::clone(&list);
                thread::spawn(move || {
                    for _ in 0..3 {
                        let _ = list.snapshot();
                    }
                })
            };

            for h in handles {
                h.join().unwrap();
            }
            observer.join().unwrap();

            let keys: Vec<i64> = list.snapshot().into_iter().map(|(k, _)| k).collect();
            assert_eq!(keys, vec![10, 15, 20, 25, 30, 35]);
        },
        ITERATIONS,
    );
}

#[test]
fn shuttle_same_key_links_once() {
    shuttle::check_random(
        || {
            let list = Arc::new(ModelList::new(2, 2));

            let handles: Vec<_> = (0..2)
                .map(|worker| {
                    let list = Arc::clone(&list);
                    thread::spawn(move || {
                        let mut used: usize = 0;
                        let mut pending: Option<usize> = None;
                        list.put(worker, &mut used, &mut pending, 7, worker as u64 + 1);
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }

            let snapshot = list.snapshot();
            assert_eq!(snapshot.len(), 1);
            assert_eq!(snapshot[0].0, 7);
            assert!(matches!(snapshot[0].1, 1 | 2));
        },
        ITERATIONS,
    );
}

#[test]
fn shuttle_update_during_splice_keeps_link() {
    shuttle::check_random(
        || {
            let list = Arc::new(ModelList::new(2, 2));
            {
                let mut used: usize = 0;
                let mut pending: Option<usize> = None;
                list.put(0, &mut used, &mut pending, 10, 1);
            }

            // Worker 0 overwrites 10 while worker 1 splices after it.
            let updater = {
                let list = Arc::clone(&list);
                thread::spawn(move || {
                    let mut used: usize = 1;
                    let mut pending: Option<usize> = None;
                    list.put(0, &mut used, &mut pending, 10, 2);
                })
            };
            let splicer = {
                let list = Arc::clone(&list);
                thread::spawn(move || {
                    let mut used: usize = 0;
                    let mut pending: Option<usize> = None;
                    list.put(1, &mut used, &mut pending, 20, 20);
                })
            };

            updater.join().unwrap();
            splicer.join().unwrap();

            assert_eq!(list.snapshot(), vec![(10, 2), (20, 20)]);

            let word: u64 = list.slots[1].next.load(Ordering::Relaxed);
            assert_eq!(word & DELETED_BIT, 0);
            assert_eq!((word & VERSION_MASK) >> VERSION_SHIFT, 2);
        },
        ITERATIONS,
    );
}
