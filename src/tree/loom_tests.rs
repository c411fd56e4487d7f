//! Loom tests for the successor-word protocol.
//!
//! Loom explores every interleaving of small models, so each test keeps to
//! two threads and a handful of atomic operations.
//!
//! Run with: `RUSTFLAGS="--cfg loom" cargo test --lib tree::loom_tests`

use loom::sync::Arc;
use loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use loom::thread;

use crate::link::{POINTER_MASK, VERSION_MASK, VERSION_MAX, VERSION_SHIFT};

const LOCKED: u64 = 1 << VERSION_SHIFT;

/// Successor word plus the content of the node it may point at.
struct Cell {
    next: AtomicU64,
    value: AtomicU64,
    persisted: AtomicBool,
}

impl Cell {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            value: AtomicU64::new(0),
            persisted: AtomicBool::new(false),
        }
    }

    fn try_lock(&self) -> Option<u64> {
        let current: u64 = self.next.load(Ordering::Relaxed);
        if current & LOCKED != 0 {
            return None;
        }
        self.next
            .compare_exchange(current, current + LOCKED, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|w| ((w + LOCKED) & VERSION_MASK) >> VERSION_SHIFT)
    }

    fn unlock(&self, locked: u64) {
        let released: u64 = ((locked + 1) & VERSION_MAX) << VERSION_SHIFT;
        let _ = self
            .next
            .fetch_update(Ordering::Release, Ordering::Relaxed, |w| {
                Some((w & !VERSION_MASK) | released)
            });
    }

    /// Swap the pointer bits from `observed`, keeping the tag bits.
    fn splice(&self, observed: u64, target: u64) -> bool {
        self.next
            .compare_exchange(
                observed,
                (observed & !POINTER_MASK) | target,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[test]
fn loom_release_keeps_concurrent_splice() {
    loom::model(|| {
        let pred = Arc::new(Cell::new());

        let locker = {
            let pred = Arc::clone(&pred);
            thread::spawn(move || {
                if let Some(locked) = pred.try_lock() {
                    pred.value.store(9, Ordering::Relaxed);
                    pred.unlock(locked);
                }
            })
        };

        let splicer = {
            let pred = Arc::clone(&pred);
            thread::spawn(move || {
                loop {
                    let observed: u64 = pred.next.load(Ordering::Acquire);
                    if pred.splice(observed, 1) {
                        break;
                    }
                }
            })
        };

        locker.join().unwrap();
        splicer.join().unwrap();

        let word: u64 = pred.next.load(Ordering::Relaxed);
        assert_eq!(word & POINTER_MASK, 1, "splice lost by version release");
        assert_eq!(word & LOCKED, 0, "version left locked");
    });
}

#[test]
fn loom_reachable_node_is_persisted() {
    loom::model(|| {
        let head = Arc::new(Cell::new());
        let node = Arc::new(Cell::new());

        let writer = {
            let head = Arc::clone(&head);
            let node = Arc::clone(&node);
            thread::spawn(move || {
                node.value.store(42, Ordering::Relaxed);
                node.persisted.store(true, Ordering::Release);
                let observed: u64 = head.next.load(Ordering::Acquire);
                assert!(head.splice(observed, 1));
            })
        };

        let reader = {
            let head = Arc::clone(&head);
            let node = Arc::clone(&node);
            thread::spawn(move || {
                if head.next.load(Ordering::Acquire) & POINTER_MASK == 1 {
                    assert!(node.persisted.load(Ordering::Acquire));
                    assert_eq!(node.value.load(Ordering::Relaxed), 42);
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    });
}

#[test]
fn loom_validated_read_sees_whole_write() {
    loom::model(|| {
        let cell = Arc::new(Cell::new());

        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                let locked = cell.try_lock().unwrap();
                cell.value.store(7, Ordering::Relaxed);
                cell.unlock(locked);
            })
        };

        let before: u64 = cell.next.load(Ordering::Acquire);
        let value: u64 = cell.value.load(Ordering::Acquire);
        let after: u64 = cell.next.load(Ordering::Acquire);

        if before & LOCKED == 0 && (before ^ after) & VERSION_MASK == 0 {
            let version: u64 = (before & VERSION_MASK) >> VERSION_SHIFT;
            match version {
                0 => assert!(value == 0 || value == 7),
                2 => assert_eq!(value, 7),
                other => panic!("unexpected version {other}"),
            }
        }

        writer.join().unwrap();
    });
}
