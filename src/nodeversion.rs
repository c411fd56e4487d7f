//! Filepath: src/nodeversion.rs
//!
//! Optimistic read-validate-retry for pages and list nodes.
//!
//! Both pages and list nodes carry a generation counter whose low bit means
//! "a writer is inside". Readers never block on it:
//!
//! 1. Snapshot the counter with [`Versioned::begin_read`].
//! 2. Read whatever they need.
//! 3. Accept the result only if [`Versioned::validate`] says the snapshot
//!    was even and the counter has not moved since.
//!
//! [`read_validated`] is that loop. Page scans and list-node value reads
//! both go through it.
//!
//! # Page switch counter
//!
//! [`SwitchCounter`] is the page flavour. A page writer (already holding the
//! page mutex) calls [`SwitchCounter::begin_write`], which makes the counter
//! odd; dropping the returned [`WriteGuard`] makes it even again. Each write
//! section therefore advances the counter by two, so a reader that started
//! before, or during, the write always sees a different value when it
//! validates.
//!
//! ```rust,ignore
//! let _guard = page.switch_counter.begin_write();
//! // shift entries
//! // counter back to even when the guard drops
//! ```

use std::hint;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, fence};

use crate::ordering::{RELAXED, UNLOCK_ORD, VERSION_ORD, WRITE_ORD};

// ============================================================================
//  Versioned
// ============================================================================

/// Something readable under optimistic validation.
pub trait Versioned {
    /// Take a snapshot of the generation counter.
    ///
    /// The snapshot may be odd. An odd snapshot never validates, but its
    /// parity is still available to the read closure.
    fn begin_read(&self) -> u64;

    /// True if nothing was written since `snapshot` was taken and no writer
    /// was active at that time.
    fn validate(&self, snapshot: u64) -> bool;
}

/// Run `read` until it completes without a concurrent write.
///
/// `read` receives the snapshot it runs under, so callers can choose a scan
/// strategy from it. It may run any number of times and must not have side
/// effects beyond its return value.
#[inline]
pub fn read_validated<V, T, F>(source: &V, mut read: F) -> T
where
    V: Versioned + ?Sized,
    F: FnMut(u64) -> T,
{
    loop {
        let snapshot: u64 = source.begin_read();
        let out: T = read(snapshot);

        if source.validate(snapshot) {
            return out;
        }

        hint::spin_loop();
    }
}

// ============================================================================
//  SwitchCounter
// ============================================================================

/// Direction a page scan runs in, chosen from the counter parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// From slot 0 upwards. Used when the counter is even (page at rest).
    Forward,

    /// From the last known slot downwards. Used when a writer was active.
    Backward,
}

impl ScanDirection {
    /// Direction implied by a counter snapshot.
    #[inline(always)]
    #[must_use]
    pub const fn from_snapshot(snapshot: u64) -> Self {
        if snapshot & 1 == 0 {
            Self::Forward
        } else {
            Self::Backward
        }
    }
}

/// Per-page write generation.
#[derive(Debug, Default)]
pub struct SwitchCounter {
    value: AtomicU8,
}

impl SwitchCounter {
    /// A counter at rest.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU8::new(0),
        }
    }

    /// Current raw value.
    #[inline]
    #[must_use]
    pub fn load(&self) -> u8 {
        self.value.load(VERSION_ORD)
    }

    /// True while a write section is open.
    #[inline]
    #[must_use]
    pub fn is_writing(&self) -> bool {
        self.load() & 1 == 1
    }

    /// Open a write section.
    ///
    /// The caller must hold the page mutex: only one write section may be
    /// open on a counter at a time.
    #[inline]
    pub fn begin_write(&self) -> WriteGuard<'_> {
        let current: u8 = self.value.load(RELAXED);
        debug_assert!(current & 1 == 0, "nested write section");

        let locked: u8 = current.wrapping_add(1);
        self.value.store(locked, RELAXED);
        // Entry stores below must not become visible before the odd value.
        fence(WRITE_ORD);

        WriteGuard {
            counter: self,
            locked,
            _marker: PhantomData,
        }
    }
}

impl Versioned for SwitchCounter {
    #[inline]
    fn begin_read(&self) -> u64 {
        u64::from(self.value.load(VERSION_ORD))
    }

    #[inline]
    fn validate(&self, snapshot: u64) -> bool {
        fence(VERSION_ORD);
        snapshot & 1 == 0 && u64::from(self.value.load(RELAXED)) == snapshot
    }
}

/// Proof that a write section is open on a [`SwitchCounter`].
///
/// Dropping it closes the section, even during unwinding.
#[derive(Debug)]
#[must_use = "dropping the guard closes the write section immediately"]
pub struct WriteGuard<'a> {
    counter: &'a SwitchCounter,
    locked: u8,

    // Write sections never cross threads.
    _marker: PhantomData<*mut ()>,
}

impl WriteGuard<'_> {
    /// The odd value the counter holds while this guard lives.
    #[inline]
    #[must_use]
    pub const fn locked_value(&self) -> u8 {
        self.locked
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.counter
            .value
            .store(self.locked.wrapping_add(1), UNLOCK_ORD);
    }
}


#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_write_section_advances_by_two() {
        let counter = SwitchCounter::new();
        let before: u64 = counter.begin_read();

        {
            let guard = counter.begin_write();
            assert!(counter.is_writing());
            assert_eq!(guard.locked_value(), 1);
        }

        assert!(!counter.is_writing());
        assert_eq!(counter.load(), 2);
        assert!(!counter.validate(before));
    }

    #[test]
    fn test_snapshot_during_write_never_validates() {
        let counter = SwitchCounter::new();
        let guard = counter.begin_write();

        let snapshot: u64 = counter.begin_read();
        assert!(!counter.validate(snapshot));
        assert_eq!(ScanDirection::from_snapshot(snapshot), ScanDirection::Backward);

        drop(guard);
        let snapshot: u64 = counter.begin_read();
        assert!(counter.validate(snapshot));
        assert_eq!(ScanDirection::from_snapshot(snapshot), ScanDirection::Forward);
    }

    #[test]
    fn test_counter_wraps() {
        let counter = SwitchCounter::new();
        for _ in 0..128 {
            let _guard = counter.begin_write();
        }

        assert_eq!(counter.load(), 0);
    }

    #[test]
    fn test_read_validated_retries_after_write() {
        let counter = SwitchCounter::new();
        let calls: Cell<u32> = Cell::new(0);

        let out: u32 = read_validated(&counter, |_| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                // A write lands in the middle of the first read.
                let _guard = counter.begin_write();
            }
            calls.get()
        });

        assert_eq!(out, 2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_read_validated_passes_snapshot() {
        let counter = SwitchCounter::new();
        drop(counter.begin_write());

        let seen: u64 = read_validated(&counter, |snapshot| snapshot);
        assert_eq!(seen, 2);
    }
}
