//! Filepath: src/page.rs
//!
//! Index page: one node of the volatile B+tree.
//!
//! Internal pages route keys to child pages; leaf pages map keys to list
//! nodes. Both share this one representation, told apart by `leftmost_ptr`
//! (null for leaves).
//!
//! # Layout
//!
//! ```text
//! | Header (40 B) | records[0] | records[1] | ... | records[CARDINALITY-1] |
//! ```
//!
//! The live entries are a sorted, null-terminated prefix of `records`. A page
//! holds at most `CARDINALITY - 1` of them, so the terminator slot always
//! exists.
//!
//! # Concurrency
//!
//! Structural writes happen under `hdr.mutex` inside a switch-counter write
//! section. Reads take no lock and go through
//! [`read_validated`](crate::nodeversion::read_validated).

mod search;
mod store;

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicI64, AtomicPtr};

use parking_lot::Mutex;

use crate::list::ListNode;
use crate::nodeversion::{ScanDirection, SwitchCounter, read_validated};
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};

pub(crate) use search::Lookup;
pub(crate) use store::{LockMode, StoreOutcome};

/// Bytes of header plus entries a page is sized to.
pub(crate) const PAGE_SIZE: usize = 520;

/// Entry slots per page.
pub(crate) const CARDINALITY: usize = (PAGE_SIZE - size_of::<Header>()) / size_of::<Entry>();

const _: () = assert!(CARDINALITY >= 4);

// ============================================================================
//  Entry / Header
// ============================================================================

/// Key plus child page (internal) or list node (leaf).
#[repr(C)]
pub(crate) struct Entry {
    key: AtomicI64,
    ptr: AtomicPtr<u8>,
}

impl Entry {
    const fn empty() -> Self {
        Self {
            key: AtomicI64::new(i64::MAX),
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline(always)]
    fn key(&self) -> i64 {
        self.key.load(READ_ORD)
    }

    #[inline(always)]
    fn ptr(&self) -> *mut u8 {
        self.ptr.load(READ_ORD)
    }
}

#[repr(C)]
pub(crate) struct Header {
    leftmost_ptr: AtomicPtr<Page>,
    sibling_ptr: AtomicPtr<Page>,
    pred_ptr: AtomicPtr<Page>,
    level: u32,
    switch_counter: SwitchCounter,
    is_deleted: AtomicBool,
    last_index: AtomicI16,
    mutex: Mutex<()>,
}

impl Header {
    const fn new(level: u32) -> Self {
        Self {
            leftmost_ptr: AtomicPtr::new(ptr::null_mut()),
            sibling_ptr: AtomicPtr::new(ptr::null_mut()),
            pred_ptr: AtomicPtr::new(ptr::null_mut()),
            level,
            switch_counter: SwitchCounter::new(),
            is_deleted: AtomicBool::new(false),
            last_index: AtomicI16::new(-1),
            mutex: Mutex::new(()),
        }
    }
}

// ============================================================================
//  Page
// ============================================================================

#[repr(C, align(64))]
pub(crate) struct Page {
    hdr: Header,
    records: [Entry; CARDINALITY],
}

impl Page {
    /// An empty page at `level` (0 = leaf level).
    pub(crate) fn new(level: u32) -> Box<Self> {
        Box::new(Self {
            hdr: Header::new(level),
            records: [const { Entry::empty() }; CARDINALITY],
        })
    }

    /// A root over `left` and `right`, split at `key`.
    pub(crate) fn new_root(left: *mut Self, key: i64, right: *mut Self, level: u32) -> Box<Self> {
        let root = Self::new(level);
        root.hdr.leftmost_ptr.store(left, RELAXED);
        root.records[0].key.store(key, RELAXED);
        root.records[0].ptr.store(right.cast(), RELAXED);
        root.hdr.last_index.store(0, RELAXED);
        root
    }

    #[inline(always)]
    pub(crate) const fn level(&self) -> u32 {
        self.hdr.level
    }

    #[inline(always)]
    pub(crate) fn is_leaf(&self) -> bool {
        self.hdr.leftmost_ptr.load(READ_ORD).is_null()
    }

    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.hdr.is_deleted.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn leftmost(&self) -> *mut Self {
        self.hdr.leftmost_ptr.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn sibling(&self) -> *mut Self {
        self.hdr.sibling_ptr.load(READ_ORD)
    }

    #[cfg(test)]
    pub(crate) fn mark_deleted(&self) {
        let _lock = self.hdr.mutex.lock();
        self.hdr.is_deleted.store(true, WRITE_ORD);
    }

    /// Live entry count.
    ///
    /// Scans from `last_index + 1` in the direction the counter parity
    /// gives. A backward scan that runs off the front rescans forward from
    /// slot 0.
    ///
    /// An odd snapshot never validates, so a backward scan only runs as an
    /// attempt that [`read_validated`] discards and retries. The count it
    /// returns always comes from a forward scan over a stable page.
    pub(crate) fn count(&self) -> usize {
        read_validated(&self.hdr.switch_counter, |snapshot| self.scan_count(snapshot))
    }

    fn scan_count(&self, snapshot: u64) -> usize {
        let live = |i: isize| -> bool {
            usize::try_from(i)
                .ok()
                .filter(|&i| i < CARDINALITY)
                .is_some_and(|i| !self.records[i].ptr().is_null())
        };

        let mut count: isize = isize::from(self.hdr.last_index.load(READ_ORD)) + 1;

        match ScanDirection::from_snapshot(snapshot) {
            ScanDirection::Forward => {
                while live(count) {
                    count += 1;
                }
            }
            ScanDirection::Backward => {
                while count >= 0 && live(count) {
                    count -= 1;
                }
                if count < 0 {
                    count = 0;
                    while live(count) {
                        count += 1;
                    }
                }
            }
        }

        usize::try_from(count).unwrap_or(0)
    }

    /// First key, or `i64::MAX` for an empty page.
    #[inline]
    pub(crate) fn first_key(&self) -> i64 {
        read_validated(&self.hdr.switch_counter, |_| self.records[0].key())
    }

    /// Pointer of the last live entry.
    pub(crate) fn last_ptr(&self) -> Option<*mut u8> {
        read_validated(&self.hdr.switch_counter, |snapshot| {
            match self.scan_count(snapshot) {
                0 => None,
                n => Some(self.records[n - 1].ptr()),
            }
        })
    }

    /// Last entry of the left neighbour: the predecessor of anything that
    /// lands at slot 0 here.
    fn pred_page_last(&self) -> Option<*mut u8> {
        // SAFETY: pages are freed only when the tree drops.
        unsafe { self.hdr.pred_ptr.load(READ_ORD).as_ref() }.and_then(Self::last_ptr)
    }

    /// Insert into a page with room, append-then-fix.
    ///
    /// Returns the in-page predecessor pointer of the new entry, or the
    /// left neighbour's last pointer when the entry lands at slot 0.
    ///
    /// The caller holds the page mutex (or owns an unpublished page) and
    /// guarantees `*num_entries < CARDINALITY - 1`.
    pub(crate) fn insert_key(
        &self,
        key: i64,
        ptr: *mut u8,
        num_entries: &mut usize,
    ) -> Option<*mut u8> {
        let n: usize = *num_entries;
        debug_assert!(n < CARDINALITY - 1, "insert_key on a full page");

        let _section = self.hdr.switch_counter.begin_write();
        let records = &self.records;
        let mut pred: Option<*mut u8> = None;

        if n == 0 {
            records[0].key.store(key, WRITE_ORD);
            records[0].ptr.store(ptr, WRITE_ORD);
            records[1].ptr.store(ptr::null_mut(), WRITE_ORD);
            pred = self.pred_page_last();
        } else {
            // Move the terminator first.
            records[n + 1].ptr.store(records[n].ptr(), WRITE_ORD);

            let mut inserted: bool = false;
            for i in (0..n).rev() {
                let shifted: *mut u8 = records[i].ptr();
                records[i + 1].ptr.store(shifted, WRITE_ORD);

                if key < records[i].key() {
                    records[i + 1].key.store(records[i].key(), WRITE_ORD);
                } else {
                    records[i + 1].key.store(key, WRITE_ORD);
                    records[i + 1].ptr.store(ptr, WRITE_ORD);
                    pred = Some(shifted);
                    inserted = true;
                    break;
                }
            }

            if !inserted {
                records[0].ptr.store(self.leftmost().cast(), WRITE_ORD);
                records[0].key.store(key, WRITE_ORD);
                records[0].ptr.store(ptr, WRITE_ORD);
                pred = self.pred_page_last();
            }
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        self.hdr.last_index.store(n as i16, WRITE_ORD);
        *num_entries = n + 1;

        pred
    }

    /// Keys and pointers of the live prefix. Test helper.
    #[cfg(test)]
    pub(crate) fn entries(&self) -> Vec<(i64, *mut u8)> {
        read_validated(&self.hdr.switch_counter, |snapshot| {
            (0..self.scan_count(snapshot))
                .map(|i| (self.records[i].key(), self.records[i].ptr()))
                .collect()
        })
    }
}

/// Treat a leaf entry pointer as a list node.
///
/// # Safety
///
/// `ptr` must come from a leaf entry (or be null). Leaf entries only ever
/// hold list nodes, which live as long as the pool.
#[inline]
pub(crate) unsafe fn as_node<'a>(ptr: *mut u8) -> Option<&'a ListNode> {
    // SAFETY: guaranteed by the caller.
    unsafe { ptr.cast::<ListNode>().as_ref() }
}
