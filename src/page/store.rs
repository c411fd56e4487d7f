//! Structural insert: the only path that changes a page's entries.
//!
//! [`Page::store`] inserts one key into the page that owns it. When the page
//! is full it splits: the upper half moves into a new right sibling, and
//! the separator goes to the parent (or into a new root).
//!
//! # Lock discipline
//!
//! A store holds the mutex of the page it is working on. Following a
//! sibling drops that guard first. During a split the new sibling's mutex
//! is taken while the left page is still held, always left to right, and
//! both are released before the separator is propagated upwards.

use std::hint;
use std::ptr;

use parking_lot::MutexGuard;

use super::{CARDINALITY, Page};
use crate::ordering::{RELAXED, WRITE_ORD};
use crate::tracing_helpers::{debug_log, trace_log};
use crate::tree::UTree;

/// Whether [`Page::store`] takes page mutexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    /// Normal concurrent operation.
    Locked,

    /// The caller has exclusive access to the whole tree.
    #[cfg(test)]
    Unlocked,
}

/// What a store did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreOutcome {
    /// A new entry was added to `page` (possibly after a split).
    Inserted {
        /// Page that received the entry.
        page: *const Page,
        /// In-page (or left-neighbour) predecessor pointer.
        pred: Option<*mut u8>,
    },

    /// The key was present; its pointer was swapped.
    Replaced {
        /// Pointer the entry held before.
        previous: *mut u8,
    },

    /// The page is tombstoned. Re-descend and retry.
    Deleted,
}

impl Page {
    /// Insert `key -> ptr` into this page or the right sibling that owns it.
    ///
    /// `invalid_sibling` is never followed.
    pub(crate) fn store(
        &self,
        tree: &UTree,
        key: i64,
        ptr: *mut u8,
        mode: LockMode,
        invalid_sibling: Option<*const Self>,
    ) -> StoreOutcome {
        let mut page: &Self = self;

        loop {
            let guard: Option<MutexGuard<'_, ()>> = match mode {
                LockMode::Locked => Some(page.hdr.mutex.lock()),
                #[cfg(test)]
                LockMode::Unlocked => None,
            };

            if page.is_deleted() {
                return StoreOutcome::Deleted;
            }

            let mut num_entries: usize = page.count();

            if let Some(entry) = page.records[..num_entries]
                .iter()
                .find(|entry| entry.key() == key)
            {
                let previous: *mut u8 = entry.ptr.swap(ptr, WRITE_ORD);
                return StoreOutcome::Replaced { previous };
            }

            // Same first-key rule as the optimistic search: a key between an
            // internal sibling's separator and its first entry stays here.
            let sibling: *mut Self = page.sibling();
            // SAFETY: pages are freed only when the tree drops.
            if let Some(next) = unsafe { sibling.as_ref() } {
                if invalid_sibling != Some(sibling.cast_const()) && next.first_key() < key {
                    trace_log!(key, level = page.level(), "store moved right");
                    tree.counters().record_redirect();
                    drop(guard);
                    page = next;
                    hint::spin_loop();
                    continue;
                }
            }

            if num_entries < CARDINALITY - 1 {
                let pred: Option<*mut u8> = page.insert_key(key, ptr, &mut num_entries);
                return StoreOutcome::Inserted {
                    page: ptr::from_ref(page),
                    pred,
                };
            }

            return page.split(tree, key, ptr, num_entries, mode, guard);
        }
    }

    /// Split a full page and insert `key` into whichever half owns it.
    ///
    /// Consumes the page guard: a root split releases it after installing
    /// the new root, any other split releases it before propagating.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(key = key, level = self.level(), num_entries = num_entries))
    )]
    fn split(
        &self,
        tree: &UTree,
        key: i64,
        ptr: *mut u8,
        num_entries: usize,
        mode: LockMode,
        guard: Option<MutexGuard<'_, ()>>,
    ) -> StoreOutcome {
        let m: usize = num_entries / 2;
        let split_key: i64 = self.records[m].key();

        // Build the right half off to the side.
        let sibling: Box<Self> = Self::new(self.level());
        let mut sibling_count: usize = 0;

        if self.is_leaf() {
            for entry in &self.records[m..num_entries] {
                sibling.insert_key(entry.key(), entry.ptr(), &mut sibling_count);
            }
        } else {
            for entry in &self.records[m + 1..num_entries] {
                sibling.insert_key(entry.key(), entry.ptr(), &mut sibling_count);
            }
            sibling
                .hdr
                .leftmost_ptr
                .store(self.records[m].ptr().cast(), RELAXED);
        }

        let right_neighbour: *mut Self = self.sibling();
        sibling.hdr.sibling_ptr.store(right_neighbour, RELAXED);
        sibling
            .hdr
            .pred_ptr
            .store(ptr::from_ref(self).cast_mut(), RELAXED);

        let sibling: *mut Self = Box::into_raw(sibling);

        // SAFETY: pages are freed only when the tree drops.
        if let Some(neighbour) = unsafe { right_neighbour.as_ref() } {
            neighbour.hdr.pred_ptr.store(sibling, WRITE_ORD);
        }

        // Publish, then cut the moved entries off this page.
        self.hdr.sibling_ptr.store(sibling, WRITE_ORD);
        {
            let _section = self.hdr.switch_counter.begin_write();
            self.records[m].ptr.store(ptr::null_mut(), WRITE_ORD);
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            self.hdr.last_index.store(m as i16 - 1, WRITE_ORD);
        }

        // SAFETY: just published, never freed before the tree.
        let sibling_ref: &Self = unsafe { &*sibling };

        let (target, pred): (&Self, Option<*mut u8>) = if key < split_key {
            let mut count: usize = m;
            (self, self.insert_key(key, ptr, &mut count))
        } else {
            let _sibling_guard = match mode {
                LockMode::Locked => Some(sibling_ref.hdr.mutex.lock()),
                #[cfg(test)]
                LockMode::Unlocked => None,
            };
            let mut count: usize = sibling_ref.count();
            (sibling_ref, sibling_ref.insert_key(key, ptr, &mut count))
        };

        tree.counters().record_split();

        if ptr::eq(tree.root_ptr(), self) {
            let new_root: Box<Self> = Self::new_root(
                ptr::from_ref(self).cast_mut(),
                split_key,
                sibling,
                self.level() + 1,
            );
            tree.set_new_root(Box::into_raw(new_root));
            debug_log!(split_key, height = tree.height(), "root split");
            drop(guard);
        } else {
            drop(guard);
            debug_log!(split_key, level = self.level(), "page split");
            tree.insert_internal(split_key, sibling, self.level() + 1);
        }

        StoreOutcome::Inserted {
            page: ptr::from_ref(target),
            pred,
        }
    }
}
