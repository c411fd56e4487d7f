//! Durable list node.
//!
//! The only record whose layout must survive a crash:
//!
//! ```text
//! offset  0: value  u64   (0 = absent)
//! offset  8: key    i64
//! offset 16: size   u64   (reserved, zero)
//! offset 24: next   u64   (tagged, see `link`)
//! ```
//!
//! Nodes are 32 bytes and 32-byte aligned, so one flush of one cache line
//! always covers a whole node.

use std::hint;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, fence};

use crate::link::TaggedNext;
use crate::nodeversion::{Versioned, read_validated};
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, UNLOCK_ORD, VERSION_ORD, WRITE_ORD};

/// A key/value record in the durable list.
#[repr(C, align(32))]
pub struct ListNode {
    value: AtomicU64,
    key: i64,
    size: u64,
    next: AtomicU64,
}

const _: () = assert!(size_of::<ListNode>() == 32);

impl ListNode {
    /// Write a fresh, unlinked node into `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes of `size_of::<ListNode>()` bytes,
    /// aligned to `align_of::<ListNode>()`, and not reachable by any other
    /// thread yet.
    pub(crate) unsafe fn init(
        slot: NonNull<u8>,
        key: i64,
        value: u64,
        next: TaggedNext,
    ) -> NonNull<Self> {
        let node: NonNull<Self> = slot.cast();
        debug_assert!(node.is_aligned());

        // SAFETY: guaranteed by the caller.
        unsafe {
            node.write(Self {
                value: AtomicU64::new(value),
                key,
                size: 0,
                next: AtomicU64::new(next.raw()),
            });
        }
        node
    }

    /// A node outside any arena.
    #[cfg(test)]
    pub(crate) const fn detached(key: i64, value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
            key,
            size: 0,
            next: AtomicU64::new(0),
        }
    }

    /// Key. Immutable once linked.
    #[inline(always)]
    #[must_use]
    pub const fn key(&self) -> i64 {
        self.key
    }

    /// Current value, read under the version protocol.
    #[inline]
    #[must_use]
    pub fn value(&self) -> u64 {
        read_validated(self, |_| self.value.load(RELAXED))
    }

    /// Reserved size field. Always zero.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Current successor word.
    #[inline(always)]
    #[must_use]
    pub fn next(&self) -> TaggedNext {
        TaggedNext::from_raw(self.next.load(READ_ORD))
    }

    /// Successor node, if any.
    #[inline]
    #[must_use]
    pub fn successor(&self) -> Option<&Self> {
        // SAFETY: linked nodes are never freed while the region is mapped,
        // and `&self` borrows from the region.
        unsafe { self.next().pointer().as_ref() }
    }

    /// Overwrite the successor of a node nobody else can see yet.
    #[inline]
    pub(crate) fn reset_next(&self, next: TaggedNext) {
        self.next.store(next.raw(), RELAXED);
    }

    /// Replace the successor word if it still equals `current`.
    ///
    /// # Errors
    ///
    /// The word actually found.
    #[inline]
    pub(crate) fn cas_next(
        &self,
        current: TaggedNext,
        new: TaggedNext,
    ) -> Result<(), TaggedNext> {
        self.next
            .compare_exchange(current.raw(), new.raw(), CAS_SUCCESS, CAS_FAILURE)
            .map(|_| ())
            .map_err(TaggedNext::from_raw)
    }

    /// Take the value lock. Spins while another writer holds it.
    pub(crate) fn acquire_version_lock(&self) -> VersionLock<'_> {
        loop {
            let current: TaggedNext = self.next();
            if current.is_locked() {
                hint::spin_loop();
                continue;
            }

            let locked: TaggedNext = current.with_version(current.version() + 1);
            if self.cas_next(current, locked).is_ok() {
                // The value store must not pass the odd version.
                fence(WRITE_ORD);
                return VersionLock {
                    node: self,
                    _marker: PhantomData,
                };
            }
        }
    }

    /// Set the tombstone. The node stays linked.
    #[cfg(test)]
    pub(crate) fn mark_deleted(&self) {
        self.next.fetch_or(crate::link::DELETED_BIT, CAS_SUCCESS);
    }

    /// True if the node is tombstoned.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.next().is_deleted()
    }
}

impl Versioned for ListNode {
    #[inline]
    fn begin_read(&self) -> u64 {
        TaggedNext::from_raw(self.next.load(VERSION_ORD)).version()
    }

    #[inline]
    fn validate(&self, snapshot: u64) -> bool {
        fence(VERSION_ORD);
        snapshot & 1 == 0 && TaggedNext::from_raw(self.next.load(RELAXED)).version() == snapshot
    }
}

impl std::fmt::Debug for ListNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListNode")
            .field("key", &self.key)
            .field("value", &self.value.load(RELAXED))
            .field("next", &self.next())
            .finish()
    }
}

/// Exclusive right to change a node's value.
///
/// The version is odd while this lives. Dropping it (or calling
/// [`release_version`](Self::release_version)) moves the version to the
/// next even value.
#[must_use = "dropping the lock releases it immediately"]
pub(crate) struct VersionLock<'a> {
    node: &'a ListNode,
    _marker: PhantomData<*mut ()>,
}

impl VersionLock<'_> {
    /// Overwrite the value.
    #[inline]
    pub(crate) fn store_value(&self, value: u64) {
        self.node.value.store(value, RELAXED);
    }

    /// Publish the new value.
    #[inline]
    pub(crate) fn release_version(self) {
        drop(self);
    }
}

impl Drop for VersionLock<'_> {
    fn drop(&mut self) {
        // A splice may land on this word while we hold it, so only the
        // version bits are touched.
        let _ = self
            .node
            .next
            .fetch_update(UNLOCK_ORD, RELAXED, |raw| {
                let word = TaggedNext::from_raw(raw);
                debug_assert!(word.is_locked());
                Some(word.with_version(word.version() + 1).raw())
            });
    }
}
