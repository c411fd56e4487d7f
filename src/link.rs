//! Tagged successor word for durable list nodes.
//!
//! [`TaggedNext`] packs three things into the `next` field of a list node:
//!
//! | bits    | field                                       |
//! |---------|---------------------------------------------|
//! | 63      | tombstone: the owning node is deleted       |
//! | 48..=62 | version counter, odd while a value writer holds it |
//! | 0..=47  | successor address                           |
//!
//! Only user-space canonical addresses are stored, so 48 bits suffice.
//! Pointers go in with [`expose_provenance`](pointer::expose_provenance) and
//! come back out with [`with_exposed_provenance_mut`].

use std::fmt;
use std::ptr;

use crate::list::node::ListNode;

/// Tombstone bit.
pub const DELETED_BIT: u64 = 1 << 63;

/// First bit of the version field.
pub const VERSION_SHIFT: u32 = 48;

/// Largest version value. Versions wrap within 15 bits.
pub const VERSION_MAX: u64 = 0x7fff;

/// Version field in place.
pub const VERSION_MASK: u64 = VERSION_MAX << VERSION_SHIFT;

/// Successor address field.
pub const POINTER_MASK: u64 = (1 << VERSION_SHIFT) - 1;

/// A decoded-on-demand successor word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaggedNext(u64);

impl TaggedNext {
    /// No successor, version 0, not deleted.
    pub const NULL: Self = Self(0);

    /// Wrap a raw word loaded from a node.
    #[inline(always)]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw word, for storing or CAS.
    #[inline(always)]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// A fresh word pointing at `node`.
    #[inline]
    #[must_use]
    pub fn from_node(node: *const ListNode) -> Self {
        Self::NULL.with_pointer(node)
    }

    /// Successor node, or null.
    #[inline]
    #[must_use]
    pub fn pointer(self) -> *mut ListNode {
        let addr: usize = (self.0 & POINTER_MASK) as usize;
        if addr == 0 {
            return ptr::null_mut();
        }
        ptr::with_exposed_provenance_mut(addr)
    }

    /// True if there is no successor.
    #[inline(always)]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 & POINTER_MASK == 0
    }

    /// Version counter.
    #[inline(always)]
    #[must_use]
    pub const fn version(self) -> u64 {
        (self.0 & VERSION_MASK) >> VERSION_SHIFT
    }

    /// True while a value writer holds the version.
    #[inline(always)]
    #[must_use]
    pub const fn is_locked(self) -> bool {
        self.version() & 1 == 1
    }

    /// True if the owning node is tombstoned.
    #[inline(always)]
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        self.0 & DELETED_BIT != 0
    }

    /// Same word with the version replaced (taken modulo 2^15).
    #[inline(always)]
    #[must_use]
    pub const fn with_version(self, version: u64) -> Self {
        Self((self.0 & !VERSION_MASK) | ((version & VERSION_MAX) << VERSION_SHIFT))
    }

    /// Same word with the successor replaced. Version and tombstone are kept.
    #[inline]
    #[must_use]
    pub fn with_pointer(self, node: *const ListNode) -> Self {
        let addr: u64 = node.expose_provenance() as u64;
        debug_assert_eq!(addr & !POINTER_MASK, 0, "address above 48 bits");
        Self((self.0 & !POINTER_MASK) | (addr & POINTER_MASK))
    }

    /// Same word with the tombstone set.
    #[inline(always)]
    #[must_use]
    pub const fn with_deleted(self) -> Self {
        Self(self.0 | DELETED_BIT)
    }
}

impl fmt::Debug for TaggedNext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedNext")
            .field("pointer", &self.pointer())
            .field("version", &self.version())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
