//! Memory orderings shared by pages, list nodes and the tree root.
//!
//! Pages are read optimistically and written under their mutex, list links
//! are published by CAS. Naming the orderings once keeps each access site
//! honest about which side of a pairing it is on.

use std::sync::atomic::Ordering;

/// Loads of page entries, header pointers and list links during optimistic
/// traversal. Pairs with [`WRITE_ORD`].
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Stores of page entries and header pointers by the page's writer.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Successful CAS on a list link or a version word.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Failed CAS: only the current value is needed.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Accesses already ordered by a lock, a fence or an unpublished owner.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Switch-counter and version snapshots taken by readers.
pub const VERSION_ORD: Ordering = Ordering::Acquire;

/// The store that ends a write section (counter back to even, version
/// released). Must be visible to validating readers.
pub const UNLOCK_ORD: Ordering = Ordering::Release;
