//! Durable sorted list: the system of record.
//!
//! A singly-linked chain of [`ListNode`]s in strictly increasing key order,
//! rooted at a sentinel head with key `i64::MIN`. Nodes are only ever
//! added, by a single CAS on the predecessor's successor word, and never
//! removed.
//!
//! # Persist ordering
//!
//! ```text
//! write node (key, value, successor)
//! persist(node)              <- node content durable
//! CAS pred.next -> node      <- node reachable
//! persist(pred)              <- link durable
//! ```
//!
//! A crash before the CAS leaves the node unreachable. A crash after it
//! leaves a reachable node whose content was already durable.

pub mod node;

use std::ptr::NonNull;

use crate::alloc::{PmPool, Worker};
use crate::cacheline::prefetch_read;
use crate::error::Result;
use crate::link::TaggedNext;
use crate::tracing_helpers::trace_log;

pub use node::ListNode;

/// Where a key sits in the list.
#[derive(Debug, Clone, Copy)]
pub enum Position<'a> {
    /// A node with the key is linked.
    Existing(&'a ListNode),

    /// The key belongs right after `pred`. `observed` is the successor word
    /// of `pred` the walk saw, the expected value for a splice CAS.
    Gap {
        /// Last node with a smaller key.
        pred: &'a ListNode,
        /// `pred.next` as read during the walk.
        observed: TaggedNext,
    },
}

/// Result of one [`DurableList::insert_or_update`] attempt.
#[derive(Debug, Clone, Copy)]
pub enum Splice<'a> {
    /// The key existed; its value was overwritten.
    Updated(&'a ListNode),

    /// A new node was linked.
    Linked(&'a ListNode),

    /// Lost a CAS race or met a tombstone. Re-resolve and retry.
    Contended,
}

/// The durable sorted list.
pub struct DurableList {
    head: NonNull<ListNode>,

    #[cfg(test)]
    pub(crate) hooks: crate::tree::test_hooks::TestHooks,
}

// SAFETY: the head lives in the pool region and is only accessed through
// atomics after construction.
unsafe impl Send for DurableList {}
// SAFETY: see above.
unsafe impl Sync for DurableList {}

impl std::fmt::Debug for DurableList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableList")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl DurableList {
    /// Allocate and persist the sentinel head from arena 0.
    ///
    /// Must run before any worker registers arena 0.
    ///
    /// # Errors
    ///
    /// [`IndexError::ArenaExhausted`](crate::IndexError::ArenaExhausted) or a
    /// persist failure.
    pub(crate) fn new(pool: &PmPool) -> Result<Self> {
        let slot = pool.allocate_in(0, size_of::<ListNode>(), align_of::<ListNode>())?;

        // SAFETY: fresh, aligned allocation that nothing else can reach.
        let head = unsafe { ListNode::init(slot, i64::MIN, 0, TaggedNext::NULL) };

        // SAFETY: just initialised, lives as long as the pool.
        pool.persist(unsafe { head.as_ref() })?;

        Ok(Self {
            head,
            #[cfg(test)]
            hooks: crate::tree::test_hooks::TestHooks::default(),
        })
    }

    /// The sentinel head.
    #[inline]
    #[must_use]
    pub fn head(&self) -> &ListNode {
        // SAFETY: the head is never freed while the list lives.
        unsafe { self.head.as_ref() }
    }

    /// True if nothing has been linked after the head.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head().next().is_null()
    }

    /// Locate `key`, walking forward from `hint`.
    ///
    /// The walk starts at the head when there is no hint or the hint's key is
    /// not below `key`.
    pub fn find_predecessor_and_successor<'a>(
        &'a self,
        key: i64,
        hint: Option<&'a ListNode>,
    ) -> Position<'a> {
        let mut pred: &ListNode = match hint {
            Some(node) if node.key() < key => node,
            _ => self.head(),
        };

        loop {
            let observed: TaggedNext = pred.next();

            // SAFETY: linked nodes are never freed while the list lives.
            let Some(next) = (unsafe { observed.pointer().as_ref() }) else {
                return Position::Gap { pred, observed };
            };

            if next.key() < key {
                prefetch_read(next.next().pointer());
                pred = next;
                continue;
            }

            if next.key() == key {
                return Position::Existing(next);
            }

            return Position::Gap { pred, observed };
        }
    }

    /// Overwrite the value of a linked node under its version lock.
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn update_value(&self, pool: &PmPool, node: &ListNode, value: u64) -> Result<()> {
        let lock = node.acquire_version_lock();
        lock.store_value(value);
        pool.persist(node)?;
        lock.release_version();
        Ok(())
    }

    /// One attempt at inserting or updating `key`.
    ///
    /// `pending` carries a node allocated by an earlier failed attempt, so
    /// retries do not leak arena space. It is cleared once the node links.
    ///
    /// # Errors
    ///
    /// Arena exhaustion or persist failure.
    pub fn insert_or_update<'a>(
        &'a self,
        worker: &Worker<'_>,
        pool: &PmPool,
        key: i64,
        value: u64,
        hint: Option<&'a ListNode>,
        pending: &mut Option<NonNull<ListNode>>,
    ) -> Result<Splice<'a>> {
        match self.find_predecessor_and_successor(key, hint) {
            Position::Existing(node) => {
                if node.is_deleted() {
                    trace_log!(key, "existing node is tombstoned");
                    return Ok(Splice::Contended);
                }
                self.update_value(pool, node, value)?;
                Ok(Splice::Updated(node))
            }

            Position::Gap { pred, observed } => {
                if observed.is_deleted() {
                    trace_log!(key, pred = pred.key(), "predecessor is tombstoned");
                    return Ok(Splice::Contended);
                }
                self.splice(worker, pool, key, value, pred, observed, pending)
            }
        }
    }

    /// Link the first node after the head.
    ///
    /// # Errors
    ///
    /// Arena exhaustion or persist failure.
    pub fn link_first(
        &self,
        worker: &Worker<'_>,
        pool: &PmPool,
        key: i64,
        value: u64,
        pending: &mut Option<NonNull<ListNode>>,
    ) -> Result<Splice<'_>> {
        let head: &ListNode = self.head();
        let observed: TaggedNext = head.next();

        if !observed.is_null() || observed.is_deleted() {
            return Ok(Splice::Contended);
        }

        self.splice(worker, pool, key, value, head, observed, pending)
    }

    #[allow(clippy::too_many_arguments)]
    fn splice<'a>(
        &'a self,
        worker: &Worker<'_>,
        pool: &PmPool,
        key: i64,
        value: u64,
        pred: &'a ListNode,
        observed: TaggedNext,
        pending: &mut Option<NonNull<ListNode>>,
    ) -> Result<Splice<'a>> {
        let successor: TaggedNext = TaggedNext::from_node(observed.pointer());

        let node: NonNull<ListNode> = match *pending {
            Some(node) => {
                // SAFETY: unpublished, owned by this thread.
                unsafe { node.as_ref() }.reset_next(successor);
                node
            }
            None => {
                let slot = worker.allocate_aligned(size_of::<ListNode>(), align_of::<ListNode>())?;
                // SAFETY: fresh, aligned allocation that nothing else can reach.
                let node = unsafe { ListNode::init(slot, key, value, successor) };
                *pending = Some(node);
                node
            }
        };

        // SAFETY: arena memory outlives the list.
        let node: &'a ListNode = unsafe { node.as_ref() };
        debug_assert_eq!(node.key(), key);

        pool.persist(node)?;

        #[cfg(test)]
        self.hooks.before_publish(key);

        if pred.cas_next(observed, observed.with_pointer(node)).is_err() {
            trace_log!(key, pred = pred.key(), "splice lost CAS");
            return Ok(Splice::Contended);
        }

        *pending = None;
        pool.persist(pred)?;

        Ok(Splice::Linked(node))
    }

    /// Walk the chain after the head in key order.
    #[must_use]
    pub fn iter(&self) -> DurableIter<'_> {
        DurableIter {
            next: self.head().successor(),
        }
    }
}

/// Iterator over linked nodes, tombstoned ones included.
#[derive(Debug)]
pub struct DurableIter<'a> {
    next: Option<&'a ListNode>,
}

impl<'a> Iterator for DurableIter<'a> {
    type Item = &'a ListNode;

    fn next(&mut self) -> Option<Self::Item> {
        let current: &'a ListNode = self.next?;
        self.next = current.successor();
        Some(current)
    }
}
