//! Filepath: src/tree.rs
//! `UTree` - a volatile B+tree cache over a durable sorted list.
//!
//! The tree only speeds up navigation. Every key/value pair lives in the
//! durable list, and any lookup the tree cannot answer falls through to a
//! list walk from the nearest predecessor the tree does know.

use std::hint;
use std::sync::atomic::{AtomicPtr, AtomicU32};

use crate::alloc::{PmPool, Worker};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::list::{DurableIter, DurableList, ListNode, Position};
use crate::ordering::{READ_ORD, RELAXED};
use crate::page::{self, Lookup, Page};

mod insert;
mod propagation;
mod stats;

#[cfg(test)]
pub(crate) mod test_hooks;

#[cfg(all(test, not(loom)))]
mod shuttle_tests;

#[cfg(all(test, loom))]
mod loom_tests;

pub use insert::{INSERT_RETRY_BUDGET, InsertOutcome};
pub use stats::IndexStats;
pub(crate) use stats::TreeCounters;

// ============================================================================
//  UTree
// ============================================================================

/// A persistent-memory ordered index from `i64` keys to `u64` values.
///
/// Value `0` is the null value: storing it makes the key read as absent.
///
/// # Example
///
/// ```rust
/// use utree::{InsertOutcome, PoolConfig, UTree};
///
/// let tree = UTree::open(&PoolConfig::new(1).with_capacity(1 << 20)).unwrap();
/// let worker = tree.worker(1).unwrap();
///
/// assert_eq!(tree.insert(&worker, 7, 70).unwrap(), InsertOutcome::Inserted);
/// assert_eq!(tree.search(7), Some(70));
/// assert_eq!(tree.search(8), None);
/// ```
pub struct UTree {
    root: AtomicPtr<Page>,
    height: AtomicU32,
    list: DurableList,
    pool: PmPool,
    counters: TreeCounters,
}

/// Where the tree says a key is.
pub(crate) struct Probe<'a> {
    /// List node cached for the key.
    pub(crate) node: Option<&'a ListNode>,

    /// Nearest smaller list node the leaf level knows about.
    pub(crate) pred: Option<&'a ListNode>,

    /// Leaf that owns the key.
    pub(crate) leaf: &'a Page,
}

impl std::fmt::Debug for UTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UTree")
            .field("height", &self.height())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl UTree {
    /// Map a pool and build an empty index over it: height 1, one empty
    /// leaf, and a persisted list head in arena 0.
    ///
    /// # Errors
    ///
    /// Whatever [`PmPool::open`] reports, or a persist failure for the head.
    pub fn open(config: &PoolConfig) -> Result<Self> {
        let pool: PmPool = PmPool::open(config)?;
        let list: DurableList = DurableList::new(&pool)?;

        Ok(Self {
            root: AtomicPtr::new(Box::into_raw(Page::new(0))),
            height: AtomicU32::new(1),
            list,
            pool,
            counters: TreeCounters::default(),
        })
    }

    /// Claim arena `id` for the calling thread. Id 0 is the warm-up arena.
    ///
    /// # Errors
    ///
    /// [`IndexError::WorkerOutOfRange`](crate::IndexError::WorkerOutOfRange)
    /// or [`IndexError::WorkerBusy`](crate::IndexError::WorkerBusy).
    pub fn worker(&self, id: usize) -> Result<Worker<'_>> {
        self.pool.register(id)
    }

    /// Value stored for `key`, if any.
    ///
    /// A zero value or a tombstoned record reads as absent.
    #[must_use]
    pub fn search(&self, key: i64) -> Option<u64> {
        let probe: Probe<'_> = self.locate(key);

        let node: &ListNode = match probe.node {
            Some(node) => node,
            None => match self.list.find_predecessor_and_successor(key, probe.pred) {
                Position::Existing(node) => node,
                Position::Gap { .. } => return None,
            },
        };

        debug_assert_eq!(node.key(), key);
        if node.is_deleted() {
            return None;
        }

        let value: u64 = node.value();
        (value != 0).then_some(value)
    }

    /// Current height (1 = the root is a leaf).
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height.load(RELAXED)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        self.counters.snapshot(self.height())
    }

    /// The durable list.
    #[must_use]
    pub const fn list(&self) -> &DurableList {
        &self.list
    }

    /// The backing pool.
    #[must_use]
    pub const fn pool(&self) -> &PmPool {
        &self.pool
    }

    /// Walk the durable records in key order.
    pub fn durable_iter(&self) -> DurableIter<'_> {
        self.list.iter()
    }

    /// Number of durable records (tombstoned ones included).
    #[must_use]
    pub fn durable_len(&self) -> usize {
        self.list.iter().count()
    }

    /// Release the index and unmap its region.
    pub fn close(self) {
        drop(self);
    }

    // ========================================================================
    //  Navigation
    // ========================================================================

    pub(crate) fn root_ptr(&self) -> *mut Page {
        self.root.load(READ_ORD)
    }

    pub(crate) fn root_page(&self) -> &Page {
        // SAFETY: pages are freed only when the tree drops.
        unsafe { &*self.root_ptr() }
    }

    pub(crate) const fn counters(&self) -> &TreeCounters {
        &self.counters
    }

    /// Walk from the root down to the page at `level` that owns `key`.
    ///
    /// The caller guarantees the root is at `level` or above.
    pub(crate) fn descend(&self, key: i64, level: u32) -> &Page {
        'restart: loop {
            let mut page: &Page = self.root_page();

            while page.level() > level {
                match page.linear_search(key) {
                    Lookup::Descend(next) | Lookup::Sibling(next) if !next.is_null() => {
                        // SAFETY: pages are freed only when the tree drops.
                        page = unsafe { &*next };
                    }
                    _ => {
                        hint::spin_loop();
                        continue 'restart;
                    }
                }
            }

            return page;
        }
    }

    /// Descend to the leaf owning `key` and resolve its cached node and
    /// predecessor, following right siblings as needed.
    pub(crate) fn locate(&self, key: i64) -> Probe<'_> {
        let mut leaf: &Page = self.descend(key, 0);
        let mut pred: Option<&ListNode> = None;

        loop {
            let (lookup, hint) = leaf.linear_search_pred(key);

            // SAFETY: leaf entries only hold list nodes.
            if let Some(found) = hint.and_then(|p| unsafe { page::as_node(p) }) {
                pred = Some(found);
            }

            match lookup {
                Lookup::Sibling(next) => {
                    // SAFETY: pages are freed only when the tree drops.
                    leaf = unsafe { &*next };
                }
                Lookup::Record(node) => {
                    return Probe {
                        // SAFETY: leaf entries only hold list nodes.
                        node: unsafe { page::as_node(node) },
                        pred,
                        leaf,
                    };
                }
                Lookup::Absent | Lookup::Descend(_) => {
                    return Probe {
                        node: None,
                        pred,
                        leaf,
                    };
                }
            }
        }
    }
}

impl Drop for UTree {
    fn drop(&mut self) {
        // Each level is one sibling chain; its first page is the leftmost
        // child of the first page one level up.
        let mut level_head: *mut Page = *self.root.get_mut();

        while !level_head.is_null() {
            // SAFETY: exclusive access, and every page is reached exactly once.
            let next_level: *mut Page = unsafe { (*level_head).leftmost() };

            let mut page: *mut Page = level_head;
            while !page.is_null() {
                // SAFETY: as above.
                let sibling: *mut Page = unsafe { (*page).sibling() };
                drop(unsafe { Box::from_raw(page) });
                page = sibling;
            }

            level_head = next_level;
        }
    }
}

/// Open an index for `worker_count` runtime workers.
///
/// Capacity and backing come from [`PoolConfig::from_env`].
///
/// # Errors
///
/// Bad environment values or a failed mapping.
pub fn open_index(worker_count: usize) -> Result<UTree> {
    UTree::open(&PoolConfig::from_env(worker_count)?)
}

/// Release an index and unmap its region.
pub fn close_index(tree: UTree) {
    tree.close();
}

// ============================================================================
//  Tests
// ============================================================================
