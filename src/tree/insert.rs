//! The insert state machine.
//!
//! Each attempt runs
//!
//! ```text
//! DESCEND -> RESOLVE_PREDECESSOR -> { SPLICE_LIST | UPDATE_EXISTING }
//!         -> WRITE_BACK_LEAF_ENTRY -> (SPLIT_PROPAGATE)* -> DONE
//! ```
//!
//! and every attempt re-resolves its path from the root. Losing a splice
//! CAS or meeting a tombstone ends the attempt; after
//! `1 + INSERT_RETRY_BUDGET` attempts the insert is abandoned with nothing
//! applied.

use std::hint;
use std::ptr::{self, NonNull};

use super::{Probe, UTree};
use crate::alloc::Worker;
use crate::error::{IndexError, Result};
use crate::list::{ListNode, Splice};
use crate::page::{LockMode, Page, StoreOutcome};
use crate::tracing_helpers::{debug_log, warn_log};

/// Retries after the first attempt before an insert is abandoned.
pub const INSERT_RETRY_BUDGET: usize = 10;

/// What [`UTree::insert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum InsertOutcome {
    /// A new record was linked into the durable list.
    Inserted,

    /// The key existed; its value was overwritten in place.
    Updated,

    /// Every attempt lost to contention or met a tombstone. Nothing changed.
    Abandoned,
}

impl UTree {
    /// Insert `key -> value`, or overwrite the value if `key` exists.
    ///
    /// `worker` must come from [`UTree::worker`] on this index; new list
    /// nodes are carved from its arena.
    ///
    /// # Errors
    ///
    /// - [`IndexError::ForeignWorker`] if `worker` belongs to another index.
    /// - [`IndexError::ArenaExhausted`] if the worker's arena is full.
    /// - [`IndexError::Persist`] if a persist fails in msync mode.
    ///
    /// Contention is not an error: see [`InsertOutcome::Abandoned`].
    pub fn insert(&self, worker: &Worker<'_>, key: i64, value: u64) -> Result<InsertOutcome> {
        if !worker.belongs_to(&self.pool) {
            return Err(IndexError::ForeignWorker(worker.id()));
        }

        // Node allocated by a failed attempt, reused by the next one.
        let mut pending: Option<NonNull<ListNode>> = None;

        for attempt in 0..=INSERT_RETRY_BUDGET {
            if attempt > 0 {
                self.counters.record_retry();
                hint::spin_loop();
            }

            let probe: Probe<'_> = self.locate(key);

            if let Some(node) = probe.node {
                if node.is_deleted() {
                    continue;
                }
                self.list.update_value(&self.pool, node, value)?;
                self.counters.record_update();
                return Ok(InsertOutcome::Updated);
            }

            let first: bool = self.list.is_empty();
            let splice: Splice<'_> = if first {
                self.list
                    .link_first(worker, &self.pool, key, value, &mut pending)?
            } else {
                self.list.insert_or_update(
                    worker,
                    &self.pool,
                    key,
                    value,
                    probe.pred,
                    &mut pending,
                )?
            };

            match splice {
                Splice::Updated(_) => {
                    self.counters.record_update();
                    return Ok(InsertOutcome::Updated);
                }

                Splice::Linked(node) => {
                    let leaf: Option<&Page> = (!first).then_some(probe.leaf);
                    self.write_back(leaf, key, node);
                    self.counters.record_insert();
                    return Ok(InsertOutcome::Inserted);
                }

                Splice::Contended => {}
            }
        }

        warn_log!(
            key,
            attempts = INSERT_RETRY_BUDGET + 1,
            "insert abandoned after retry budget"
        );
        self.counters.record_abandoned();
        Ok(InsertOutcome::Abandoned)
    }

    /// Cache a freshly linked node in its leaf.
    ///
    /// Starts at `leaf` when the caller has one, otherwise descends from the
    /// root. The entry is only a shortcut: if it cannot be written the key
    /// is still found through the list.
    fn write_back(&self, leaf: Option<&Page>, key: i64, node: &ListNode) {
        let ptr: *mut u8 = ptr::from_ref(node).cast_mut().cast();

        if let Some(leaf) = leaf {
            if !matches!(
                leaf.store(self, key, ptr, LockMode::Locked, None),
                StoreOutcome::Deleted
            ) {
                return;
            }
        }

        let leaf: &Page = self.descend(key, 0);
        if matches!(
            leaf.store(self, key, ptr, LockMode::Locked, None),
            StoreOutcome::Deleted
        ) {
            debug_log!(key, "leaf tombstoned, entry not cached");
        }
    }
}
