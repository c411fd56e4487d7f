//! Per-index event counters.

use std::fmt as StdFmt;
use std::sync::atomic::AtomicU64;

use crate::ordering::RELAXED;

/// Live counters, bumped on the hot paths with relaxed increments.
#[derive(Debug, Default)]
pub(crate) struct TreeCounters {
    inserts: AtomicU64,
    updates: AtomicU64,
    retries: AtomicU64,
    abandoned: AtomicU64,
    splits: AtomicU64,
    root_splits: AtomicU64,
    redirects: AtomicU64,
}

impl TreeCounters {
    #[inline]
    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_split(&self) {
        self.splits.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_root_split(&self) {
        self.root_splits.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_redirect(&self) {
        self.redirects.fetch_add(1, RELAXED);
    }

    pub(crate) fn snapshot(&self, height: u32) -> IndexStats {
        IndexStats {
            height,
            inserts: self.inserts.load(RELAXED),
            updates: self.updates.load(RELAXED),
            retries: self.retries.load(RELAXED),
            abandoned: self.abandoned.load(RELAXED),
            splits: self.splits.load(RELAXED),
            root_splits: self.root_splits.load(RELAXED),
            redirects: self.redirects.load(RELAXED),
        }
    }
}

/// Point-in-time view of an index's counters.
///
/// Counters are read independently, so a snapshot taken under load is not
/// an atomic cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Tree height (1 = a single leaf).
    pub height: u32,
    /// Inserts that linked a new list node.
    pub inserts: u64,
    /// Inserts that overwrote an existing key.
    pub updates: u64,
    /// Insert attempts repeated after contention.
    pub retries: u64,
    /// Inserts dropped after exhausting the retry budget.
    pub abandoned: u64,
    /// Page splits, root splits included.
    pub splits: u64,
    /// Splits that grew the tree.
    pub root_splits: u64,
    /// Stores that moved to a right sibling.
    pub redirects: u64,
}

impl StdFmt::Display for IndexStats {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        write!(
            f,
            "height={} inserts={} updates={} retries={} abandoned={} splits={} root_splits={} redirects={}",
            self.height,
            self.inserts,
            self.updates,
            self.retries,
            self.abandoned,
            self.splits,
            self.root_splits,
            self.redirects
        )
    }
}
