//! Separator propagation and root replacement.

use std::hint;

use super::UTree;
use crate::ordering::{RELAXED, WRITE_ORD};
use crate::page::{LockMode, Page, StoreOutcome};
use crate::tracing_helpers::trace_log;

impl UTree {
    /// Insert separator `key -> child` into the page at `level` that owns
    /// `key`.
    ///
    /// The target is found by level number from the current root, never by
    /// a remembered parent, since concurrent splits may have changed the
    /// path. Retries while the root is still below `level` (a root split in
    /// flight) or the target page is tombstoned.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, child))
    )]
    pub(crate) fn insert_internal(&self, key: i64, child: *mut Page, level: u32) {
        loop {
            if self.root_page().level() < level {
                trace_log!(key, level, "waiting for root split");
                hint::spin_loop();
                continue;
            }

            let page: &Page = self.descend(key, level);
            debug_assert_eq!(page.level(), level);

            match page.store(self, key, child.cast(), LockMode::Locked, None) {
                StoreOutcome::Deleted => hint::spin_loop(),
                StoreOutcome::Inserted { .. } | StoreOutcome::Replaced { .. } => return,
            }
        }
    }

    /// Install `new_root` one level above the current root.
    ///
    /// Called by the thread splitting the current root, with that root's
    /// mutex held.
    pub(crate) fn set_new_root(&self, new_root: *mut Page) {
        self.root.store(new_root, WRITE_ORD);
        self.height.fetch_add(1, RELAXED);
        self.counters.record_root_split();
    }
}
