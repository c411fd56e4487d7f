//! Optimistic, lock-free key lookup within one page.

use super::Page;
use crate::nodeversion::read_validated;

/// Where a page lookup leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// Internal page: the child whose range holds the key.
    Descend(*mut Page),

    /// The key belongs to the right sibling (a split moved it).
    Sibling(*mut Page),

    /// Leaf page: the list node cached for the key.
    Record(*mut u8),

    /// Leaf page: no cached entry for the key.
    Absent,
}

impl Page {
    /// Find `key` in this page.
    ///
    /// Internal pages always yield `Descend` or `Sibling`. Leaf pages yield
    /// `Record`, `Sibling` or `Absent`.
    pub(crate) fn linear_search(&self, key: i64) -> Lookup {
        if self.is_leaf() {
            let found: Option<*mut u8> =
                read_validated(&self.hdr.switch_counter, |snapshot| {
                    if snapshot & 1 == 1 {
                        return None;
                    }
                    self.find_exact(key)
                });

            return match found {
                Some(node) => Lookup::Record(node),
                None => self.sibling_for(key).map_or(Lookup::Absent, Lookup::Sibling),
            };
        }

        let child: *mut Page = read_validated(&self.hdr.switch_counter, |snapshot| {
            if snapshot & 1 == 1 {
                return std::ptr::null_mut();
            }
            self.route(key)
        });

        if let Some(sibling) = self.sibling_for(key) {
            return Lookup::Sibling(sibling);
        }
        Lookup::Descend(child)
    }

    /// Leaf lookup that also reports the nearest smaller entry.
    ///
    /// The predecessor is the pointer of the largest local key below `key`,
    /// or the left neighbour's last entry when there is none.
    pub(crate) fn linear_search_pred(&self, key: i64) -> (Lookup, Option<*mut u8>) {
        debug_assert!(self.is_leaf());

        let (found, local_pred) = read_validated(&self.hdr.switch_counter, |snapshot| {
            if snapshot & 1 == 1 {
                return (None, None);
            }

            let mut pred: Option<*mut u8> = None;
            let mut found: Option<*mut u8> = None;

            for entry in &self.records {
                let ptr: *mut u8 = entry.ptr();
                if ptr.is_null() {
                    break;
                }

                let k: i64 = entry.key();
                if k < key {
                    pred = Some(ptr);
                } else {
                    if k == key {
                        found = Some(ptr);
                    }
                    break;
                }
            }

            (found, pred)
        });

        let pred: Option<*mut u8> = local_pred.or_else(|| self.pred_page_last());

        let lookup: Lookup = match found {
            Some(node) => Lookup::Record(node),
            None => self.sibling_for(key).map_or(Lookup::Absent, Lookup::Sibling),
        };

        (lookup, pred)
    }

    /// Exact-match scan of the live prefix.
    fn find_exact(&self, key: i64) -> Option<*mut u8> {
        for entry in &self.records {
            let ptr: *mut u8 = entry.ptr();
            if ptr.is_null() {
                return None;
            }

            let k: i64 = entry.key();
            if k == key {
                return Some(ptr);
            }
            if k > key {
                return None;
            }
        }
        None
    }

    /// Child of an internal page whose range holds `key`.
    fn route(&self, key: i64) -> *mut Page {
        let mut child: *mut Page = self.leftmost();

        for entry in &self.records {
            let ptr: *mut u8 = entry.ptr();
            if ptr.is_null() || key < entry.key() {
                break;
            }
            child = ptr.cast();
        }

        child
    }

    /// The right sibling, if it already owns `key`.
    ///
    /// Ownership is judged by the sibling's first key, not the separator it
    /// was split at. An internal sibling drops its median into its parent, so
    /// keys in `[separator, first_key)` still route to the left page until
    /// the separator lands one level up.
    fn sibling_for(&self, key: i64) -> Option<*mut Page> {
        let sibling: *mut Page = self.sibling();

        // SAFETY: pages are freed only when the tree drops.
        let page: &Page = unsafe { sibling.as_ref() }?;
        (key >= page.first_key()).then_some(sibling)
    }
}
