//! Test hooks for deterministic crash-ordering tests.
//!
//! A hook installed on an index fires inside every list splice, after the
//! new node has been persisted and before the CAS that publishes it. Tests
//! use it to park a writer at that point (simulating a crash window) or to
//! panic there (simulating a crash).
//!
//! # Usage
//!
//! ```rust,ignore
//! let barrier = Arc::new(Barrier::new(2));
//! let b = Arc::clone(&barrier);
//!
//! tree.list().hooks.set_before_publish(Box::new(move |_key| {
//!     b.wait(); // writer parked, node persisted but unreachable
//!     b.wait(); // released by the test
//! }));
//! ```
//!
//! Hooks are per index, so tests running in parallel do not see each
//! other's hooks. Only available in test builds (`#[cfg(test)]`).

#![expect(clippy::unwrap_used, reason = "Fail fast in tests")]

use parking_lot::Mutex;

/// Hook type: receives the key being spliced.
pub type TestHook = Box<dyn Fn(i64) + Send + Sync>;

/// Hook slots carried by each index in test builds.
#[derive(Default)]
pub struct TestHooks {
    before_publish: Mutex<Option<TestHook>>,
}

impl TestHooks {
    /// Install the before-publish hook.
    ///
    /// # Panics
    ///
    /// Panics if a hook is already installed.
    pub fn set_before_publish(&self, hook: TestHook) {
        let mut slot = self.before_publish.lock();
        assert!(
            slot.is_none(),
            "before-publish hook already set; call clear_before_publish first"
        );
        *slot = Some(hook);
    }

    /// Remove the before-publish hook.
    pub fn clear_before_publish(&self) {
        self.before_publish.lock().take();
    }

    /// Fire the before-publish hook, if any.
    ///
    /// The slot lock is not held while the hook runs, so a hook may block
    /// or panic without wedging other writers.
    pub(crate) fn before_publish(&self, key: i64) {
        let hook: Option<TestHook> = self.before_publish.lock().take();
        if let Some(hook) = hook {
            // Put it back even if the hook unwinds.
            let restore = Restore {
                slot: &self.before_publish,
                hook: Some(hook),
            };
            (restore.hook.as_ref().unwrap())(key);
        }
    }
}

struct Restore<'a> {
    slot: &'a Mutex<Option<TestHook>>,
    hook: Option<TestHook>,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = self.hook.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_hook_fires_with_key() {
        let hooks = TestHooks::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);

        hooks.set_before_publish(Box::new(move |key| {
            s.store(key as usize, Ordering::SeqCst);
        }));
        hooks.before_publish(42);

        assert_eq!(seen.load(Ordering::SeqCst), 42);

        // Still installed after firing.
        hooks.before_publish(7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);

        hooks.clear_before_publish();
        hooks.before_publish(9);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    #[should_panic(expected = "already set")]
    fn test_double_set_panics() {
        let hooks = TestHooks::default();
        hooks.set_before_publish(Box::new(|_| {}));
        hooks.set_before_publish(Box::new(|_| {}));
    }
}
