//! # `uTree`
//!
//! A persistent-memory ordered index from `i64` keys to `u64` values.
//!
//! Two structures cooperate:
//! - A **durable sorted list** in a memory-mapped region. It is the system
//!   of record: every pair lives there, and a crash at any point leaves a
//!   consistent list.
//! - A **volatile B+tree** on the heap. It only caches where list nodes are,
//!   so lookups skip most of the list walk. Losing it loses nothing.
//!
//! ## Status
//!
//! | Feature | Status |
//! |---------|--------|
//! | Concurrent insert / update | Works (lock-free list splice, per-page mutex) |
//! | Concurrent search | Works (optimistic, switch-counter validated) |
//! | Split propagation | Works (leaf and internal, root growth) |
//! | Deletion | Not implemented (tombstone bit reserved) |
//! | Recovery from a pre-existing region | Not implemented |
//! | Range scans | Only over the durable list ([`UTree::durable_iter`]) |
//!
//! ## Thread Safety
//!
//! `UTree` is `Send + Sync`. Writers need a [`Worker`] handle, which owns
//! one arena of the pool for as long as it lives:
//!
//! ```rust
//! use std::thread;
//!
//! use utree::{PoolConfig, UTree};
//!
//! let tree = UTree::open(&PoolConfig::new(2).with_capacity(1 << 20)).unwrap();
//!
//! thread::scope(|s| {
//!     for id in 1..=2 {
//!         let tree = &tree;
//!         s.spawn(move || {
//!             let worker = tree.worker(id).unwrap();
//!             for key in 0..100 {
//!                 let _ = tree.insert(&worker, key * 2 + id as i64, 1).unwrap();
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(tree.durable_len(), 200);
//! ```
//!
//! ## Crash Consistency
//!
//! A new list node is written and persisted before the single CAS that
//! links it, and the predecessor is persisted after. Value overwrites are
//! persisted before their version is released. See [`list`] and
//! [`cacheline`].

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Hot accessors on pages and list nodes are forced inline.
#![allow(clippy::inline_always)]

mod tracing_helpers;

pub mod alloc;
pub mod cacheline;
pub mod config;
pub mod error;
pub mod link;
pub mod list;
pub mod nodeversion;
pub mod ordering;
mod page;
pub mod tree;

pub use alloc::{PmPool, Worker};
pub use config::{Backing, PersistMode, PoolConfig};
pub use error::{IndexError, Result};
pub use tree::{INSERT_RETRY_BUDGET, IndexStats, InsertOutcome, UTree, close_index, open_index};
