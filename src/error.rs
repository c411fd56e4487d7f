//! Error types for the index.
//!
//! Only resource and configuration failures are errors. Losing a CAS race,
//! following a sibling after a split, or a stale level during propagation
//! are retried internally. Running out of retries is reported through
//! [`InsertOutcome::Abandoned`](crate::tree::InsertOutcome::Abandoned), and
//! a missing key is simply `None`.

use std::io;

use thiserror::Error;

/// Result alias using [`IndexError`].
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors surfaced by the allocator and the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Reserving or mapping the persistent region failed.
    #[error("failed to map persistent region: {0}")]
    RegionMap(#[source] io::Error),

    /// Flushing a range of the region to its backing file failed.
    #[error("failed to persist range: {0}")]
    Persist(#[source] io::Error),

    /// The pool configuration cannot produce a usable region.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The worker's arena cannot satisfy the allocation. Fatal for that worker.
    #[error("arena {worker} exhausted: requested {requested} bytes, {remaining} remaining")]
    ArenaExhausted {
        /// Arena (worker id) that ran out.
        worker: usize,
        /// Bytes requested, before alignment padding.
        requested: usize,
        /// Bytes left in the arena.
        remaining: usize,
    },

    /// No arena exists for this worker id.
    #[error("worker id {id} out of range (pool has {arenas} arenas)")]
    WorkerOutOfRange {
        /// Requested worker id.
        id: usize,
        /// Number of arenas in the pool.
        arenas: usize,
    },

    /// Another live handle already owns this worker's arena.
    #[error("worker id {0} is already registered")]
    WorkerBusy(usize),

    /// The worker handle was registered with a different index.
    #[error("worker {0} belongs to a different pool")]
    ForeignWorker(usize),
}
