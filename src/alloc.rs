//! Persistent arena allocator.
//!
//! One region is mapped up front and carved into per-worker bump arenas.
//! Nothing is ever freed: list nodes live until the region is unmapped.
//!
//! # Layout
//!
//! For `W` runtime workers the region is cut into `2W` units of
//! `unit = floor(capacity / 2W / 4096) * 4096` bytes. Arena 0, used for the
//! single-threaded warm-up load, takes the first `W` units. Arena `i` in
//! `1..=W` takes unit `W + i - 1`.
//!
//! ```text
//! | arena 0 (W units)            | arena 1 | arena 2 | ... | arena W |
//! ```
//!
//! With `W = 0` arena 0 covers the whole region.
//!
//! # Ownership
//!
//! A [`Worker`] handle is the exclusive owner of one arena while it lives.
//! The handle is `!Send`, so allocation always happens on the thread that
//! registered, and the pool refuses a second handle for the same id.

use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize};

use memmap2::{MmapMut, MmapOptions};

use crate::cacheline;
use crate::config::{Backing, PersistMode, PoolConfig};
use crate::error::{IndexError, Result};
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, RELAXED, UNLOCK_ORD};
use crate::tracing_helpers::{debug_log, error_log};

/// Mapping granularity. Arena boundaries are multiples of this.
pub const REGION_PAGE: usize = 4096;

/// Default allocation alignment. Every durable record is at least
/// word-aligned.
pub const ALLOC_ALIGN: usize = 8;

// ============================================================================
//  Layout
// ============================================================================

/// Compute the mapped length and the arena ranges for a region.
///
/// # Errors
///
/// [`IndexError::InvalidConfig`] if the capacity is too small to give every
/// arena at least one page.
pub fn plan_arenas(capacity: usize, workers: usize) -> Result<(usize, Vec<Range<usize>>)> {
    if workers == 0 {
        let len: usize = capacity / REGION_PAGE * REGION_PAGE;
        if len == 0 {
            return Err(IndexError::InvalidConfig(format!(
                "capacity {capacity} is smaller than one {REGION_PAGE}-byte page"
            )));
        }
        return Ok((len, vec![0..len]));
    }

    let unit: usize = capacity / (2 * workers) / REGION_PAGE * REGION_PAGE;
    if unit == 0 {
        return Err(IndexError::InvalidConfig(format!(
            "capacity {capacity} cannot give {workers} workers a page each"
        )));
    }

    let mut ranges: Vec<Range<usize>> = Vec::with_capacity(workers + 1);
    ranges.push(0..unit * workers);
    for i in 1..=workers {
        let start: usize = (workers + i - 1) * unit;
        ranges.push(start..start + unit);
    }

    Ok((unit * 2 * workers, ranges))
}

/// One worker's slice of the region. Offsets are relative to the region base.
#[derive(Debug)]
#[repr(align(64))]
struct Arena {
    #[cfg(test)]
    start: usize,
    end: usize,
    cursor: AtomicUsize,
    claimed: AtomicBool,
}

impl Arena {
    fn new(range: Range<usize>) -> Self {
        Self {
            #[cfg(test)]
            start: range.start,
            end: range.end,
            cursor: AtomicUsize::new(range.start),
            claimed: AtomicBool::new(false),
        }
    }
}

// ============================================================================
//  PmPool
// ============================================================================

/// The mapped persistent region and its arenas.
pub struct PmPool {
    region: MmapMut,
    base: NonNull<u8>,
    arenas: Box<[Arena]>,
    persist_mode: PersistMode,
}

// SAFETY: the region is only written through arena allocations, each owned
// by one worker at a time, or through atomics inside published records.
unsafe impl Send for PmPool {}
// SAFETY: see above. Shared access goes through atomics.
unsafe impl Sync for PmPool {}

impl std::fmt::Debug for PmPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmPool")
            .field("len", &self.region.len())
            .field("arenas", &self.arenas.len())
            .field("persist_mode", &self.persist_mode)
            .finish_non_exhaustive()
    }
}

impl PmPool {
    /// Map the region described by `config` and partition it.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidConfig`] if the capacity is too small.
    /// - [`IndexError::RegionMap`] if the backing file or mapping fails.
    pub fn open(config: &PoolConfig) -> Result<Self> {
        let (len, ranges) = plan_arenas(config.capacity_bytes, config.workers)?;

        let mut region: MmapMut = match &config.backing {
            Backing::Anonymous => MmapOptions::new()
                .len(len)
                .map_anon()
                .map_err(IndexError::RegionMap)?,

            Backing::File(path) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)
                    .map_err(IndexError::RegionMap)?;
                file.set_len(len as u64).map_err(IndexError::RegionMap)?;

                // SAFETY: the file is private to this process for the
                // lifetime of the mapping.
                unsafe { MmapOptions::new().len(len).map_mut(&file) }
                    .map_err(IndexError::RegionMap)?
            }
        };

        let base: NonNull<u8> = NonNull::new(region.as_mut_ptr()).ok_or_else(|| {
            IndexError::RegionMap(std::io::Error::other("mapping returned a null base"))
        })?;

        debug_log!(
            len,
            arenas = ranges.len(),
            mode = ?config.persist_mode,
            "mapped persistent region"
        );

        Ok(Self {
            region,
            base,
            arenas: ranges.into_iter().map(Arena::new).collect(),
            persist_mode: config.persist_mode,
        })
    }

    /// Number of arenas (runtime workers plus the warm-up arena).
    #[must_use]
    pub fn arena_count(&self) -> usize {
        self.arenas.len()
    }

    /// Bytes mapped.
    #[must_use]
    pub fn mapped_len(&self) -> usize {
        self.region.len()
    }

    /// Configured persist mode.
    #[must_use]
    pub const fn persist_mode(&self) -> PersistMode {
        self.persist_mode
    }

    /// Claim arena `id` for the calling thread.
    ///
    /// # Errors
    ///
    /// - [`IndexError::WorkerOutOfRange`] if there is no arena `id`.
    /// - [`IndexError::WorkerBusy`] if a live handle already owns it.
    pub fn register(&self, id: usize) -> Result<Worker<'_>> {
        let arena: &Arena = self.arenas.get(id).ok_or(IndexError::WorkerOutOfRange {
            id,
            arenas: self.arenas.len(),
        })?;

        arena
            .claimed
            .compare_exchange(false, true, CAS_SUCCESS, CAS_FAILURE)
            .map_err(|_| IndexError::WorkerBusy(id))?;

        Ok(Worker {
            pool: self,
            id,
            _marker: PhantomData,
        })
    }

    /// Bump-allocate from arena `id`.
    ///
    /// Callers own the arena: either through a [`Worker`] or because no
    /// worker can exist yet (index construction).
    pub(crate) fn allocate_in(&self, id: usize, size: usize, align: usize) -> Result<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());

        let arena: &Arena = &self.arenas[id];
        let cursor: usize = arena.cursor.load(RELAXED);
        let offset: usize = cursor.next_multiple_of(align);

        if size > arena.end.saturating_sub(offset) {
            let remaining: usize = arena.end - cursor;
            error_log!(worker = id, size, remaining, "arena exhausted");
            return Err(IndexError::ArenaExhausted {
                worker: id,
                requested: size,
                remaining,
            });
        }

        arena.cursor.store(offset + size, RELAXED);

        // SAFETY: `offset + size <= arena.end <= region.len()`.
        Ok(unsafe { self.base.add(offset) })
    }

    /// Make `value` durable.
    ///
    /// Cache-line mode flushes every line covering the value and fences.
    /// Msync mode syncs the covering pages of the mapping. Values outside
    /// the region only get the store barrier.
    ///
    /// # Errors
    ///
    /// [`IndexError::Persist`] if `msync` fails.
    pub fn persist<T: ?Sized>(&self, value: &T) -> Result<()> {
        let addr: *const u8 = std::ptr::from_ref(value).cast::<u8>();
        let len: usize = size_of_val(value);

        match self.persist_mode {
            PersistMode::CacheLineFlush => {
                // SAFETY: `value` is a live reference, so its bytes are mapped.
                unsafe { cacheline::persist_range(addr, len) };
                Ok(())
            }

            PersistMode::Msync => {
                let base: usize = self.base.as_ptr().addr();
                let in_region: bool =
                    addr.addr() >= base && addr.addr() + len <= base + self.region.len();

                if in_region {
                    self.region
                        .flush_range(addr.addr() - base, len)
                        .map_err(IndexError::Persist)?;
                }
                cacheline::store_barrier();
                Ok(())
            }
        }
    }

    fn release(&self, id: usize) {
        self.arenas[id].claimed.store(false, UNLOCK_ORD);
    }

    fn remaining_in(&self, id: usize) -> usize {
        let arena: &Arena = &self.arenas[id];
        arena.end - arena.cursor.load(RELAXED)
    }

    #[cfg(test)]
    fn arena_range(&self, id: usize) -> Range<usize> {
        self.arenas[id].start..self.arenas[id].end
    }
}

// ============================================================================
//  Worker
// ============================================================================

/// Exclusive handle on one arena.
///
/// Obtained from [`PmPool::register`] (or `UTree::worker`). Dropping the
/// handle releases the arena so the id can be registered again; allocations
/// made through it stay valid.
#[must_use = "dropping the worker releases its arena"]
pub struct Worker<'a> {
    pool: &'a PmPool,
    id: usize,

    // Allocation must stay on the registering thread.
    _marker: PhantomData<*mut ()>,
}

impl std::fmt::Debug for Worker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish()
    }
}

impl Worker<'_> {
    /// Arena id this handle owns.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Allocate `size` bytes at [`ALLOC_ALIGN`].
    ///
    /// # Errors
    ///
    /// [`IndexError::ArenaExhausted`] if the arena cannot fit the request.
    #[inline]
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        self.pool.allocate_in(self.id, size, ALLOC_ALIGN)
    }

    /// Allocate `size` bytes aligned to `align` (a power of two).
    ///
    /// # Errors
    ///
    /// [`IndexError::ArenaExhausted`] if the arena cannot fit the request.
    #[inline]
    pub fn allocate_aligned(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        self.pool.allocate_in(self.id, size, align)
    }

    /// Bytes left in the arena.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pool.remaining_in(self.id)
    }

    /// Whether this handle was registered with `pool`.
    pub(crate) fn belongs_to(&self, pool: &PmPool) -> bool {
        std::ptr::eq(self.pool, pool)
    }
}

impl Drop for Worker<'_> {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}
