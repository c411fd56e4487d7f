//! Cache-line primitives: write-back for persistence, prefetch for traversal.
//!
//! Persistent memory is written through the CPU caches. A store is only
//! durable once its cache line has been written back and a store barrier
//! has ordered that write-back before anything published afterwards.
//!
//! # Architecture Support
//!
//! - **`x86_64`**: `clflush` per line, `sfence` as the barrier, `_mm_prefetch`
//! - **`aarch64`**: `dc cvac` per line, `dsb ish` as the barrier, `prfm`
//! - **Other**: a `SeqCst` fence stands in for the barrier, flushes and
//!   prefetches are no-ops

use std::sync::atomic::{Ordering, fence};

/// Persistence and coherence granularity.
pub const CACHE_LINE_SIZE: usize = 64;

/// Write back every cache line covering `[addr, addr + len)`, then issue a
/// store barrier.
///
/// A zero-length range still issues the barrier.
///
/// # Safety
///
/// Flushing is a hint to the cache hierarchy and never faults on mapped
/// memory, but `addr..addr + len` must lie inside a live mapping.
#[inline]
pub unsafe fn persist_range(addr: *const u8, len: usize) {
    if len > 0 {
        let start: usize = addr.addr() & !(CACHE_LINE_SIZE - 1);
        let end: usize = addr.addr() + len;

        let mut line: usize = start;
        while line < end {
            // SAFETY: the line lies inside the caller's mapping.
            unsafe { flush_line(addr.with_addr(line)) };
            line += CACHE_LINE_SIZE;
        }
    }

    store_barrier();
}

/// Write back one cache line.
#[inline(always)]
#[allow(unused_unsafe)]
unsafe fn flush_line(line: *const u8) {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: `clflush` is part of SSE2, which x86_64 guarantees.
        unsafe { std::arch::x86_64::_mm_clflush(line) };
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: clean-to-point-of-coherency on a mapped address. EL0
        // access is enabled by Linux.
        unsafe {
            std::arch::asm!("dc cvac, {0}", in(reg) line, options(nostack, preserves_flags));
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = line;
    }
}

/// Order all preceding write-backs and stores before later stores.
#[inline(always)]
#[allow(unused_unsafe)]
pub fn store_barrier() {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: `sfence` has no preconditions.
        unsafe { std::arch::x86_64::_mm_sfence() };
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `dsb ish` has no preconditions.
        unsafe { std::arch::asm!("dsb ish", options(nostack, preserves_flags)) };
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        fence(Ordering::SeqCst);
    }

    // Keep the compiler from sinking stores past the hardware barrier.
    fence(Ordering::SeqCst);
}

/// Prefetch the line at `ptr` for reading.
///
/// Used while walking the durable list, where the next node is in a
/// different arena line almost every hop. Null and dangling pointers are
/// fine: a prefetch is a hint, not a load.
#[inline(always)]
#[allow(unused_unsafe)]
pub fn prefetch_read<T>(ptr: *const T) {
    if ptr.is_null() {
        return;
    }

    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: prefetches never fault.
        unsafe {
            std::arch::x86_64::_mm_prefetch(ptr.cast::<i8>(), std::arch::x86_64::_MM_HINT_T0);
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: prefetches never fault.
        unsafe {
            std::arch::asm!("prfm pldl1keep, [{0}]", in(reg) ptr, options(nostack, readonly, preserves_flags));
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = ptr;
    }
}
