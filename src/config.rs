//! Pool configuration.
//!
//! [`PoolConfig`] sizes the persistent region, chooses what backs it and
//! how [`PmPool::persist`](crate::alloc::PmPool::persist) makes writes
//! durable. Defaults can be overridden from the environment:
//!
//! | Variable           | Meaning                                      |
//! |--------------------|----------------------------------------------|
//! | `UTREE_POOL_BYTES` | Region capacity in bytes (default 1 GiB)     |
//! | `UTREE_POOL_FILE`  | Back the region with this file               |
//! | `UTREE_PERSIST`    | `flush` (default) or `msync`                 |

use std::env;
use std::path::PathBuf;

use crate::error::{IndexError, Result};

/// Default region capacity.
pub const DEFAULT_POOL_BYTES: usize = 1 << 30;

/// Environment variable holding the region capacity.
pub const ENV_POOL_BYTES: &str = "UTREE_POOL_BYTES";

/// Environment variable naming a backing file.
pub const ENV_POOL_FILE: &str = "UTREE_POOL_FILE";

/// Environment variable selecting the persist mode.
pub const ENV_PERSIST: &str = "UTREE_PERSIST";

/// What the persistent region is mapped from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Backing {
    /// Anonymous memory. Durable only in the sense the flushes are issued.
    #[default]
    Anonymous,

    /// A file (typically on a DAX filesystem), created or resized to the
    /// region length.
    File(PathBuf),
}

/// How a persisted range reaches the durable medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Flush each covering cache line, then a store barrier. The PM path.
    #[default]
    CacheLineFlush,

    /// `msync` the covering pages. For file-backed regions on block storage.
    Msync,
}

/// Configuration for [`PmPool`](crate::alloc::PmPool) and
/// [`UTree`](crate::tree::UTree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Total bytes to reserve. Rounded down to whole allocation units.
    pub capacity_bytes: usize,

    /// Number of runtime workers. Worker 0 (the warm-up arena) is extra.
    pub workers: usize,

    /// What the region is mapped from.
    pub backing: Backing,

    /// How `persist` reaches the medium.
    pub persist_mode: PersistMode,
}

impl PoolConfig {
    /// Default configuration for `workers` runtime workers.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            capacity_bytes: DEFAULT_POOL_BYTES,
            workers,
            backing: Backing::Anonymous,
            persist_mode: PersistMode::CacheLineFlush,
        }
    }

    /// Set the region capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity_bytes: usize) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Back the region with a file.
    #[must_use]
    pub fn with_backing_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.backing = Backing::File(path.into());
        self
    }

    /// Set the persist mode.
    #[must_use]
    pub const fn with_persist_mode(mut self, mode: PersistMode) -> Self {
        self.persist_mode = mode;
        self
    }

    /// Build a configuration from the process environment.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidConfig`] if a variable is set but malformed.
    pub fn from_env(workers: usize) -> Result<Self> {
        Self::from_lookup(workers, |name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidConfig`] if a variable is set but malformed.
    pub fn from_lookup<F>(workers: usize, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(workers);

        if let Some(raw) = lookup(ENV_POOL_BYTES) {
            config.capacity_bytes = raw.trim().parse().map_err(|_| {
                IndexError::InvalidConfig(format!("{ENV_POOL_BYTES}={raw} is not a byte count"))
            })?;
        }

        if let Some(path) = lookup(ENV_POOL_FILE).filter(|p| !p.is_empty()) {
            config.backing = Backing::File(PathBuf::from(path));
        }

        if let Some(mode) = lookup(ENV_PERSIST) {
            config.persist_mode = match mode.trim() {
                "flush" => PersistMode::CacheLineFlush,
                "msync" => PersistMode::Msync,
                other => {
                    return Err(IndexError::InvalidConfig(format!(
                        "{ENV_PERSIST}={other}: expected `flush` or `msync`"
                    )));
                }
            };
        }

        Ok(config)
    }
}
