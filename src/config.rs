//! Configuration for stratakv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StrataError};

/// Main configuration for a stratakv store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── META             (metadata snapshot)
    ///     ├── LOCK             (session id for the concurrent-access guard)
    ///     └── <first_key>      (one segment file per key range, decimal name)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Segment size target when the workload looks read-heavy (in bytes)
    pub read_target_size: u64,

    /// Segment size target during write-heavy bursts (in bytes)
    pub write_target_size: u64,

    /// A write burst is considered over once no write arrived for this long
    pub write_idle_window: Duration,

    /// Probability of cleaning a dirty segment per tick in write-optimized mode
    pub lazy_clean_probability: f64,

    /// Number of buckets used by the compaction sort
    pub sort_buckets: usize,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Sample every Nth record into the sparse index
    pub index_interval: usize,

    // -------------------------------------------------------------------------
    // Read Path Configuration
    // -------------------------------------------------------------------------
    /// A segment whose dirty suffix exceeds this flags its partition
    /// "needs cleaning before read" (in bytes)
    pub max_dirty_bytes: u64,

    // -------------------------------------------------------------------------
    // Partitioning Configuration
    // -------------------------------------------------------------------------
    /// A partition whose total size exceeds this is split in two (in bytes)
    pub partition_split_size: u64,

    // -------------------------------------------------------------------------
    // Background Task Configuration
    // -------------------------------------------------------------------------
    /// Interval between background compaction/metadata-flush ticks
    pub tick_interval: Duration,

    // -------------------------------------------------------------------------
    // Resource Configuration
    // -------------------------------------------------------------------------
    /// Byte budget for opportunistically cached segment contents
    pub cache_budget: u64,

    /// Upper bound on bytes buffered by one batched-write chunk
    pub max_batch_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./stratakv_data"),
            read_target_size: 256 * 1024,        // 256 KiB
            write_target_size: 4 * 1024 * 1024,  // 4 MiB
            write_idle_window: Duration::from_secs(10),
            lazy_clean_probability: 0.1,
            sort_buckets: 64,
            index_interval: 16,
            max_dirty_bytes: 1024 * 1024,        // 1 MiB
            partition_split_size: 32 * 1024 * 1024, // 32 MiB
            tick_interval: Duration::from_secs(1),
            cache_budget: 64 * 1024 * 1024,      // 64 MiB
            max_batch_bytes: 8 * 1024 * 1024,    // 8 MiB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the engine cannot run with
    pub(crate) fn validate(&self) -> Result<()> {
        if self.read_target_size == 0 || self.write_target_size == 0 {
            return Err(StrataError::Config(
                "size targets must be non-zero".to_string(),
            ));
        }
        if self.read_target_size > self.write_target_size {
            return Err(StrataError::Config(
                "read target must not exceed write target".to_string(),
            ));
        }
        if self.index_interval == 0 {
            return Err(StrataError::Config(
                "index interval must be at least 1".to_string(),
            ));
        }
        if self.sort_buckets == 0 {
            return Err(StrataError::Config(
                "sort buckets must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.lazy_clean_probability) {
            return Err(StrataError::Config(
                "lazy clean probability must be within [0, 1]".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(StrataError::Config(
                "tick interval must be non-zero".to_string(),
            ));
        }
        if self.max_batch_bytes == 0 {
            return Err(StrataError::Config(
                "batch byte bound must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the read-optimized segment size target (in bytes)
    pub fn read_target_size(mut self, size: u64) -> Self {
        self.config.read_target_size = size;
        self
    }

    /// Set the write-optimized segment size target (in bytes)
    pub fn write_target_size(mut self, size: u64) -> Self {
        self.config.write_target_size = size;
        self
    }

    /// Set the write-idle window after which compaction turns read-optimized
    pub fn write_idle_window(mut self, window: Duration) -> Self {
        self.config.write_idle_window = window;
        self
    }

    /// Set the per-tick cleaning probability in write-optimized mode
    pub fn lazy_clean_probability(mut self, p: f64) -> Self {
        self.config.lazy_clean_probability = p;
        self
    }

    /// Set the number of buckets for the compaction sort
    pub fn sort_buckets(mut self, buckets: usize) -> Self {
        self.config.sort_buckets = buckets;
        self
    }

    /// Set the sparse index sampling interval (every Nth record)
    pub fn index_interval(mut self, interval: usize) -> Self {
        self.config.index_interval = interval;
        self
    }

    /// Set the dirty-suffix size that forces cleaning before reads (in bytes)
    pub fn max_dirty_bytes(mut self, bytes: u64) -> Self {
        self.config.max_dirty_bytes = bytes;
        self
    }

    /// Set the partition split threshold (in bytes)
    pub fn partition_split_size(mut self, bytes: u64) -> Self {
        self.config.partition_split_size = bytes;
        self
    }

    /// Set the background tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Set the cache byte budget
    pub fn cache_budget(mut self, bytes: u64) -> Self {
        self.config.cache_budget = bytes;
        self
    }

    /// Set the upper bound on bytes buffered per batched-write chunk
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.max_batch_bytes = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
