//! Storage Engine Facade
//!
//! `Store` composes the partition map, segments, compactor, metadata
//! store, session guard and background scheduler into the table API
//! consumed by wrapping layers.
//!
//! ## Concurrency Model: per-partition many-readers / one-writer
//!
//! - Readers of a partition share its lock; a writer or the compactor
//!   excludes everyone, but only within that partition
//! - A single background thread ticks on a fixed interval: session-guard
//!   check, compaction sweep, partition splits, metadata flush
//! - Cache bytes are accounted on a shared atomic budget independent of
//!   partition locks
//!
//! ## Ordering
//!
//! Iteration yields strictly increasing keys inside each segment and
//! ascending segment ranges inside each partition, but partitions are
//! visited in creation order, so a full scan carries **no** global key
//! ordering guarantee.

mod compactor;
mod guard;
mod metadata;
mod scheduler;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::cache::{CacheBudget, PressureSource};
use crate::combine::Combinator;
use crate::config::Config;
use crate::error::{io_at, Result, StrataError};
use crate::partition::{Partition, PartitionCore, PartitionMap};
use crate::record::{self, ValueCodec};
use crate::segment::Segment;

use guard::SessionGuard;
use metadata::{MetaSnapshot, PartitionMeta, SegmentMeta};
use scheduler::Scheduler;

/// Unix millis, the clock used for the read/write activity hysteresis
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Table Trait
// =============================================================================

/// The table surface shared by the engine and the layers that wrap it.
///
/// Outer layers (an in-memory cache, a presence filter) implement this
/// trait by owning the layer underneath and delegating.
pub trait Table {
    type Value;

    fn read(&self, key: i64) -> Result<Option<Self::Value>>;
    fn write(&self, key: i64, value: Option<Self::Value>) -> Result<()>;
    fn write_many(&self, entries: Vec<(i64, Option<Self::Value>)>) -> Result<()>;
    fn approximate_size(&self) -> Result<u64>;
    fn exact_size(&self) -> Result<u64>;
    fn flush(&self) -> Result<()>;
    fn drop_all_data(&self) -> Result<()>;
    fn optimize_for_reading(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}

// =============================================================================
// Store Internals
// =============================================================================

/// State shared between the foreground API and the background thread
pub(crate) struct StoreInner<C, M>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    pub(crate) config: Config,
    pub(crate) codec: C,
    pub(crate) combinator: M,

    /// Key-to-partition routing; write-locked only to split or drop
    pub(crate) map: RwLock<PartitionMap>,

    /// Shared cache-byte budget for all segments
    pub(crate) budget: Arc<CacheBudget>,

    /// Claim on the storage directory, re-checked every tick
    pub(crate) guard: SessionGuard,

    pub(crate) closed: AtomicBool,
    pub(crate) conflicted: AtomicBool,

    /// Unix millis of the most recent read / write, driving the
    /// read-optimized vs. write-optimized compaction choice
    pub(crate) time_of_last_read: AtomicU64,
    pub(crate) time_of_last_write: AtomicU64,

    /// Writes arrived since the last persisted snapshot
    pub(crate) meta_dirty: AtomicBool,
}

impl<C, M> StoreInner<C, M>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.conflicted.load(Ordering::SeqCst) {
            return Err(StrataError::SessionConflict);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    fn locate(&self, key: i64) -> Arc<Partition> {
        self.map.read().locate(key)
    }

    fn touch_read(&self) {
        self.time_of_last_read.store(now_millis(), Ordering::Relaxed);
    }

    fn touch_write(&self) {
        self.time_of_last_write.store(now_millis(), Ordering::Relaxed);
        self.meta_dirty.store(true, Ordering::Release);
    }

    /// Append one encoded record to the segment owning `key`.
    fn append_one(&self, key: i64, buf: &[u8]) -> Result<()> {
        loop {
            let partition = self.locate(key);
            let mut core = partition.core().write();
            // a concurrent split may have moved the key to a sibling
            if !core.contains(key) {
                continue;
            }
            let idx = core.segment_index_for(key);
            let seg = &mut core.segments[idx];
            seg.append(buf)?;
            if seg.dirty_bytes() >= self.config.max_dirty_bytes {
                partition.set_needs_cleaning(true);
            }
            return Ok(());
        }
    }

    /// Append a pre-encoded chunk, taking each partition lock once and
    /// issuing one file append per touched segment.
    fn append_chunk(&self, chunk: Vec<(i64, Vec<u8>)>) -> Result<()> {
        let mut groups: Vec<(Arc<Partition>, Vec<(i64, Vec<u8>)>)> = Vec::new();
        for (key, buf) in chunk {
            let partition = self.locate(key);
            match groups.iter().position(|(p, _)| Arc::ptr_eq(p, &partition)) {
                Some(i) => groups[i].1.push((key, buf)),
                None => groups.push((partition, vec![(key, buf)])),
            }
        }
        for (partition, entries) in groups {
            let mut leftovers = Vec::new();
            {
                let mut core = partition.core().write();
                let mut per_segment: Vec<(usize, Vec<u8>)> = Vec::new();
                for (key, buf) in entries {
                    if !core.contains(key) {
                        leftovers.push((key, buf));
                        continue;
                    }
                    let idx = core.segment_index_for(key);
                    match per_segment.iter().position(|(i, _)| *i == idx) {
                        Some(slot) => per_segment[slot].1.extend_from_slice(&buf),
                        None => per_segment.push((idx, buf)),
                    }
                }
                for (idx, bytes) in per_segment {
                    let seg = &mut core.segments[idx];
                    seg.append(&bytes)?;
                    if seg.dirty_bytes() >= self.config.max_dirty_bytes {
                        partition.set_needs_cleaning(true);
                    }
                }
            }
            // keys a concurrent split moved out of this partition
            for (key, buf) in leftovers {
                self.append_one(key, &buf)?;
            }
        }
        Ok(())
    }

    /// All live entries of one partition, folded and tombstone-filtered,
    /// in ascending key order per segment.
    pub(crate) fn partition_entries(&self, partition: &Partition) -> Result<Vec<(i64, C::Value)>> {
        let core = partition.core().read();
        let mut out = Vec::new();
        for seg in &core.segments {
            let records = seg.load_records(&self.codec)?;
            let folded = compactor::sort_and_fold(records, self.config.sort_buckets, &self.combinator);
            for (key, value) in folded {
                if let Some(value) = value {
                    out.push((key, value));
                }
            }
        }
        Ok(out)
    }

    /// Fsync every segment with unsynced appends and refresh the
    /// "needs cleaning" flags.
    fn sync_all(&self) -> Result<()> {
        let partitions: Vec<Arc<Partition>> = self.map.read().partitions().to_vec();
        for partition in partitions {
            let mut core = partition.core().write();
            let mut over_threshold = false;
            for seg in core.segments.iter_mut() {
                seg.sync_if_needed()?;
                if seg.dirty_bytes() >= self.config.max_dirty_bytes {
                    over_threshold = true;
                }
            }
            if over_threshold {
                partition.set_needs_cleaning(true);
            } else if core.segments.iter().all(|s| s.is_clean()) {
                partition.set_needs_cleaning(false);
            }
        }
        Ok(())
    }

    /// Serialize the current layout and persist it atomically.
    pub(crate) fn persist_metadata(&self) -> Result<()> {
        let snapshot = {
            let map = self.map.read();
            let partitions = map
                .partitions()
                .iter()
                .map(|p| {
                    let core = p.core().read();
                    PartitionMeta {
                        first_key: core.first_key,
                        last_key: core.last_key,
                        needs_cleaning: p.needs_cleaning(),
                        segments: core
                            .segments
                            .iter()
                            .map(|s| SegmentMeta {
                                first_key: s.first_key(),
                                last_key: s.last_key(),
                                read_size: s.read_size(),
                                write_size: s.write_size(),
                                index: s.index().to_vec(),
                            })
                            .collect(),
                    }
                })
                .collect();
            MetaSnapshot {
                partitions,
                time_of_last_read: self.time_of_last_read.load(Ordering::Relaxed),
                time_of_last_write: self.time_of_last_write.load(Ordering::Relaxed),
            }
        };
        metadata::save(&self.config.data_dir, &snapshot)
    }
}

// =============================================================================
// Store
// =============================================================================

/// The partitioned append-log storage engine.
///
/// Generic over the value codec `C` and the combinator `M` resolving
/// concurrent writes to the same key.
pub struct Store<C, M>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    inner: Arc<StoreInner<C, M>>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl<C, M> Store<C, M>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    /// Open or create a store under `config.data_dir`.
    ///
    /// On startup:
    /// 1. Claim the directory (session lock file)
    /// 2. Remove stale rewrite outputs left by a crash
    /// 3. Load the metadata snapshot and validate it against the real
    ///    file lengths; reconstruct from filenames when it is stale
    /// 4. Start the background tick thread
    pub fn open(config: Config, codec: C, combinator: M) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir).map_err(io_at(&config.data_dir))?;
        let guard = SessionGuard::acquire(&config.data_dir)?;
        metadata::remove_stale_tmp_files(&config.data_dir)?;

        let budget = Arc::new(CacheBudget::new(config.cache_budget));
        let mut time_of_last_read = 0u64;
        let mut time_of_last_write = 0u64;

        let metas = match metadata::load(&config.data_dir) {
            Ok(Some(snapshot)) => {
                if metadata::validate(&config.data_dir, &snapshot)? {
                    info!(
                        partitions = snapshot.partitions.len(),
                        "metadata snapshot accepted"
                    );
                    time_of_last_read = snapshot.time_of_last_read;
                    time_of_last_write = snapshot.time_of_last_write;
                    snapshot.partitions
                } else {
                    info!("metadata snapshot is stale; reconstructing layout from data files");
                    metadata::reconstruct(&config.data_dir)?
                }
            }
            Ok(None) => metadata::reconstruct(&config.data_dir)?,
            Err(e) => {
                info!(error = %e, "metadata snapshot unreadable; reconstructing layout");
                metadata::reconstruct(&config.data_dir)?
            }
        };

        let mut partitions: Vec<Arc<Partition>> = Vec::new();
        if metas.is_empty() {
            let segment =
                Segment::create(&config.data_dir, i64::MIN, i64::MAX, Arc::clone(&budget))?;
            partitions.push(Arc::new(Partition::new(
                0,
                PartitionCore {
                    first_key: i64::MIN,
                    last_key: i64::MAX,
                    segments: vec![segment],
                },
            )));
        } else {
            let mut metas = metas;
            metas.sort_by_key(|p| p.first_key);
            for (slot, meta) in metas.into_iter().enumerate() {
                let segments = meta
                    .segments
                    .into_iter()
                    .map(|s| {
                        Segment::from_parts(
                            &config.data_dir,
                            s.first_key,
                            s.last_key,
                            s.read_size,
                            s.write_size,
                            s.index,
                            Arc::clone(&budget),
                        )
                    })
                    .collect();
                let partition = Arc::new(Partition::new(
                    slot,
                    PartitionCore {
                        first_key: meta.first_key,
                        last_key: meta.last_key,
                        segments,
                    },
                ));
                partition.set_needs_cleaning(meta.needs_cleaning);
                partitions.push(partition);
            }
        }

        let partition_count = partitions.len();
        let inner = Arc::new(StoreInner {
            config,
            codec,
            combinator,
            map: RwLock::new(PartitionMap::build(partitions)),
            budget,
            guard,
            closed: AtomicBool::new(false),
            conflicted: AtomicBool::new(false),
            time_of_last_read: AtomicU64::new(time_of_last_read),
            time_of_last_write: AtomicU64::new(time_of_last_write),
            meta_dirty: AtomicBool::new(false),
        });
        let scheduler = Scheduler::spawn(Arc::clone(&inner))?;
        info!(
            partitions = partition_count,
            session = inner.guard.session_id(),
            "store opened"
        );
        Ok(Self {
            inner,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Open with default configuration under `path`.
    pub fn open_path(path: &Path, codec: C, combinator: M) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config, codec, combinator)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the logical value for `key`; tombstones and absent keys both
    /// come back as `None`.
    pub fn read(&self, key: i64) -> Result<Option<C::Value>> {
        self.inner.ensure_open()?;
        let state = loop {
            let partition = self.inner.locate(key);
            // a partition past the dirty threshold is cleaned before the
            // read proceeds, so reads never scan an excessively dirty file
            if partition.needs_cleaning() {
                compactor::clean_partition(&self.inner, &partition, true)?;
            }
            let core = partition.core().read();
            if !core.contains(key) {
                continue;
            }
            let idx = core.segment_index_for(key);
            break core.segments[idx].lookup(&self.inner.codec, &self.inner.combinator, key)?;
        };
        self.inner.touch_read();
        Ok(state.flatten())
    }

    /// Multi-get optimized for ordered key batches: consecutive keys that
    /// land in the same partition share one lock acquisition. Returns the
    /// entries found, in input order; absent and tombstoned keys are
    /// skipped.
    pub fn read_keys<I>(&self, keys: I) -> Result<Vec<(i64, C::Value)>>
    where
        I: IntoIterator<Item = i64>,
    {
        self.inner.ensure_open()?;
        let keys: Vec<i64> = keys.into_iter().collect();
        let mut out = Vec::new();
        let mut i = 0;
        while i < keys.len() {
            let partition = self.inner.locate(keys[i]);
            if partition.needs_cleaning() {
                compactor::clean_partition(&self.inner, &partition, true)?;
            }
            let core = partition.core().read();
            if !core.contains(keys[i]) {
                continue;
            }
            while i < keys.len() && core.contains(keys[i]) {
                let idx = core.segment_index_for(keys[i]);
                let state =
                    core.segments[idx].lookup(&self.inner.codec, &self.inner.combinator, keys[i])?;
                if let Some(Some(value)) = state {
                    out.push((keys[i], value));
                }
                i += 1;
            }
        }
        self.inner.touch_read();
        Ok(out)
    }

    /// Iterate every live entry.
    ///
    /// Keys ascend within each partition; partitions are visited in
    /// creation order, so no global key ordering is guaranteed. Entries
    /// written concurrently with the scan may or may not be observed.
    pub fn iter_all(&self) -> Result<IterAll<C, M>> {
        self.inner.ensure_open()?;
        self.inner.touch_read();
        Ok(IterAll {
            inner: Arc::clone(&self.inner),
            slot: 0,
            buffered: Vec::new().into_iter(),
            failed: false,
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a value; `None` writes the tombstone.
    pub fn write(&self, key: i64, value: Option<C::Value>) -> Result<()> {
        self.inner.ensure_open()?;
        if let Some(v) = &value {
            self.inner.codec.check_writable(v)?;
        }
        let mut buf = Vec::new();
        record::encode_record(&self.inner.codec, key, value.as_ref(), &mut buf)?;
        self.inner.append_one(key, &buf)?;
        self.inner.touch_write();
        Ok(())
    }

    /// Batched write. Entries are grouped by target partition and segment
    /// to bound lock acquisitions and file-handle churn; the chunk size
    /// adapts to the observed bytes-per-entry so one chunk never buffers
    /// more than the configured batch byte bound.
    pub fn write_many<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (i64, Option<C::Value>)>,
    {
        self.inner.ensure_open()?;
        let mut entries = entries.into_iter();
        let mut chunk_len: usize = 256;
        let mut wrote = false;
        loop {
            let mut chunk: Vec<(i64, Vec<u8>)> = Vec::with_capacity(chunk_len);
            let mut bytes = 0usize;
            while chunk.len() < chunk_len && bytes < self.inner.config.max_batch_bytes {
                match entries.next() {
                    Some((key, value)) => {
                        if let Some(v) = &value {
                            self.inner.codec.check_writable(v)?;
                        }
                        let mut buf = Vec::new();
                        record::encode_record(&self.inner.codec, key, value.as_ref(), &mut buf)?;
                        bytes += buf.len();
                        chunk.push((key, buf));
                    }
                    None => break,
                }
            }
            if chunk.is_empty() {
                break;
            }
            let count = chunk.len();
            self.inner.append_chunk(chunk)?;
            wrote = true;
            let avg = (bytes / count).max(1);
            chunk_len = (self.inner.config.max_batch_bytes / avg).clamp(1, 4096);
        }
        if wrote {
            self.inner.touch_write();
        }
        Ok(())
    }

    // =========================================================================
    // Sizes
    // =========================================================================

    /// Sampling-based estimate of the entry count. Stable across repeated
    /// calls when no write intervenes; dirty duplicates may inflate it.
    pub fn approximate_size(&self) -> Result<u64> {
        self.inner.ensure_open()?;
        let partitions: Vec<Arc<Partition>> = self.inner.map.read().partitions().to_vec();
        let mut total = 0u64;
        for partition in partitions {
            let core = partition.core().read();
            for seg in &core.segments {
                total += seg.estimate_records(&self.inner.codec)?;
            }
        }
        Ok(total)
    }

    /// Exact live entry count; performs a full scan.
    pub fn exact_size(&self) -> Result<u64> {
        self.inner.ensure_open()?;
        let partitions: Vec<Arc<Partition>> = self.inner.map.read().partitions().to_vec();
        let mut total = 0u64;
        for partition in partitions {
            total += self.inner.partition_entries(&partition)?.len() as u64;
        }
        Ok(total)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Make every previously issued write durable and persist a fresh
    /// metadata snapshot. Subsequent reads and scans observe all of them.
    pub fn flush(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.meta_dirty.store(false, Ordering::Release);
        self.inner.sync_all()?;
        self.inner.persist_metadata()?;
        Ok(())
    }

    /// Delete every entry and reset to a single empty partition.
    pub fn drop_all_data(&self) -> Result<()> {
        self.inner.ensure_open()?;
        {
            let mut map = self.inner.map.write();
            for partition in map.partitions() {
                let mut core = partition.core().write();
                for seg in core.segments.drain(..) {
                    fs::remove_file(seg.path()).map_err(io_at(seg.path()))?;
                }
                // defunct: in-flight callers holding this partition see an
                // empty range and re-locate through the fresh map
                core.first_key = 0;
                core.last_key = -1;
                partition.set_needs_cleaning(false);
            }
            let segment = Segment::create(
                &self.inner.config.data_dir,
                i64::MIN,
                i64::MAX,
                Arc::clone(&self.inner.budget),
            )?;
            let partition = Arc::new(Partition::new(
                0,
                PartitionCore {
                    first_key: i64::MIN,
                    last_key: i64::MAX,
                    segments: vec![segment],
                },
            ));
            *map = PartitionMap::build(vec![partition]);
        }
        info!("all data dropped");
        self.inner.persist_metadata()?;
        Ok(())
    }

    /// Force a full read-optimized compaction of every partition.
    pub fn optimize_for_reading(&self) -> Result<()> {
        self.inner.ensure_open()?;
        let partitions: Vec<Arc<Partition>> = self.inner.map.read().partitions().to_vec();
        for partition in &partitions {
            compactor::clean_partition(&self.inner, partition, true)?;
        }
        self.inner.persist_metadata()?;
        Ok(())
    }

    /// Close the store: stop the background thread, run a final forced
    /// compaction, fsync everything and persist a final snapshot.
    /// Idempotent; every other operation on a closed store fails.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            if let Some(scheduler) = self.scheduler.lock().take() {
                scheduler.stop();
            }
            return Ok(());
        }
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
        if self.inner.conflicted.load(Ordering::SeqCst) {
            // the directory belongs to another session now; touch nothing
            return Ok(());
        }
        let partitions: Vec<Arc<Partition>> = self.inner.map.read().partitions().to_vec();
        for partition in &partitions {
            compactor::clean_partition(&self.inner, partition, true)?;
        }
        self.inner.sync_all()?;
        self.inner.persist_metadata()?;
        info!("store closed");
        Ok(())
    }

    // =========================================================================
    // Cache / Memory Pressure
    // =========================================================================

    /// Register the memory-pressure source consulted before cache fills.
    pub fn set_pressure_source(&self, source: PressureSource) {
        self.inner.budget.set_pressure_source(source);
    }

    /// Drop every cached segment content. Safe at any time; affects only
    /// performance.
    pub fn discard_caches(&self) {
        let partitions: Vec<Arc<Partition>> = self.inner.map.read().partitions().to_vec();
        for partition in partitions {
            let core = partition.core().read();
            for seg in &core.segments {
                seg.drop_cache();
            }
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn partition_count(&self) -> usize {
        self.inner.map.read().len()
    }

    pub fn segment_count(&self) -> usize {
        let map = self.inner.map.read();
        map.partitions()
            .iter()
            .map(|p| p.core().read().segments.len())
            .sum()
    }

    /// Total bytes currently sitting in unsorted dirty suffixes
    pub fn dirty_bytes(&self) -> u64 {
        let map = self.inner.map.read();
        map.partitions()
            .iter()
            .map(|p| {
                p.core()
                    .read()
                    .segments
                    .iter()
                    .map(|s| s.dirty_bytes())
                    .sum::<u64>()
            })
            .sum()
    }

    /// Bytes of segment content currently held in memory
    pub fn cached_bytes(&self) -> u64 {
        self.inner.budget.used()
    }
}

impl<C, M> Drop for Store<C, M>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    fn drop(&mut self) {
        if !self.inner.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                error!(error = %e, "close on drop failed");
            }
        } else if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
    }
}

impl<C, M> Table for Store<C, M>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    type Value = C::Value;

    fn read(&self, key: i64) -> Result<Option<C::Value>> {
        Store::read(self, key)
    }

    fn write(&self, key: i64, value: Option<C::Value>) -> Result<()> {
        Store::write(self, key, value)
    }

    fn write_many(&self, entries: Vec<(i64, Option<C::Value>)>) -> Result<()> {
        Store::write_many(self, entries)
    }

    fn approximate_size(&self) -> Result<u64> {
        Store::approximate_size(self)
    }

    fn exact_size(&self) -> Result<u64> {
        Store::exact_size(self)
    }

    fn flush(&self) -> Result<()> {
        Store::flush(self)
    }

    fn drop_all_data(&self) -> Result<()> {
        Store::drop_all_data(self)
    }

    fn optimize_for_reading(&self) -> Result<()> {
        Store::optimize_for_reading(self)
    }

    fn close(&self) -> Result<()> {
        Store::close(self)
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Iterator over every live entry, buffering one partition at a time so
/// no partition lock is held across yields.
pub struct IterAll<C, M>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    inner: Arc<StoreInner<C, M>>,
    slot: usize,
    buffered: std::vec::IntoIter<(i64, C::Value)>,
    failed: bool,
}

impl<C, M> Iterator for IterAll<C, M>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    type Item = Result<(i64, C::Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffered.next() {
                return Some(Ok(entry));
            }
            if self.failed {
                return None;
            }
            let partition = {
                let map = self.inner.map.read();
                if self.slot >= map.len() {
                    return None;
                }
                Arc::clone(&map.partitions()[self.slot])
            };
            self.slot += 1;
            match self.inner.partition_entries(&partition) {
                Ok(entries) => self.buffered = entries.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
