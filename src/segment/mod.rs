//! Segment Module
//!
//! The physical storage unit inside a partition: an append-only file with a
//! sorted "clean" prefix and an unsorted "dirty" suffix.
//!
//! ## File Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Clean Region [0, read_size)                             │
//! │   records sorted ascending by key, one record per key,  │
//! │   covered by the sparse index                           │
//! ├─────────────────────────────────────────────────────────┤
//! │ Dirty Suffix [read_size, write_size)                    │
//! │   unordered append log, oldest first, may repeat keys   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! A segment file is named by the decimal `first_key` of its range.
//! Compaction rewrites go to a `tmp.`-prefixed sibling that is atomically
//! renamed over the target.

mod writer;

pub(crate) use writer::{SealedSegment, SegmentWriter};

use std::cmp::Ordering as CmpOrdering;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::cache::CacheBudget;
use crate::combine::{self, Combinator};
use crate::error::{corrupt, io_at, Result, StrataError};
use crate::record::{self, ValueCodec, KEY_LEN};

/// Bytes read from the front of a segment when estimating record width
const SAMPLE_WINDOW: u64 = 2048;

/// Records sampled when estimating record width
const SAMPLE_RECORDS: usize = 16;

/// One append-only storage file covering a contiguous key range
pub struct Segment {
    /// Physical file path (decimal `first_key` inside the data dir)
    path: PathBuf,

    /// Inclusive key range covered by this segment
    first_key: i64,
    last_key: i64,

    /// Byte length of the sorted clean prefix
    read_size: u64,

    /// Current total appended byte length; `write_size >= read_size`
    write_size: u64,

    /// Sampled (key, offset) pairs over the clean prefix
    index: Vec<(i64, u64)>,

    /// Appends since the last fsync
    needs_sync: bool,

    /// Opportunistic whole-file cache, charged against the shared budget
    cache: Mutex<Option<Bytes>>,
    budget: Arc<CacheBudget>,
}

impl Segment {
    // =========================================================================
    // Naming
    // =========================================================================

    /// Path of the segment file for a range starting at `first_key`
    pub(crate) fn data_path(dir: &Path, first_key: i64) -> PathBuf {
        dir.join(first_key.to_string())
    }

    /// Path of the temporary rewrite output for a range starting at `first_key`
    pub(crate) fn tmp_path(dir: &Path, first_key: i64) -> PathBuf {
        dir.join(format!("tmp.{}", first_key))
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a brand-new empty segment and its physical file
    pub(crate) fn create(
        dir: &Path,
        first_key: i64,
        last_key: i64,
        budget: Arc<CacheBudget>,
    ) -> Result<Self> {
        let path = Self::data_path(dir, first_key);
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(io_at(&path))?;
        Ok(Self {
            path,
            first_key,
            last_key,
            read_size: 0,
            write_size: 0,
            index: Vec::new(),
            needs_sync: false,
            cache: Mutex::new(None),
            budget,
        })
    }

    /// Rehydrate a segment from persisted metadata (no I/O)
    pub(crate) fn from_parts(
        dir: &Path,
        first_key: i64,
        last_key: i64,
        read_size: u64,
        write_size: u64,
        index: Vec<(i64, u64)>,
        budget: Arc<CacheBudget>,
    ) -> Self {
        Self {
            path: Self::data_path(dir, first_key),
            first_key,
            last_key,
            read_size,
            write_size,
            index,
            needs_sync: false,
            cache: Mutex::new(None),
            budget,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn first_key(&self) -> i64 {
        self.first_key
    }

    pub fn last_key(&self) -> i64 {
        self.last_key
    }

    pub fn read_size(&self) -> u64 {
        self.read_size
    }

    pub fn write_size(&self) -> u64 {
        self.write_size
    }

    pub fn is_clean(&self) -> bool {
        self.read_size == self.write_size
    }

    /// Bytes in the unsorted dirty suffix
    pub fn dirty_bytes(&self) -> u64 {
        self.write_size - self.read_size
    }

    pub fn contains(&self, key: i64) -> bool {
        self.first_key <= key && key <= self.last_key
    }

    pub(crate) fn index(&self) -> &[(i64, u64)] {
        &self.index
    }

    // =========================================================================
    // Write Side
    // =========================================================================

    /// Append pre-encoded records to the dirty suffix
    pub(crate) fn append(&mut self, encoded: &[u8]) -> Result<()> {
        if encoded.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_at(&self.path))?;
        file.write_all(encoded).map_err(io_at(&self.path))?;
        self.write_size += encoded.len() as u64;
        self.needs_sync = true;
        self.drop_cache();
        Ok(())
    }

    /// Fsync appended bytes if any arrived since the last sync
    pub(crate) fn sync_if_needed(&mut self) -> Result<()> {
        if !self.needs_sync {
            return Ok(());
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(io_at(&self.path))?;
        file.sync_all().map_err(io_at(&self.path))?;
        self.needs_sync = false;
        Ok(())
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Discard the cached file content, returning its bytes to the budget.
    /// Safe to call at any time; only affects performance.
    pub(crate) fn drop_cache(&self) {
        if let Some(cached) = self.cache.lock().take() {
            self.budget.release(cached.len() as u64);
        }
    }

    fn cached(&self) -> Option<Bytes> {
        self.cache.lock().clone()
    }

    /// Try to pull the whole file into the cache; `None` when the budget or
    /// the memory-pressure signal forbids it.
    fn try_fill_cache(&self) -> Result<Option<Bytes>> {
        if self.write_size == 0 || !self.budget.try_charge(self.write_size) {
            return Ok(None);
        }
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                self.budget.release(self.write_size);
                return Err(io_at(&self.path)(e));
            }
        };
        if data.len() as u64 != self.write_size {
            self.budget.release(self.write_size);
            return Err(corrupt(
                &self.path,
                format!(
                    "file length {} disagrees with recorded size {}",
                    data.len(),
                    self.write_size
                ),
            ));
        }
        let bytes = Bytes::from(data);
        let mut slot = self.cache.lock();
        if let Some(existing) = slot.as_ref() {
            // Another reader filled it first
            self.budget.release(self.write_size);
            return Ok(Some(existing.clone()));
        }
        *slot = Some(bytes.clone());
        Ok(Some(bytes))
    }

    /// Read `[start, end)` of the file, from cache when possible
    fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        debug_assert!(start <= end && end <= self.write_size);
        if start == end {
            return Ok(Bytes::new());
        }
        if let Some(all) = self.cached() {
            return Ok(all.slice(start as usize..end as usize));
        }
        if let Some(all) = self.try_fill_cache()? {
            return Ok(all.slice(start as usize..end as usize));
        }
        let mut file = File::open(&self.path).map_err(io_at(&self.path))?;
        file.seek(SeekFrom::Start(start)).map_err(io_at(&self.path))?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).map_err(io_at(&self.path))?;
        Ok(Bytes::from(buf))
    }

    // =========================================================================
    // Read Side
    // =========================================================================

    /// Offsets bounding the linear scan for `key` in the clean region.
    ///
    /// The sparse index is binary-searched for the largest sampled key
    /// `<= key`; the record, if present, lies before the next sample.
    fn clean_scan_bounds(&self, key: i64) -> (u64, u64) {
        if self.index.is_empty() {
            return (0, self.read_size);
        }
        match self.index.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(i) => {
                let end = self.index.get(i + 1).map(|e| e.1).unwrap_or(self.read_size);
                (self.index[i].1, end)
            }
            // Key below the first sample (= smallest clean key): not present
            Err(0) => (0, self.index[0].1),
            Err(i) => {
                let end = self.index.get(i).map(|e| e.1).unwrap_or(self.read_size);
                (self.index[i - 1].1, end)
            }
        }
    }

    /// Fold every record for `key` into one logical result.
    ///
    /// Returns `None` when no record exists; `Some(None)` is a tombstone.
    /// The clean region contributes at most one record; every match in the
    /// dirty suffix is folded through the combinator in append order.
    pub(crate) fn lookup<C, M>(
        &self,
        codec: &C,
        combinator: &M,
        key: i64,
    ) -> Result<Option<Option<C::Value>>>
    where
        C: ValueCodec,
        M: Combinator<C::Value>,
    {
        let target = record::key_bytes(key);
        let mut state: Option<Option<C::Value>> = None;

        // Clean region: sorted, leading-byte skip scan with early exit
        if self.read_size > 0 {
            let (start, end) = self.clean_scan_bounds(key);
            let buf = self.read_range(start, end)?;
            let mut pos = 0usize;
            while pos < buf.len() {
                let rest = &buf[pos..];
                if rest.len() < KEY_LEN {
                    return Err(corrupt(&self.path, "record straddles clean region bound"));
                }
                if rest[0] > target[0] {
                    break;
                }
                if rest[0] == target[0] {
                    match rest[..KEY_LEN].cmp(&target[..]) {
                        CmpOrdering::Greater => break,
                        CmpOrdering::Equal => {
                            let (value, _) =
                                codec.decode(&rest[KEY_LEN..]).map_err(|e| self.tag(e))?;
                            state = Some(value);
                            break;
                        }
                        CmpOrdering::Less => {}
                    }
                }
                pos += KEY_LEN + codec.skip(&rest[KEY_LEN..]).map_err(|e| self.tag(e))?;
            }
        }

        // Dirty suffix: unordered, must be scanned to the end
        if self.write_size > self.read_size {
            let buf = self.read_range(self.read_size, self.write_size)?;
            let mut pos = 0usize;
            while pos < buf.len() {
                let rest = &buf[pos..];
                if rest.len() < KEY_LEN {
                    return Err(corrupt(&self.path, "truncated record in dirty suffix"));
                }
                let len = KEY_LEN + codec.skip(&rest[KEY_LEN..]).map_err(|e| self.tag(e))?;
                if rest[0] == target[0] && rest[..KEY_LEN] == target[..] {
                    let (value, _) = codec.decode(&rest[KEY_LEN..]).map_err(|e| self.tag(e))?;
                    state = combine::fold(combinator, state, value);
                }
                pos += len;
            }
        }

        Ok(state)
    }

    /// Decode every record in file order (clean prefix, then dirty suffix)
    pub(crate) fn load_records<C: ValueCodec>(
        &self,
        codec: &C,
    ) -> Result<Vec<(i64, Option<C::Value>)>> {
        let buf = self.read_range(0, self.write_size)?;
        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < buf.len() {
            let (key, value, consumed) =
                record::decode_record(codec, &buf[pos..]).map_err(|e| self.tag(e))?;
            records.push((key, value));
            pos += consumed;
        }
        Ok(records)
    }

    /// Sampling-based estimate of the record count.
    ///
    /// Average record width is measured over a fixed prefix, so repeated
    /// calls without intervening writes return the same value.
    pub(crate) fn estimate_records<C: ValueCodec>(&self, codec: &C) -> Result<u64> {
        if self.write_size == 0 {
            return Ok(0);
        }
        let end = self.write_size.min(SAMPLE_WINDOW);
        let buf = self.read_range(0, end)?;
        let mut pos = 0usize;
        let mut sampled = 0u64;
        while pos < buf.len() && sampled < SAMPLE_RECORDS as u64 {
            match record::record_len(codec, &buf[pos..]) {
                Ok(len) if pos + len <= buf.len() => {
                    pos += len;
                    sampled += 1;
                }
                // Record extends past the sample window: stop measuring
                _ => break,
            }
        }
        if sampled == 0 {
            return Ok(1);
        }
        let avg = (pos as u64 / sampled).max(1);
        Ok(self.write_size.div_ceil(avg))
    }

    /// Attach the file path to codec-level decode failures
    fn tag(&self, e: StrataError) -> StrataError {
        match e {
            StrataError::Codec(detail) => corrupt(&self.path, detail),
            other => other,
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // Return any cached bytes to the shared budget
        self.drop_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{encode_record, I64Codec};
    use crate::combine::Adder;
    use tempfile::TempDir;

    fn budget() -> Arc<CacheBudget> {
        Arc::new(CacheBudget::new(1024 * 1024))
    }

    fn encoded(key: i64, value: Option<i64>) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_record(&I64Codec, key, value.as_ref(), &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_append_grows_dirty_suffix() {
        let tmp = TempDir::new().unwrap();
        let mut seg = Segment::create(tmp.path(), i64::MIN, i64::MAX, budget()).unwrap();

        assert!(seg.is_clean());
        seg.append(&encoded(1, Some(10))).unwrap();
        assert_eq!(seg.write_size(), 16);
        assert_eq!(seg.read_size(), 0);
        assert_eq!(seg.dirty_bytes(), 16);
        assert!(!seg.is_clean());
    }

    #[test]
    fn test_lookup_folds_dirty_records_in_append_order() {
        let tmp = TempDir::new().unwrap();
        let mut seg = Segment::create(tmp.path(), i64::MIN, i64::MAX, budget()).unwrap();

        seg.append(&encoded(7, Some(1))).unwrap();
        seg.append(&encoded(7, Some(2))).unwrap();
        seg.append(&encoded(8, Some(100))).unwrap();

        let state = seg.lookup(&I64Codec, &Adder, 7).unwrap();
        assert_eq!(state, Some(Some(3)));
        let state = seg.lookup(&I64Codec, &Adder, 8).unwrap();
        assert_eq!(state, Some(Some(100)));
        let state = seg.lookup(&I64Codec, &Adder, 9).unwrap();
        assert_eq!(state, None);
    }

    #[test]
    fn test_lookup_tombstone_replaces_in_dirty_suffix() {
        let tmp = TempDir::new().unwrap();
        let mut seg = Segment::create(tmp.path(), i64::MIN, i64::MAX, budget()).unwrap();

        seg.append(&encoded(7, Some(5))).unwrap();
        seg.append(&encoded(7, None)).unwrap();
        seg.append(&encoded(7, Some(2))).unwrap();

        // delete-then-write behaves as overwrite, not a combine with 5
        let state = seg.lookup(&I64Codec, &Adder, 7).unwrap();
        assert_eq!(state, Some(Some(2)));
    }

    #[test]
    fn test_load_records_preserves_file_order() {
        let tmp = TempDir::new().unwrap();
        let mut seg = Segment::create(tmp.path(), i64::MIN, i64::MAX, budget()).unwrap();

        seg.append(&encoded(3, Some(30))).unwrap();
        seg.append(&encoded(1, Some(10))).unwrap();
        seg.append(&encoded(3, None)).unwrap();

        let records = seg.load_records(&I64Codec).unwrap();
        assert_eq!(records, vec![(3, Some(30)), (1, Some(10)), (3, None)]);
    }

    #[test]
    fn test_estimate_records_is_stable() {
        let tmp = TempDir::new().unwrap();
        let mut seg = Segment::create(tmp.path(), i64::MIN, i64::MAX, budget()).unwrap();

        let mut batch = Vec::new();
        for key in 0..100 {
            batch.extend_from_slice(&encoded(key, Some(key)));
        }
        seg.append(&batch).unwrap();

        let first = seg.estimate_records(&I64Codec).unwrap();
        let second = seg.estimate_records(&I64Codec).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, 100);
    }

    #[test]
    fn test_cache_accounting_on_drop() {
        let tmp = TempDir::new().unwrap();
        let shared = budget();
        let mut seg =
            Segment::create(tmp.path(), i64::MIN, i64::MAX, Arc::clone(&shared)).unwrap();
        seg.append(&encoded(1, Some(1))).unwrap();

        // lookup pulls the file into cache
        seg.lookup(&I64Codec, &Adder, 1).unwrap();
        assert_eq!(shared.used(), 16);

        drop(seg);
        assert_eq!(shared.used(), 0);
    }
}
