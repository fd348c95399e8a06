//! Segment Writer
//!
//! Writes sorted records to a temporary rewrite output. Compaction seals
//! every output first and commits (renames) them as a second step, so a
//! crash mid-rewrite never leaves a half-written file under a live name.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::CacheBudget;
use crate::error::{io_at, Result};

use super::Segment;

/// Builder for one compaction output file
pub(crate) struct SegmentWriter {
    dir: PathBuf,
    first_key: i64,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    index: Vec<(i64, u64)>,
    index_interval: usize,
    records: usize,
}

impl SegmentWriter {
    /// Open the temporary output for a range starting at `first_key`
    pub fn create(dir: &Path, first_key: i64, index_interval: usize) -> Result<Self> {
        let tmp_path = Segment::tmp_path(dir, first_key);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(io_at(&tmp_path))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            first_key,
            tmp_path,
            writer: BufWriter::new(file),
            offset: 0,
            index: Vec::new(),
            index_interval,
            records: 0,
        })
    }

    /// Append one encoded record (must be called in ascending key order),
    /// sampling every Nth offset into the sparse index
    pub fn add(&mut self, key: i64, record: &[u8]) -> Result<()> {
        if self.records % self.index_interval == 0 {
            self.index.push((key, self.offset));
        }
        self.writer.write_all(record).map_err(io_at(&self.tmp_path))?;
        self.offset += record.len() as u64;
        self.records += 1;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Flush and fsync the temporary output; the file is complete on disk
    /// but not yet visible under its final name
    pub fn seal(self, last_key: i64) -> Result<SealedSegment> {
        let Self {
            dir,
            first_key,
            tmp_path,
            writer,
            offset,
            index,
            ..
        } = self;
        let file = writer
            .into_inner()
            .map_err(|e| io_at(&tmp_path)(e.into_error()))?;
        file.sync_all().map_err(io_at(&tmp_path))?;
        Ok(SealedSegment {
            dir,
            first_key,
            last_key,
            tmp_path,
            size: offset,
            index,
        })
    }
}

/// A fully written, fsynced rewrite output awaiting its atomic rename
pub(crate) struct SealedSegment {
    dir: PathBuf,
    first_key: i64,
    last_key: i64,
    tmp_path: PathBuf,
    size: u64,
    index: Vec<(i64, u64)>,
}

impl SealedSegment {
    pub fn first_key(&self) -> i64 {
        self.first_key
    }

    /// Rename the output over its final path and produce the live segment
    pub fn commit(self, budget: Arc<CacheBudget>) -> Result<Segment> {
        let final_path = Segment::data_path(&self.dir, self.first_key);
        fs::rename(&self.tmp_path, &final_path).map_err(io_at(&final_path))?;
        Ok(Segment {
            path: final_path,
            first_key: self.first_key,
            last_key: self.last_key,
            read_size: self.size,
            write_size: self.size,
            index: self.index,
            needs_sync: false,
            cache: Mutex::new(None),
            budget,
        })
    }
}
