//! Metadata Store & Recovery
//!
//! Persists a point-in-time snapshot of the partition/segment layout so a
//! restart does not need to rescan and recompact the whole directory.
//!
//! ## Snapshot Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Magic: "SKVM" (4) | Version: u16 (2) | PayloadLen: u64  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Payload (bincode-serialized MetaSnapshot)               │
//! ├─────────────────────────────────────────────────────────┤
//! │ CRC32 of payload (4)                                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! A snapshot is accepted only when every recorded segment size matches
//! the physical file length; otherwise the layout is reconstructed purely
//! from filenames and sizes, with all segments treated as fully dirty.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{io_at, Result, StrataError};
use crate::segment::Segment;

/// Snapshot file name inside the data directory
pub(crate) const META_FILE: &str = "META";

/// Temporary snapshot output, atomically renamed over [`META_FILE`]
const TMP_META_FILE: &str = "tmp.META";

/// Magic bytes identifying a stratakv metadata snapshot
const MAGIC: &[u8; 4] = b"SKVM";

/// Current snapshot format version
const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + PayloadLen (8) = 14 bytes
const HEADER_SIZE: usize = 14;

// =============================================================================
// Snapshot Types
// =============================================================================

/// Point-in-time serialization of the whole store layout
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MetaSnapshot {
    /// Partitions in arena slot order
    pub partitions: Vec<PartitionMeta>,

    /// Unix millis of the most recent read / write
    pub time_of_last_read: u64,
    pub time_of_last_write: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PartitionMeta {
    pub first_key: i64,
    pub last_key: i64,
    pub needs_cleaning: bool,
    pub segments: Vec<SegmentMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SegmentMeta {
    pub first_key: i64,
    pub last_key: i64,
    pub read_size: u64,
    pub write_size: u64,
    pub index: Vec<(i64, u64)>,
}

// =============================================================================
// Save / Load
// =============================================================================

/// Serialize and atomically persist a snapshot
pub(crate) fn save(dir: &Path, snapshot: &MetaSnapshot) -> Result<()> {
    let payload = bincode::serialize(snapshot)
        .map_err(|e| StrataError::Metadata(format!("serialize failed: {}", e)))?;
    let crc = crc32fast::hash(&payload);

    let tmp = dir.join(TMP_META_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .map_err(io_at(&tmp))?;
    file.write_all(MAGIC).map_err(io_at(&tmp))?;
    file.write_all(&VERSION.to_le_bytes()).map_err(io_at(&tmp))?;
    file.write_all(&(payload.len() as u64).to_le_bytes())
        .map_err(io_at(&tmp))?;
    file.write_all(&payload).map_err(io_at(&tmp))?;
    file.write_all(&crc.to_le_bytes()).map_err(io_at(&tmp))?;
    file.sync_all().map_err(io_at(&tmp))?;
    drop(file);

    let path = dir.join(META_FILE);
    fs::rename(&tmp, &path).map_err(io_at(&path))?;
    Ok(())
}

/// Load the persisted snapshot; `None` when no snapshot exists.
/// Any framing or checksum mismatch is an error the caller treats as
/// "stale snapshot, rebuild".
pub(crate) fn load(dir: &Path) -> Result<Option<MetaSnapshot>> {
    let path = dir.join(META_FILE);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_at(&path)(e)),
    };

    if data.len() < HEADER_SIZE + 4 {
        return Err(StrataError::Metadata("snapshot too short".to_string()));
    }
    if &data[0..4] != MAGIC {
        return Err(StrataError::Metadata("bad snapshot magic".to_string()));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != VERSION {
        return Err(StrataError::Metadata(format!(
            "unsupported snapshot version {}",
            version
        )));
    }
    let mut len_raw = [0u8; 8];
    len_raw.copy_from_slice(&data[6..14]);
    let payload_len = u64::from_le_bytes(len_raw) as usize;
    if data.len() != HEADER_SIZE + payload_len + 4 {
        return Err(StrataError::Metadata("snapshot length mismatch".to_string()));
    }

    let payload = &data[HEADER_SIZE..HEADER_SIZE + payload_len];
    let mut crc_raw = [0u8; 4];
    crc_raw.copy_from_slice(&data[HEADER_SIZE + payload_len..]);
    if crc32fast::hash(payload) != u32::from_le_bytes(crc_raw) {
        return Err(StrataError::Metadata("snapshot checksum mismatch".to_string()));
    }

    let snapshot = bincode::deserialize(payload)
        .map_err(|e| StrataError::Metadata(format!("deserialize failed: {}", e)))?;
    Ok(Some(snapshot))
}

// =============================================================================
// Validation
// =============================================================================

/// Check a loaded snapshot against the actual directory contents.
///
/// Valid means: every data file on disk is recorded with a matching byte
/// length, every recorded segment exists, dirty/clean state is internally
/// consistent, and partitions tile the full key space.
pub(crate) fn validate(dir: &Path, snapshot: &MetaSnapshot) -> Result<bool> {
    let disk = list_data_files(dir)?;

    let mut recorded = 0usize;
    for part in &snapshot.partitions {
        if part.segments.is_empty() {
            debug!(first_key = part.first_key, "snapshot partition has no segments");
            return Ok(false);
        }
        // Segments must tile the partition's range exactly
        let mut seg_first = part.first_key;
        for seg in &part.segments {
            if seg.first_key != seg_first || seg.read_size > seg.write_size {
                return Ok(false);
            }
            match disk.iter().find(|(k, _)| *k == seg.first_key) {
                Some((_, len)) if *len == seg.write_size => {}
                _ => {
                    debug!(first_key = seg.first_key, "recorded segment size disagrees with disk");
                    return Ok(false);
                }
            }
            recorded += 1;
            seg_first = match seg.last_key.checked_add(1) {
                Some(next) => next,
                None => i64::MIN, // wraps only past the final segment
            };
        }
        if part.segments.last().map(|s| s.last_key) != Some(part.last_key) {
            return Ok(false);
        }
    }

    // A file on disk the snapshot does not know about invalidates it too
    if recorded != disk.len() {
        debug!(
            recorded,
            on_disk = disk.len(),
            "snapshot does not cover all data files"
        );
        return Ok(false);
    }

    // Partitions are recorded in arena slot order (not key order), so the
    // key-space tiling is checked on a sorted view
    let mut ranges: Vec<(i64, i64)> = snapshot
        .partitions
        .iter()
        .map(|p| (p.first_key, p.last_key))
        .collect();
    ranges.sort_by_key(|(first, _)| *first);
    let mut expected_first = i64::MIN;
    for (i, (first, last)) in ranges.iter().enumerate() {
        if *first != expected_first || last < first {
            return Ok(false);
        }
        expected_first = match last.checked_add(1) {
            Some(next) => next,
            None => return Ok(i == ranges.len() - 1),
        };
    }
    Ok(false) // key space not covered up to MAX
}

// =============================================================================
// Reconstruction
// =============================================================================

/// Rebuild the layout purely from filenames and sizes on disk.
///
/// The sparse index and clean state are lost; every segment comes back
/// fully dirty and is rebuilt by a forced compaction on first read.
pub(crate) fn reconstruct(dir: &Path) -> Result<Vec<PartitionMeta>> {
    let mut files = list_data_files(dir)?;
    files.sort_by_key(|(k, _)| *k);
    if files.is_empty() {
        return Ok(Vec::new());
    }

    // The lowest segment must anchor the key space; a missing anchor means
    // manual tampering, so the lowest file takes over the full lower range
    if files[0].0 != i64::MIN {
        let old = Segment::data_path(dir, files[0].0);
        let new = Segment::data_path(dir, i64::MIN);
        warn!(
            from = %old.display(),
            "lowest segment does not start at the key-space minimum; renaming"
        );
        fs::rename(&old, &new).map_err(io_at(&new))?;
        files[0].0 = i64::MIN;
    }

    let mut partitions = Vec::with_capacity(files.len());
    for (i, (first_key, len)) in files.iter().enumerate() {
        let last_key = match files.get(i + 1) {
            Some((next, _)) => next - 1,
            None => i64::MAX,
        };
        partitions.push(PartitionMeta {
            first_key: *first_key,
            last_key,
            needs_cleaning: *len > 0,
            segments: vec![SegmentMeta {
                first_key: *first_key,
                last_key,
                read_size: 0,
                write_size: *len,
                index: Vec::new(),
            }],
        });
    }
    Ok(partitions)
}

/// All (first_key, byte length) pairs of data files in the directory.
/// Non-segment files (META, LOCK, tmp.*, foreign files) are ignored.
fn list_data_files(dir: &Path) -> Result<Vec<(i64, u64)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_at(dir))? {
        let entry = entry.map_err(io_at(dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if let Ok(first_key) = name.parse::<i64>() {
            let len = entry.metadata().map_err(io_at(&path))?.len();
            files.push((first_key, len));
        }
    }
    Ok(files)
}

/// Delete stale `tmp.*` rewrite outputs left behind by a crash
pub(crate) fn remove_stale_tmp_files(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(io_at(dir))? {
        let entry = entry.map_err(io_at(dir))?;
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if path.is_file() && name.starts_with("tmp.") {
            debug!(file = %path.display(), "removing stale rewrite output");
            fs::remove_file(&path).map_err(io_at(&path))?;
        }
    }
    Ok(())
}
