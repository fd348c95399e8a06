//! Partition Map
//!
//! Routes a 64-bit key to exactly one partition: a contiguous, non-
//! overlapping key range with its own lock, segment list and compaction
//! state. Partitions form a binary tree held in an arena of nodes
//! addressed by index, so splitting never rewires parent pointers.
//!
//! ## Concurrency
//! - The map itself sits behind a `RwLock` in the store; `locate` runs
//!   under a read guard and hands out an `Arc<Partition>`
//! - Each partition owns a many-readers/one-writer lock over its core
//!   (readers share, a writer or the compactor excludes everyone;
//!   the compactor uses `try_write` to stay non-blocking)
//! - After acquiring a partition lock, callers re-check that the key is
//!   still inside the partition's range: a concurrent split may have
//!   moved it to a sibling

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StrataError};
use crate::segment::Segment;

// =============================================================================
// Partition
// =============================================================================

/// Mutable core of a partition, guarded by the partition lock
pub struct PartitionCore {
    /// Inclusive key range; empty (`first > last`) only after drop-all
    pub first_key: i64,
    pub last_key: i64,

    /// Segments ordered by `first_key`, exactly tiling the range
    pub segments: Vec<Segment>,
}

impl PartitionCore {
    pub fn contains(&self, key: i64) -> bool {
        self.first_key <= key && key <= self.last_key
    }

    /// Index of the segment whose range holds `key`.
    ///
    /// Callers check `contains` first; the first segment always starts at
    /// `first_key`, so the search cannot miss.
    pub fn segment_index_for(&self, key: i64) -> usize {
        debug_assert!(self.contains(key));
        match self
            .segments
            .binary_search_by(|s| s.first_key().cmp(&key))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    /// Total appended bytes across all segments
    pub fn total_write_size(&self) -> u64 {
        self.segments.iter().map(|s| s.write_size()).sum()
    }

    /// Largest dirty suffix across all segments
    pub fn max_dirty_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.dirty_bytes()).max().unwrap_or(0)
    }
}

/// One independently locked and compacted key range
pub struct Partition {
    /// Arena slot, stable for the partition's lifetime (used in logs)
    slot: usize,

    /// "Needs cleaning before read": set when a segment's dirty suffix
    /// grows past the configured threshold; checked lock-free by readers
    needs_cleaning: AtomicBool,

    core: RwLock<PartitionCore>,
}

impl Partition {
    pub fn new(slot: usize, core: PartitionCore) -> Self {
        Self {
            slot,
            needs_cleaning: AtomicBool::new(false),
            core: RwLock::new(core),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn needs_cleaning(&self) -> bool {
        self.needs_cleaning.load(Ordering::Acquire)
    }

    pub fn set_needs_cleaning(&self, flag: bool) {
        self.needs_cleaning.store(flag, Ordering::Release);
    }

    pub fn core(&self) -> &RwLock<PartitionCore> {
        &self.core
    }
}

// =============================================================================
// Partition Map
// =============================================================================

/// Arena node: a leaf names a partition slot, an interior node splits the
/// key space at `key` (keys `< key` go left)
enum Node {
    Leaf { partition: usize },
    Split { key: i64, left: usize, right: usize },
}

/// Key-to-partition routing tree over an arena of nodes
pub struct PartitionMap {
    nodes: Vec<Node>,
    root: usize,
    partitions: Vec<Arc<Partition>>,
}

impl PartitionMap {
    /// Build a balanced routing tree over partitions sorted by range.
    ///
    /// The partitions must tile the full key space; slot order must match
    /// the vector order.
    pub fn build(partitions: Vec<Arc<Partition>>) -> Self {
        debug_assert!(!partitions.is_empty());
        let mut map = Self {
            nodes: Vec::with_capacity(partitions.len() * 2),
            root: 0,
            partitions,
        };
        map.root = map.build_node(0, map.partitions.len());
        map
    }

    fn build_node(&mut self, lo: usize, hi: usize) -> usize {
        if hi - lo == 1 {
            self.nodes.push(Node::Leaf { partition: lo });
            return self.nodes.len() - 1;
        }
        let mid = (lo + hi) / 2;
        let split_key = self.partitions[mid].core().read().first_key;
        let left = self.build_node(lo, mid);
        let right = self.build_node(mid, hi);
        self.nodes.push(Node::Split {
            key: split_key,
            left,
            right,
        });
        self.nodes.len() - 1
    }

    /// Route a key to its partition; total over the whole `i64` space
    pub fn locate(&self, key: i64) -> Arc<Partition> {
        let mut node = self.root;
        loop {
            match &self.nodes[node] {
                Node::Leaf { partition } => return Arc::clone(&self.partitions[*partition]),
                Node::Split { key: split, left, right } => {
                    node = if key < *split { *left } else { *right };
                }
            }
        }
    }

    /// All partitions in arena slot order (creation order, not key order)
    pub fn partitions(&self) -> &[Arc<Partition>] {
        &self.partitions
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Slot the next split will assign
    pub fn next_slot(&self) -> usize {
        self.partitions.len()
    }

    /// Replace the leaf for `slot` with a split node routing keys
    /// `>= split_key` to the freshly created `upper` partition
    pub fn split_leaf(
        &mut self,
        slot: usize,
        split_key: i64,
        upper: Arc<Partition>,
    ) -> Result<()> {
        debug_assert_eq!(upper.slot(), self.partitions.len());
        let leaf = self
            .nodes
            .iter()
            .position(|n| matches!(n, Node::Leaf { partition } if *partition == slot))
            .ok_or_else(|| {
                StrataError::Internal(format!("no leaf node for partition slot {}", slot))
            })?;

        let upper_slot = self.partitions.len();
        self.partitions.push(upper);

        self.nodes.push(Node::Leaf { partition: slot });
        let left = self.nodes.len() - 1;
        self.nodes.push(Node::Leaf { partition: upper_slot });
        let right = self.nodes.len() - 1;
        self.nodes[leaf] = Node::Split {
            key: split_key,
            left,
            right,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBudget;
    use tempfile::TempDir;

    fn partition(slot: usize, first: i64, last: i64) -> Arc<Partition> {
        Arc::new(Partition::new(
            slot,
            PartitionCore {
                first_key: first,
                last_key: last,
                segments: Vec::new(),
            },
        ))
    }

    #[test]
    fn test_locate_single_partition_covers_everything() {
        let map = PartitionMap::build(vec![partition(0, i64::MIN, i64::MAX)]);
        assert_eq!(map.locate(i64::MIN).slot(), 0);
        assert_eq!(map.locate(0).slot(), 0);
        assert_eq!(map.locate(i64::MAX).slot(), 0);
    }

    #[test]
    fn test_locate_respects_boundaries() {
        let map = PartitionMap::build(vec![
            partition(0, i64::MIN, -1),
            partition(1, 0, 999),
            partition(2, 1000, i64::MAX),
        ]);
        assert_eq!(map.locate(i64::MIN).slot(), 0);
        assert_eq!(map.locate(-1).slot(), 0);
        assert_eq!(map.locate(0).slot(), 1);
        assert_eq!(map.locate(999).slot(), 1);
        assert_eq!(map.locate(1000).slot(), 2);
        assert_eq!(map.locate(i64::MAX).slot(), 2);
    }

    #[test]
    fn test_split_leaf_routes_to_new_partition() {
        let mut map = PartitionMap::build(vec![partition(0, i64::MIN, i64::MAX)]);
        let upper = partition(1, 100, i64::MAX);
        map.split_leaf(0, 100, upper).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.locate(99).slot(), 0);
        assert_eq!(map.locate(100).slot(), 1);
        assert_eq!(map.locate(i64::MAX).slot(), 1);
    }

    #[test]
    fn test_segment_index_for_picks_covering_segment() {
        let tmp = TempDir::new().unwrap();
        let budget = Arc::new(CacheBudget::new(0));
        let mut segments = Vec::new();
        for (first, last) in [(i64::MIN, -1), (0, 49), (50, i64::MAX)] {
            segments.push(
                Segment::create(tmp.path(), first, last, Arc::clone(&budget)).unwrap(),
            );
        }
        let core = PartitionCore {
            first_key: i64::MIN,
            last_key: i64::MAX,
            segments,
        };
        assert_eq!(core.segment_index_for(i64::MIN), 0);
        assert_eq!(core.segment_index_for(-1), 0);
        assert_eq!(core.segment_index_for(0), 1);
        assert_eq!(core.segment_index_for(49), 1);
        assert_eq!(core.segment_index_for(50), 2);
        assert_eq!(core.segment_index_for(i64::MAX), 2);
    }
}
