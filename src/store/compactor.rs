//! Compactor
//!
//! Rewrites a segment's dirty suffix into a sorted, deduplicated file with
//! a fresh sparse index. Undersized neighbors are absorbed into the
//! rewrite; output exceeding the size target is split into further
//! segments at key boundaries.
//!
//! The size target adapts to recent activity: once no write arrived for
//! the idle window and at least one read happened since, cleaning turns
//! eager with the small read-optimized target; during write bursts only
//! segments past the dirty threshold (or a random draw) are cleaned, with
//! the large write-optimized target.
//!
//! The background pass acquires each partition lock with `try_write` and
//! skips contended partitions until the next tick. An error in one
//! partition is logged and never stops the pass or the tick loop.

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::combine::{self, Combinator};
use crate::error::{io_at, Result};
use crate::partition::{Partition, PartitionCore};
use crate::record::{self, ValueCodec};
use crate::segment::{SealedSegment, Segment, SegmentWriter};

use super::{now_millis, StoreInner};

// =============================================================================
// Target Selection
// =============================================================================

/// Segment size target for the current workload phase.
pub(crate) fn current_target<C, M>(inner: &StoreInner<C, M>) -> u64
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    let last_write = inner.time_of_last_write.load(Ordering::Relaxed);
    let last_read = inner.time_of_last_read.load(Ordering::Relaxed);
    let idle = inner.config.write_idle_window.as_millis() as u64;
    if now_millis().saturating_sub(last_write) >= idle && last_read > last_write {
        inner.config.read_target_size
    } else {
        inner.config.write_target_size
    }
}

// =============================================================================
// Cleaning
// =============================================================================

/// Clean one partition, blocking on its exclusive lock.
///
/// Forced mode always uses the read-optimized target and cleans every
/// dirty segment; the read path and `optimize_for_reading` use it.
pub(crate) fn clean_partition<C, M>(
    inner: &StoreInner<C, M>,
    partition: &Partition,
    forced: bool,
) -> Result<()>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    let mut core = partition.core().write();
    clean_core(inner, partition, &mut core, forced)
}

/// Clean a partition whose exclusive lock the caller already holds.
fn clean_core<C, M>(
    inner: &StoreInner<C, M>,
    partition: &Partition,
    core: &mut PartitionCore,
    forced: bool,
) -> Result<()>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    let target = if forced {
        inner.config.read_target_size
    } else {
        current_target(inner)
    };
    let eager = forced || target == inner.config.read_target_size;

    let mut i = 0;
    while i < core.segments.len() {
        let seg = &core.segments[i];
        let mergeable = core
            .segments
            .get(i + 1)
            .map_or(false, |next| seg.write_size() + next.write_size() <= target);
        let rewrite = if !seg.is_clean() {
            eager
                || seg.dirty_bytes() >= inner.config.max_dirty_bytes
                || rand::random::<f64>() < inner.config.lazy_clean_probability
        } else {
            // two adjacent clean segments that fit one target merge
            eager && mergeable
        };
        if rewrite {
            i += rewrite_range(inner, core, i, target)?;
        } else {
            i += 1;
        }
    }

    if core.segments.iter().all(|s| s.is_clean()) {
        partition.set_needs_cleaning(false);
    }
    Ok(())
}

/// Rewrite the segment at `start` (plus any absorbed neighbors) into
/// fresh sorted segments. Returns how many segments now occupy the range.
fn rewrite_range<C, M>(
    inner: &StoreInner<C, M>,
    core: &mut PartitionCore,
    start: usize,
    target: u64,
) -> Result<usize>
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    // absorb neighbors while the combined input still fits the target
    let mut end = start + 1;
    let mut combined = core.segments[start].write_size();
    while end < core.segments.len() {
        let next = core.segments[end].write_size();
        if combined + next > target {
            break;
        }
        combined += next;
        end += 1;
    }
    let first_key = core.segments[start].first_key();
    let last_key = core.segments[end - 1].last_key();

    // file order per segment keeps the fold in append order
    let mut records = Vec::new();
    for seg in &core.segments[start..end] {
        records.extend(seg.load_records(&inner.codec)?);
    }
    let folded = sort_and_fold(records, inner.config.sort_buckets, &inner.combinator);
    let live: Vec<(i64, C::Value)> = folded
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect();

    // emit sorted, opening a new output when the running size passes the
    // target; every output is sealed (fsynced) before any rename happens
    let dir = inner.config.data_dir.as_path();
    let mut sealed: Vec<SealedSegment> = Vec::new();
    let mut writer = SegmentWriter::create(dir, first_key, inner.config.index_interval)?;
    let mut buf = Vec::new();
    for (i, (key, value)) in live.iter().enumerate() {
        buf.clear();
        record::encode_record(&inner.codec, *key, Some(value), &mut buf)?;
        writer.add(*key, &buf)?;
        if writer.bytes_written() >= target {
            if let Some((next_key, _)) = live.get(i + 1) {
                sealed.push(writer.seal(*next_key - 1)?);
                writer = SegmentWriter::create(dir, *next_key, inner.config.index_interval)?;
            }
        }
    }
    sealed.push(writer.seal(last_key)?);

    let mut fresh = Vec::with_capacity(sealed.len());
    for output in sealed {
        fresh.push(output.commit(Arc::clone(&inner.budget))?);
    }
    let fresh_first: Vec<i64> = fresh.iter().map(|s| s.first_key()).collect();
    let count = fresh.len();
    let old: Vec<Segment> = core.segments.splice(start..end, fresh).collect();
    for seg in old {
        // dropping the old segment returns its cached bytes to the budget
        if !fresh_first.contains(&seg.first_key()) {
            fs::remove_file(seg.path()).map_err(io_at(seg.path()))?;
        }
    }
    debug!(first_key, inputs = end - start, outputs = count, "rewrote segment range");
    Ok(count)
}

/// Sort records by key and fold duplicate keys in append order.
///
/// Records are bucketed by estimated key density and each bucket sorted
/// with a stable sort, bounding the sort cost for very large dirty files
/// while keeping equal-key records in append order for the fold.
/// Tombstoned keys fold away entirely.
pub(crate) fn sort_and_fold<V, M>(
    records: Vec<(i64, Option<V>)>,
    buckets: usize,
    combinator: &M,
) -> Vec<(i64, Option<V>)>
where
    M: Combinator<V>,
{
    if records.is_empty() {
        return records;
    }
    let mut min = records[0].0;
    let mut max = records[0].0;
    for (key, _) in &records {
        min = min.min(*key);
        max = max.max(*key);
    }
    let buckets = buckets.clamp(1, records.len());
    let span = (max as i128 - min as i128) + 1;

    let mut bins: Vec<Vec<(i64, Option<V>)>> =
        std::iter::repeat_with(Vec::new).take(buckets).collect();
    for (key, value) in records {
        let offset = (key as i128 - min as i128) as u128;
        let idx = ((offset * buckets as u128) / span as u128) as usize;
        bins[idx.min(buckets - 1)].push((key, value));
    }

    let mut out: Vec<(i64, Option<V>)> = Vec::new();
    for mut bin in bins {
        // stable sort keeps equal-key records in append order
        bin.sort_by_key(|(key, _)| *key);
        for (key, value) in bin {
            let same_key = out.last().map_or(false, |(last_key, _)| *last_key == key);
            if same_key {
                if let Some((_, state)) = out.last_mut() {
                    let current = state.take();
                    *state = combine::fold(combinator, Some(current), value).unwrap_or(None);
                }
            } else {
                out.push((key, value));
            }
        }
    }
    out
}

// =============================================================================
// Background Pass
// =============================================================================

/// One background compaction sweep over all partitions.
pub(crate) fn background_pass<C, M>(inner: &StoreInner<C, M>)
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    let partitions: Vec<Arc<Partition>> = inner.map.read().partitions().to_vec();
    for partition in partitions {
        // contended partitions are skipped, never waited on
        let Some(mut core) = partition.core().try_write() else {
            continue;
        };
        if let Err(e) = clean_core(inner, &partition, &mut core, false) {
            error!(
                slot = partition.slot(),
                error = %e,
                "compaction failed; partition skipped this tick"
            );
        }
    }
    split_pass(inner);
}

/// Split partitions whose total size passed the split threshold, at the
/// segment boundary nearest their byte midpoint.
fn split_pass<C, M>(inner: &StoreInner<C, M>)
where
    C: ValueCodec,
    M: Combinator<C::Value>,
{
    let candidates: Vec<usize> = {
        let map = inner.map.read();
        map.partitions()
            .iter()
            .filter_map(|p| {
                let core = p.core().try_read()?;
                let oversized = core.total_write_size() > inner.config.partition_split_size
                    && core.segments.len() >= 2;
                oversized.then(|| p.slot())
            })
            .collect()
    };
    if candidates.is_empty() {
        return;
    }

    let mut map = inner.map.write();
    for slot in candidates {
        let partition = Arc::clone(&map.partitions()[slot]);
        let Some(mut core) = partition.core().try_write() else {
            continue;
        };
        if core.total_write_size() <= inner.config.partition_split_size
            || core.segments.len() < 2
        {
            continue;
        }

        let total = core.total_write_size();
        let mut acc = 0u64;
        let mut best = 1usize;
        let mut best_gap = u64::MAX;
        for (i, seg) in core.segments.iter().enumerate() {
            if i + 1 == core.segments.len() {
                break;
            }
            acc += seg.write_size();
            let gap = acc.abs_diff(total / 2);
            if gap < best_gap {
                best_gap = gap;
                best = i + 1;
            }
        }

        let upper_segments = core.segments.split_off(best);
        let split_key = upper_segments[0].first_key();
        let threshold = inner.config.max_dirty_bytes;
        let upper_core = PartitionCore {
            first_key: split_key,
            last_key: core.last_key,
            segments: upper_segments,
        };
        let upper_dirty = upper_core.max_dirty_bytes() >= threshold;
        core.last_key = split_key - 1;

        let upper = Arc::new(Partition::new(map.next_slot(), upper_core));
        upper.set_needs_cleaning(upper_dirty);
        partition.set_needs_cleaning(core.max_dirty_bytes() >= threshold);

        match map.split_leaf(slot, split_key, upper) {
            Ok(()) => info!(slot, split_key, "partition split"),
            Err(e) => error!(slot, error = %e, "partition split failed"),
        }
    }
}
