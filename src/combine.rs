//! Merge semantics for concurrent writes
//!
//! Two values written for the same key are resolved into one logical value
//! by a [`Combinator`] before either becomes visible. Writes are folded in
//! append order; a tombstone on either side of a fold is not merged, the
//! later record simply wins. This makes delete-then-write sequences behave
//! like an overwrite rather than a combination with the deleted value.

/// Pure merge function resolving two writes to the same key.
///
/// Implementations should be associative for the combined result to be
/// independent of compaction timing.
pub trait Combinator<V>: Send + Sync + 'static {
    /// Merge `current` (older) with `incoming` (newer) into one value.
    fn combine(&self, current: V, incoming: V) -> V;
}

/// Keeps the most recently written value.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl<V> Combinator<V> for LastWriteWins {
    fn combine(&self, _current: V, incoming: V) -> V {
        incoming
    }
}

/// Sums integer deltas; the canonical counter combinator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Adder;

impl Combinator<i64> for Adder {
    fn combine(&self, current: i64, incoming: i64) -> i64 {
        current.wrapping_add(incoming)
    }
}

/// Fold one more record into the running state for a key.
///
/// `current` is `None` when no record has been seen yet; the inner `Option`
/// is the tombstone. Tombstones propagate: when either side of the fold is
/// a tombstone the incoming record replaces the state outright.
pub(crate) fn fold<V, M: Combinator<V>>(
    combinator: &M,
    current: Option<Option<V>>,
    incoming: Option<V>,
) -> Option<Option<V>> {
    match (current, incoming) {
        (None, incoming) => Some(incoming),
        (Some(None), incoming) => Some(incoming),
        (Some(Some(_)), None) => Some(None),
        (Some(Some(current)), Some(incoming)) => {
            Some(Some(combinator.combine(current, incoming)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let c = LastWriteWins;
        assert_eq!(c.combine(1i64, 2i64), 2);
    }

    #[test]
    fn test_adder_sums() {
        let c = Adder;
        assert_eq!(c.combine(40, 2), 42);
    }

    #[test]
    fn test_fold_preserves_append_order() {
        let c = Adder;
        // write 1, write 2 => combined
        let state = fold(&c, None, Some(1));
        let state = fold(&c, state, Some(2));
        assert_eq!(state, Some(Some(3)));
    }

    #[test]
    fn test_fold_tombstone_wins_outright() {
        let c = Adder;
        // write 5, delete, write 2 => 2, not 7
        let state = fold(&c, None, Some(5));
        let state = fold(&c, state, None);
        let state = fold(&c, state, Some(2));
        assert_eq!(state, Some(Some(2)));
    }

    #[test]
    fn test_fold_trailing_tombstone() {
        let c = Adder;
        let state = fold(&c, None, Some(5));
        let state = fold(&c, state, None);
        assert_eq!(state, Some(None));
    }
}
