//! Record Codec
//!
//! Encodes/decodes a (key, value) pair to/from its on-disk form.
//!
//! ## Record Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Key (8 bytes)                                           │
//! │   big-endian, sign bit flipped (order-preserving)       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Encoded Value (codec-dependent)                         │
//! │   fixed width:    sentinel bit pattern = tombstone      │
//! │   variable width: [Len: u32 BE][bytes], Len 0 = tomb.   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Flipping the sign bit makes unsigned lexicographic byte order equal
//! signed numeric order, so a scan can compare the leading key byte alone
//! to skip records cheaply and stop early in a sorted region.

mod codecs;

pub use codecs::{BincodeCodec, I64Codec};

use crate::error::Result;

/// Width of the encoded key prefix of every record
pub const KEY_LEN: usize = 8;

// =============================================================================
// Key Encoding
// =============================================================================

/// Encode a key into its order-preserving on-disk form.
pub fn key_bytes(key: i64) -> [u8; KEY_LEN] {
    ((key as u64) ^ (1u64 << 63)).to_be_bytes()
}

/// Decode a key from its on-disk form.
///
/// Panics if `buf` is shorter than [`KEY_LEN`]; callers bound-check first.
pub fn key_from_bytes(buf: &[u8]) -> i64 {
    let mut raw = [0u8; KEY_LEN];
    raw.copy_from_slice(&buf[..KEY_LEN]);
    (u64::from_be_bytes(raw) ^ (1u64 << 63)) as i64
}

/// Leading byte of the encoded key, used for cheap skip comparisons.
pub fn lead_byte(key: i64) -> u8 {
    key_bytes(key)[0]
}

// =============================================================================
// Value Codec
// =============================================================================

/// Pluggable value encoding for one value type.
///
/// Contract: `encode`/`decode` round-trip exactly, and `skip` never decodes
/// the value (it is used for fast skip-scanning).
pub trait ValueCodec: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Append the encoding of `value` to `buf`. `None` encodes the tombstone.
    fn encode(&self, value: Option<&Self::Value>, buf: &mut Vec<u8>) -> Result<()>;

    /// Decode one value from the front of `buf`.
    /// Returns the value (`None` = tombstone) and the bytes consumed.
    fn decode(&self, buf: &[u8]) -> Result<(Option<Self::Value>, usize)>;

    /// Number of bytes the value at the front of `buf` occupies,
    /// without decoding it.
    fn skip(&self, buf: &[u8]) -> Result<usize>;

    /// Reject values that collide with a reserved sentinel encoding.
    fn check_writable(&self, _value: &Self::Value) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Record Helpers
// =============================================================================

/// Append the full record encoding of (key, value) to `buf`.
pub fn encode_record<C: ValueCodec>(
    codec: &C,
    key: i64,
    value: Option<&C::Value>,
    buf: &mut Vec<u8>,
) -> Result<()> {
    buf.extend_from_slice(&key_bytes(key));
    codec.encode(value, buf)
}

/// Decode one record from the front of `buf`.
/// Returns (key, value, bytes consumed).
pub fn decode_record<C: ValueCodec>(
    codec: &C,
    buf: &[u8],
) -> Result<(i64, Option<C::Value>, usize)> {
    if buf.len() < KEY_LEN {
        return Err(crate::StrataError::Codec(
            "truncated record: missing key".to_string(),
        ));
    }
    let key = key_from_bytes(buf);
    let (value, consumed) = codec.decode(&buf[KEY_LEN..])?;
    Ok((key, value, KEY_LEN + consumed))
}

/// Total length of the record at the front of `buf`, without decoding
/// its value.
pub fn record_len<C: ValueCodec>(codec: &C, buf: &[u8]) -> Result<usize> {
    if buf.len() < KEY_LEN {
        return Err(crate::StrataError::Codec(
            "truncated record: missing key".to_string(),
        ));
    }
    Ok(KEY_LEN + codec.skip(&buf[KEY_LEN..])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bytes_order_preserving() {
        let keys = [i64::MIN, -1_000_000, -1, 0, 1, 42, i64::MAX];
        for pair in keys.windows(2) {
            assert!(
                key_bytes(pair[0]) < key_bytes(pair[1]),
                "byte order broken for {} < {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_key_round_trip() {
        for key in [i64::MIN, -7, 0, 7, i64::MAX] {
            assert_eq!(key_from_bytes(&key_bytes(key)), key);
        }
    }

    #[test]
    fn test_lead_byte_splits_sign() {
        // Negative keys sort below the flipped sign bit
        assert!(lead_byte(-1) < lead_byte(0));
    }
}
