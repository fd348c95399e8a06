//! Provided value codecs
//!
//! `I64Codec` for fixed-width integer values and `BincodeCodec` for
//! arbitrary serde-serializable values.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StrataError};

use super::ValueCodec;

/// Length-prefix width used by variable-width codecs
const LEN_PREFIX: usize = 4;

// =============================================================================
// I64Codec
// =============================================================================

/// Fixed-width codec for `i64` values.
///
/// The bit pattern of `i64::MIN` is reserved as the tombstone sentinel,
/// avoiding a separate null flag byte; writing `i64::MIN` as a value is
/// rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

/// Reserved sentinel encoding the tombstone
const I64_SENTINEL: i64 = i64::MIN;

impl ValueCodec for I64Codec {
    type Value = i64;

    fn encode(&self, value: Option<&i64>, buf: &mut Vec<u8>) -> Result<()> {
        let raw = match value {
            Some(v) => *v,
            None => I64_SENTINEL,
        };
        buf.extend_from_slice(&raw.to_be_bytes());
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<(Option<i64>, usize)> {
        if buf.len() < 8 {
            return Err(StrataError::Codec(
                "truncated i64 value".to_string(),
            ));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[..8]);
        let v = i64::from_be_bytes(raw);
        let value = if v == I64_SENTINEL { None } else { Some(v) };
        Ok((value, 8))
    }

    fn skip(&self, buf: &[u8]) -> Result<usize> {
        if buf.len() < 8 {
            return Err(StrataError::Codec(
                "truncated i64 value".to_string(),
            ));
        }
        Ok(8)
    }

    fn check_writable(&self, value: &i64) -> Result<()> {
        if *value == I64_SENTINEL {
            return Err(StrataError::Sentinel(format!(
                "{} is reserved as the i64 tombstone",
                I64_SENTINEL
            )));
        }
        Ok(())
    }
}

// =============================================================================
// BincodeCodec
// =============================================================================

/// Variable-width codec for arbitrary serde-serializable values.
///
/// Layout: 4-byte big-endian length prefix followed by the bincode bytes.
/// A length of 0 encodes the tombstone, so value types whose bincode
/// encoding is empty are rejected.
#[derive(Debug, Clone, Copy)]
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> ValueCodec for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Value = T;

    fn encode(&self, value: Option<&T>, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            None => {
                buf.extend_from_slice(&0u32.to_be_bytes());
                Ok(())
            }
            Some(v) => {
                let bytes = bincode::serialize(v)
                    .map_err(|e| StrataError::Codec(format!("serialize failed: {}", e)))?;
                if bytes.is_empty() {
                    return Err(StrataError::Codec(
                        "zero-length value encoding collides with the tombstone".to_string(),
                    ));
                }
                if bytes.len() > u32::MAX as usize {
                    return Err(StrataError::Codec(format!(
                        "value encoding of {} bytes exceeds the length prefix",
                        bytes.len()
                    )));
                }
                buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(&bytes);
                Ok(())
            }
        }
    }

    fn decode(&self, buf: &[u8]) -> Result<(Option<T>, usize)> {
        let len = read_len_prefix(buf)?;
        if len == 0 {
            return Ok((None, LEN_PREFIX));
        }
        let end = LEN_PREFIX + len;
        if buf.len() < end {
            return Err(StrataError::Codec(
                "truncated variable-width value".to_string(),
            ));
        }
        let value = bincode::deserialize(&buf[LEN_PREFIX..end])
            .map_err(|e| StrataError::Codec(format!("deserialize failed: {}", e)))?;
        Ok((Some(value), end))
    }

    fn skip(&self, buf: &[u8]) -> Result<usize> {
        let len = read_len_prefix(buf)?;
        let end = LEN_PREFIX + len;
        if buf.len() < end {
            return Err(StrataError::Codec(
                "truncated variable-width value".to_string(),
            ));
        }
        Ok(end)
    }
}

fn read_len_prefix(buf: &[u8]) -> Result<usize> {
    if buf.len() < LEN_PREFIX {
        return Err(StrataError::Codec(
            "truncated length prefix".to_string(),
        ));
    }
    let mut raw = [0u8; LEN_PREFIX];
    raw.copy_from_slice(&buf[..LEN_PREFIX]);
    Ok(u32::from_be_bytes(raw) as usize)
}
