// Copyright 2025 Strata Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Order-preserving value encoding for attribute row keys.
//!
//! Lexicographic order of the encoded bytes equals natural order of the
//! values. Numerics, timestamps, uuids and booleans use the fixed-width
//! memcomparable encoding; strings are raw UTF-8 (never containing 0x00, so
//! a 0x00 terminator after the value is unambiguous and prefix queries are
//! plain byte-prefix ranges).

use serde::Serialize;

use crate::error::{StrataError, StrataResult};
use crate::types::ScalarImpl;

/// Width of the secondary timestamp field in attribute index rows.
pub const TIMESTAMP_FIELD_LEN: usize = 12;

fn memcomparable_bytes<T: Serialize>(value: &T) -> StrataResult<Vec<u8>> {
    let mut serializer = memcomparable::Serializer::new(vec![]);
    value.serialize(&mut serializer)?;
    Ok(serializer.into_inner())
}

/// Append the order-preserving encoding of a scalar.
///
/// Lists and maps are not encodable as a whole; attribute indices expand
/// list values one element at a time before calling this.
pub fn encode(value: &ScalarImpl, buf: &mut Vec<u8>) -> StrataResult<()> {
    match value {
        ScalarImpl::Bool(v) => buf.extend(memcomparable_bytes(v)?),
        ScalarImpl::Int32(v) => buf.extend(memcomparable_bytes(v)?),
        ScalarImpl::Int64(v) | ScalarImpl::Timestamp(v) => buf.extend(memcomparable_bytes(v)?),
        ScalarImpl::Float32(v) => buf.extend(memcomparable_bytes(v)?),
        ScalarImpl::Float64(v) => buf.extend(memcomparable_bytes(v)?),
        ScalarImpl::Uuid(v) => buf.extend(memcomparable_bytes(&u128::from_be_bytes(*v.as_bytes()))?),
        ScalarImpl::Varchar(s) => {
            if s.contains('\0') {
                return Err(StrataError::serde("indexed string contains a NUL byte"));
            }
            buf.extend(s.as_bytes());
        }
        ScalarImpl::List(_) | ScalarImpl::Map(_) | ScalarImpl::Geometry(_) => {
            return Err(StrataError::serde(
                "value type has no order-preserving encoding",
            ));
        }
    }
    Ok(())
}

pub fn encode_to_vec(value: &ScalarImpl) -> StrataResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode(value, &mut buf)?;
    Ok(buf)
}

/// Fixed-width secondary field holding the default date: four zero bytes of
/// padding then the sign-flipped big-endian millisecond value.
pub fn encode_timestamp_field(millis: i64) -> StrataResult<[u8; TIMESTAMP_FIELD_LEN]> {
    let mut out = [0u8; TIMESTAMP_FIELD_LEN];
    let encoded = memcomparable_bytes(&millis)?;
    out[4..].copy_from_slice(&encoded);
    Ok(out)
}

/// Exclusive upper bound for a byte-prefix scan: the prefix with its last
/// non-0xff byte incremented. `None` when every byte is 0xff (unbounded).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(&last) = bound.last() {
        if last == 0xff {
            bound.pop();
        } else {
            *bound.last_mut().unwrap() = last + 1;
            return Some(bound);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(v: ScalarImpl) -> Vec<u8> {
        encode_to_vec(&v).unwrap()
    }

    #[test]
    fn test_integers_order() {
        let values = [-100_000, -1, 0, 1, 42, 100_000];
        for w in values.windows(2) {
            assert!(enc(ScalarImpl::Int32(w[0])) < enc(ScalarImpl::Int32(w[1])));
            assert!(enc(ScalarImpl::Int64(w[0] as i64)) < enc(ScalarImpl::Int64(w[1] as i64)));
        }
    }

    #[test]
    fn test_floats_order() {
        let values = [-1e9, -1.5, -0.0, 0.5, 2.25, 7e8];
        for w in values.windows(2) {
            assert!(enc(ScalarImpl::Float64(w[0])) < enc(ScalarImpl::Float64(w[1])));
        }
    }

    #[test]
    fn test_timestamps_order_and_field_width() {
        assert!(
            enc(ScalarImpl::Timestamp(1_000)) < enc(ScalarImpl::Timestamp(2_000))
        );
        let field = encode_timestamp_field(1_273_190_400_000).unwrap();
        assert_eq!(field.len(), TIMESTAMP_FIELD_LEN);
        assert_eq!(&field[..4], &[0, 0, 0, 0]);
        let earlier = encode_timestamp_field(1_273_190_399_999).unwrap();
        assert!(earlier < field);
    }

    #[test]
    fn test_strings_raw_and_nul_free() {
        assert_eq!(enc(ScalarImpl::Varchar("alice".into())), b"alice");
        assert!(encode_to_vec(&ScalarImpl::Varchar("a\0b".into())).is_err());
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_upper_bound(&[0x61, 0xff]), Some(vec![0x62]));
        assert_eq!(prefix_upper_bound(&[0xff, 0xff]), None);
        // every string with the prefix sorts inside [prefix, bound)
        let bound = prefix_upper_bound(b"al").unwrap();
        assert!(b"al".as_slice() < bound.as_slice());
        assert!(b"alice".as_slice() < bound.as_slice());
        assert!(b"am".as_slice() >= bound.as_slice());
    }
}
