// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Cuckoo filter for membership testing with deletion.
//!
//! A cuckoo filter stores a short fingerprint of each item in one of two
//! candidate buckets. The fingerprint is the leading characters of the
//! decimal text of the item's 64-bit digest; the second candidate index is
//! the first XOR-displaced by the fingerprint's own digest, so either index
//! can be recovered from the other. When both candidates are full, an
//! occupant is evicted to its partner bucket, cascading for up to
//! `retries` kicks before the filter reports itself full.
//!
//! [`CuckooFilter`] keeps its buckets in process; [`RedisCuckooFilter`]
//! keeps each bucket in a server-side list mutated through atomic scripts.
//! The remote eviction loop is atomic per bucket step but not across
//! buckets: concurrent mutators may observe a fingerprint twice while a
//! kick is in flight.
//!
//! # Usage
//!
//! ```rust
//! use probkit::cuckoo::CuckooFilter;
//!
//! let filter = CuckooFilter::new(20, 4, 3)?;
//! filter.insert(b"cat", false)?;
//! filter.insert(b"dog", false)?;
//!
//! assert!(filter.lookup(b"cat")?);
//! assert!(!filter.lookup(b"elephant")?);
//!
//! assert!(filter.remove(b"dog")?);
//! assert!(!filter.lookup(b"dog")?);
//! # Ok::<(), probkit::error::Error>(())
//! ```

mod mem;
mod redis;

use serde::Deserialize;
use serde::Serialize;

pub use self::mem::CuckooFilter;
pub use self::redis::RedisCuckooFilter;

use crate::error::Error;
use crate::hash;

/// Default number of evictions attempted before a filter reports full.
pub const DEFAULT_RETRIES: u64 = 500;

// The digest is formatted in decimal, so a fingerprint can never be longer
// than the longest u64 in decimal.
pub(crate) const MAX_FINGERPRINT_LEN: u64 = 20;

/// Returns the fingerprint length in bytes for a bucket of `bucket_size`
/// slots at the target false positive rate:
/// `ceil((log2(1 / e) + log2(2 b)) / 8)`.
pub fn fingerprint_length(bucket_size: u64, error_rate: f64) -> u64 {
    let bits = ((1.0 / error_rate).log2() + (2.0 * bucket_size as f64).log2()).ceil();
    (bits / 8.0).ceil() as u64
}

/// Returns the bucket count needed for `num_items` at a 0.955 load factor
/// with `bucket_size` slots per bucket.
pub fn optimal_size(num_items: u64, bucket_size: u64) -> u64 {
    (num_items as f64 * 0.955 / bucket_size as f64).ceil() as u64
}

/// The fingerprint and two candidate bucket indices of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidates {
    pub fingerprint: String,
    pub first: u64,
    pub second: u64,
}

/// Derives the fingerprint and both candidate indices for `data`.
///
/// The same derivation runs on insert, lookup and remove, so the two
/// indices computed on lookup always equal those computed on insert.
pub(crate) fn candidates(
    data: &[u8],
    size: u64,
    fingerprint_len: u64,
) -> Result<Candidates, Error> {
    let digest = hash::sum64(data);
    let text = digest.to_string();
    if fingerprint_len > text.len() as u64 {
        return Err(Error::invalid_argument(format!(
            "fingerprint length {fingerprint_len} exceeds hash length {}",
            text.len()
        )));
    }
    let fingerprint = text[..fingerprint_len as usize].to_string();
    let first = digest % size;
    let second = partner_index(first, &fingerprint, size);
    Ok(Candidates {
        fingerprint,
        first,
        second,
    })
}

/// Returns the partner bucket of `index` for `fingerprint`.
///
/// XOR displacement is symmetric: applying it to the partner index yields
/// the original one (modulo the table size).
pub(crate) fn partner_index(index: u64, fingerprint: &str, size: u64) -> u64 {
    (index ^ hash::sum64(fingerprint.as_bytes())) % size
}

/// Upper bound on the false positive rate: `2 b / 2^(8 f)`.
pub(crate) fn positive_rate(bucket_size: u64, fingerprint_len: u64) -> f64 {
    (2.0 * bucket_size as f64) / 2f64.powf(8.0 * fingerprint_len as f64)
}

/// Checks shared construction parameters.
pub(crate) fn check_parameters(
    size: u64,
    bucket_size: u64,
    fingerprint_len: u64,
) -> Result<(), Error> {
    if size == 0 || bucket_size == 0 {
        return Err(Error::invalid_argument(
            "cuckoo filter size and bucket size must be greater than 0",
        ));
    }
    if fingerprint_len == 0 || fingerprint_len > MAX_FINGERPRINT_LEN {
        return Err(Error::invalid_argument(format!(
            "fingerprint length must be between 1 and {MAX_FINGERPRINT_LEN}"
        )));
    }
    Ok(())
}

/// One bucket of the backend-neutral JSON envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BucketEnvelope {
    pub s: u64,
    pub l: u64,
    pub e: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub k: Option<String>,
}

/// The backend-neutral JSON envelope of a whole filter.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CuckooEnvelope {
    pub s: u64,
    pub bs: u64,
    pub fpl: u64,
    pub l: u64,
    pub r: u64,
    pub b: Vec<BucketEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub k: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mk: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_length() {
        // e = 0.01, b = 4: ceil(log2(100) + log2(8)) = 10 bits -> 2 bytes.
        assert_eq!(fingerprint_length(4, 0.01), 2);
        // e = 0.001, b = 1: ceil(log2(1000) + 1) = 11 bits -> 2 bytes.
        assert_eq!(fingerprint_length(1, 0.001), 2);
        assert!(fingerprint_length(4, 1e-12) > 5);
    }

    #[test]
    fn test_optimal_size() {
        assert_eq!(optimal_size(20, 4), 5);
        assert_eq!(optimal_size(1000, 4), 239);
    }

    #[test]
    fn test_candidate_symmetry() {
        let c = candidates(b"cat", 64, 3).unwrap();
        // Displacing either index by the fingerprint digest yields the other
        // when the table size is a power of two.
        assert_eq!(partner_index(c.second, &c.fingerprint, 64), c.first);
        assert_eq!(c.fingerprint.len(), 3);
        assert!(c.first < 64 && c.second < 64);
    }

    #[test]
    fn test_candidates_reject_long_fingerprint() {
        // A u64 in decimal has at most 20 digits; some digests have far
        // fewer, so a 20-char fingerprint can fail for specific inputs.
        let err = candidates(b"cat", 64, 21).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_candidates_deterministic() {
        assert_eq!(
            candidates(b"dog", 20, 4).unwrap(),
            candidates(b"dog", 20, 4).unwrap()
        );
    }
}
