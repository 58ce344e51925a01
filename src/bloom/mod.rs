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

//! Bloom filter for probabilistic set membership testing.
//!
//! A Bloom filter answers membership queries with no false negatives and a
//! tunable false positive rate. Inserting an item sets `k` bits derived
//! from one 128-bit digest by double hashing with a cubic diffusion term; a
//! lookup reports `true` iff all `k` bits are set.
//!
//! [`BloomFilter`] holds its bits in process; [`RedisBloomFilter`] holds
//! them in a server-side bitmap and batches the `k` bit operations of each
//! insert or lookup into one pipelined round-trip.
//!
//! # Usage
//!
//! ```rust
//! use probkit::bloom::BloomFilter;
//!
//! let filter = BloomFilter::with_accuracy(1000, 0.001);
//! filter.insert(b"John");
//! filter.insert(b"Alice");
//!
//! assert!(filter.lookup(b"John"));
//! assert!(filter.lookup(b"Alice"));
//! assert!(!filter.lookup(b"Jane"));
//! ```

mod mem;
mod redis;

use serde::Deserialize;
use serde::Serialize;

pub use self::mem::BloomFilter;
pub use self::redis::RedisBloomFilter;

use crate::hash;

/// Returns the optimal bit count for `num_items` expected insertions at the
/// target false positive rate: `m = ceil(-(n ln e) / (ln 2)^2)`, clamped to
/// at least one bit.
pub fn optimal_size(num_items: u64, error_rate: f64) -> u64 {
    let m = (-((num_items as f64) * error_rate.ln()) / 2f64.ln().powi(2)).ceil();
    (m as u64).max(1)
}

/// Returns the optimal hash count for a filter of `size` bits holding
/// `num_items` items: `k = ceil((m / n) ln 2)`, clamped to at least one.
pub fn optimal_num_hashes(size: u64, num_items: u64) -> u64 {
    let k = ((size as f64 / num_items as f64) * 2f64.ln()).ceil();
    (k as u64).max(1)
}

/// Derives the `num_hashes` bit indices for one item.
pub(crate) fn bit_indexes(data: &[u8], num_hashes: u64, size: u64) -> Vec<u64> {
    let (h1, h2) = hash::sum128(data);
    (0..num_hashes)
        .map(|i| hash::enhanced_position(h1, h2, i, size))
        .collect()
}

/// The backend-neutral JSON envelope: size, hash count and the base64 bit
/// set payload.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BloomEnvelope {
    pub m: u64,
    pub k: u64,
    pub b: String,
}

impl BloomEnvelope {
    pub(crate) fn check(&self) -> Result<(), crate::error::Error> {
        if self.m == 0 || self.k == 0 {
            return Err(crate::error::Error::deserial(
                "bloom envelope size and hash count must be greater than 0",
            ));
        }
        Ok(())
    }
}
