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

//! Hashing primitives shared by all structures.
//!
//! Every structure derives its table positions from the two 64-bit words of
//! a single MurmurHash3 x64 128 digest, seeded with [`FILTER_SEED`]. Many
//! positions are produced from the two words by double hashing, so each
//! input is hashed exactly once regardless of how many positions a
//! structure needs.

mod murmurhash;

use std::hash::Hasher;

pub use self::murmurhash::MurmurHash3X64128;

/// The seed used for every digest computed by this crate.
///
/// Serialized payloads embed positions derived from this seed, so two
/// processes can only share state (through the Redis backend or through
/// exported envelopes) when both were built with the same value. Changing
/// this constant breaks compatibility with everything written before the
/// change.
pub const FILTER_SEED: u64 = 1373;

/// Computes the 128-bit digest of `data`, returned as two 64-bit words.
pub fn sum128(data: &[u8]) -> (u64, u64) {
    let mut hasher = MurmurHash3X64128::with_seed(FILTER_SEED);
    hasher.write(data);
    hasher.finish128()
}

/// Computes a single 64-bit digest of `data` (the first word of [`sum128`]).
pub fn sum64(data: &[u8]) -> u64 {
    sum128(data).0
}

/// Derives position `i` in a table of `width` slots by double hashing.
///
/// `pos_i = (h1 + i * h2) mod width`
pub fn double_position(h1: u64, h2: u64, i: u64, width: u64) -> u64 {
    h1.wrapping_add(i.wrapping_mul(h2)) % width
}

/// Derives bit `i` of a Bloom filter of `size` bits.
///
/// Extends [`double_position`] with a cubic term, `(i^3 - i) / 6`, which
/// improves diffusion when many bits are derived from one digest pair.
pub fn enhanced_position(h1: u64, h2: u64, i: u64, size: u64) -> u64 {
    let cubic = (i.wrapping_mul(i).wrapping_mul(i).wrapping_sub(i)) / 6;
    h1.wrapping_add(i.wrapping_mul(h2))
        .wrapping_add(cubic)
        % size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum128_is_deterministic() {
        assert_eq!(sum128(b"John"), sum128(b"John"));
        assert_ne!(sum128(b"John"), sum128(b"Jane"));
    }

    #[test]
    fn test_sum64_is_first_word() {
        let (h1, _) = sum128(b"payload");
        assert_eq!(sum64(b"payload"), h1);
    }

    #[test]
    fn test_double_position_bounds() {
        let (h1, h2) = sum128(b"element");
        for i in 0..16 {
            assert!(double_position(h1, h2, i, 97) < 97);
            assert!(enhanced_position(h1, h2, i, 97) < 97);
        }
    }

    #[test]
    fn test_enhanced_position_cubic_term() {
        // i = 0 and i = 1 have a zero cubic term, so both variants agree.
        let (h1, h2) = sum128(b"element");
        assert_eq!(
            double_position(h1, h2, 0, 1024),
            enhanced_position(h1, h2, 0, 1024)
        );
        assert_eq!(
            double_position(h1, h2, 1, 1024),
            enhanced_position(h1, h2, 1, 1024)
        );
        // From i = 2 on they diverge for most inputs.
        assert_ne!(
            double_position(h1, h2, 3, 1 << 40),
            enhanced_position(h1, h2, 3, 1 << 40)
        );
    }
}
