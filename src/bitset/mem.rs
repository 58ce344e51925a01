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

use std::io::Read;
use std::io::Write;

use crate::bitset::decode_payload;
use crate::bitset::encode_payload;
use crate::bitset::read_words;
use crate::bitset::words_for_bits;
use crate::bitset::write_words;
use crate::error::Error;

/// A fixed-width bit array backed by a packed `u64` word vector.
///
/// Indices are `0..size`. The set never grows on its own; only
/// [`import`](Self::import) and [`read_from`](Self::read_from) may replace
/// the size. No internal synchronization is performed; owners that share an
/// instance across threads wrap it in their own exclusion primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSetMem {
    words: Vec<u64>,
    size: u64,
}

impl BitSetMem {
    /// Creates a bit set of `size` bits, all zero.
    pub fn new(size: u64) -> Self {
        BitSetMem {
            words: vec![0u64; words_for_bits(size)],
            size,
        }
    }

    /// Creates a bit set from raw words; the size is `64 * words.len()`.
    pub fn from_words(words: &[u64]) -> Self {
        BitSetMem {
            words: words.to_vec(),
            size: words.len() as u64 * 64,
        }
    }

    /// Returns the number of bits.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns whether bit `index` is set.
    pub fn has(&self, index: u64) -> bool {
        let word = (index >> 6) as usize;
        let bit = index & 63;
        (self.words[word] & (1u64 << bit)) != 0
    }

    /// Sets bit `index`.
    pub fn set(&mut self, index: u64) {
        let word = (index >> 6) as usize;
        let bit = index & 63;
        self.words[word] |= 1u64 << bit;
    }

    /// Sets every bit in `indexes`.
    pub fn set_many(&mut self, indexes: &[u64]) {
        for index in indexes {
            self.set(*index);
        }
    }

    /// Returns the number of set bits.
    pub fn bit_count(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Returns the index of the lowest set bit, or `None` if no bit is set.
    pub fn first_set(&self) -> Option<u64> {
        self.words
            .iter()
            .position(|w| *w != 0)
            .map(|i| i as u64 * 64 + self.words[i].trailing_zeros() as u64)
    }

    /// Serializes to the base64 payload embedded in JSON envelopes.
    pub fn export(&self) -> String {
        encode_payload(self.size, &self.words)
    }

    /// Reconstructs a bit set from a payload produced by [`export`](Self::export).
    pub fn import(payload: &str) -> Result<Self, Error> {
        let (size, words) = decode_payload(payload)?;
        Ok(BitSetMem { words, size })
    }

    /// Writes the canonical binary form onto `stream`.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), Error> {
        write_words(stream, self.size, &self.words)
    }

    /// Reads a bit set from the canonical binary form.
    pub fn read_from<R: Read>(stream: &mut R) -> Result<Self, Error> {
        let (size, words) = read_words(stream)?;
        Ok(BitSetMem { words, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_has() {
        let mut set = BitSetMem::new(130);
        assert!(!set.has(0));
        assert!(!set.has(129));

        set.set(0);
        set.set(64);
        set.set(129);
        assert!(set.has(0));
        assert!(set.has(64));
        assert!(set.has(129));
        assert!(!set.has(1));
        assert_eq!(set.bit_count(), 3);
    }

    #[test]
    fn test_set_many() {
        let mut set = BitSetMem::new(256);
        set.set_many(&[3, 64, 65, 255]);
        assert_eq!(set.bit_count(), 4);
        assert!(set.has(65));
    }

    #[test]
    fn test_first_set() {
        let mut set = BitSetMem::new(256);
        assert_eq!(set.first_set(), None);
        set.set(200);
        assert_eq!(set.first_set(), Some(200));
        set.set(70);
        assert_eq!(set.first_set(), Some(70));
        set.set(0);
        assert_eq!(set.first_set(), Some(0));
    }

    #[test]
    fn test_from_words() {
        let set = BitSetMem::from_words(&[0b101, 1 << 63]);
        assert_eq!(set.size(), 128);
        assert!(set.has(0));
        assert!(!set.has(1));
        assert!(set.has(2));
        assert!(set.has(127));
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut set = BitSetMem::new(100);
        set.set_many(&[1, 50, 99]);
        let restored = BitSetMem::import(&set.export()).unwrap();
        assert_eq!(set, restored);
    }

    #[test]
    fn test_stream_round_trip() {
        let mut set = BitSetMem::new(129);
        set.set_many(&[0, 64, 128]);

        let mut buffer = Vec::new();
        set.write_to(&mut buffer).unwrap();
        let restored = BitSetMem::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(set, restored);
    }

    #[test]
    fn test_truncated_stream() {
        let mut set = BitSetMem::new(129);
        set.set(5);
        let mut buffer = Vec::new();
        set.write_to(&mut buffer).unwrap();
        buffer.truncate(12);
        assert!(BitSetMem::read_from(&mut buffer.as_slice()).is_err());
    }
}
