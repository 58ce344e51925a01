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

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use parking_lot::Mutex;

use crate::bitset::BitSetMem;
use crate::bloom::bit_indexes;
use crate::bloom::BloomEnvelope;
use crate::error::Error;

/// An in-process Bloom filter.
///
/// Every operation takes the filter's single mutex, so concurrent callers
/// sharing one instance observe a total order of inserts and lookups.
///
/// # Examples
///
/// ```
/// use probkit::bloom::BloomFilter;
///
/// let filter = BloomFilter::with_accuracy(1000, 0.001);
/// filter.insert_str("cat");
/// assert!(filter.lookup_str("cat"));
/// assert!(!filter.lookup_str("dog"));
/// ```
#[derive(Debug)]
pub struct BloomFilter {
    size: u64,
    num_hashes: u64,
    bits: Mutex<BitSetMem>,
}

impl BloomFilter {
    /// Creates a filter sized for `num_items` expected insertions at the
    /// target false positive rate.
    ///
    /// Both derived parameters are clamped to at least 1.
    pub fn with_accuracy(num_items: u64, error_rate: f64) -> Self {
        let size = super::optimal_size(num_items, error_rate);
        let num_hashes = super::optimal_num_hashes(size, num_items);
        BloomFilter {
            size,
            num_hashes,
            bits: Mutex::new(BitSetMem::new(size)),
        }
    }

    /// Creates a filter over an existing bit set.
    ///
    /// Returns [`ErrorKind::SizeMismatch`](crate::error::ErrorKind) when the
    /// set does not hold exactly `size` bits.
    pub fn with_bitset(size: u64, num_hashes: u64, bits: BitSetMem) -> Result<Self, Error> {
        if bits.size() != size {
            return Err(Error::size_mismatch(size, bits.size()));
        }
        Ok(BloomFilter {
            size: size.max(1),
            num_hashes: num_hashes.max(1),
            bits: Mutex::new(bits),
        })
    }

    /// Creates a filter from a raw bit payload of packed words.
    pub fn from_words(words: &[u64], num_hashes: u64) -> Self {
        let bits = if words.is_empty() {
            BitSetMem::new(1)
        } else {
            BitSetMem::from_words(words)
        };
        BloomFilter {
            size: bits.size().max(1),
            num_hashes: num_hashes.max(1),
            bits: Mutex::new(bits),
        }
    }

    /// Returns the filter width in bits.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the number of hash-derived positions per item.
    pub fn num_hashes(&self) -> u64 {
        self.num_hashes
    }

    /// Inserts an item; after this, [`lookup`](Self::lookup) always returns
    /// `true` for the same bytes.
    pub fn insert(&self, data: &[u8]) {
        let indexes = bit_indexes(data, self.num_hashes, self.size);
        self.bits.lock().set_many(&indexes);
    }

    /// [`insert`](Self::insert) for string data.
    pub fn insert_str(&self, data: &str) {
        self.insert(data.as_bytes());
    }

    /// Returns `true` iff all of the item's bits are set.
    pub fn lookup(&self, data: &[u8]) -> bool {
        let indexes = bit_indexes(data, self.num_hashes, self.size);
        let bits = self.bits.lock();
        indexes.iter().all(|index| bits.has(*index))
    }

    /// [`lookup`](Self::lookup) for string data.
    pub fn lookup_str(&self, data: &str) -> bool {
        self.lookup(data.as_bytes())
    }

    /// Estimates the current false positive rate from the popcount:
    /// `(1 - exp(-count / m))^k`.
    pub fn positive_rate(&self) -> f64 {
        let count = self.bits.lock().bit_count();
        (1.0 - (-(count as f64) / self.size as f64).exp()).powf(self.num_hashes as f64)
    }

    /// Returns whether both filters have the same parameters and bits.
    pub fn equals(&self, other: &BloomFilter) -> bool {
        if self.size != other.size || self.num_hashes != other.num_hashes {
            return false;
        }
        *self.bits.lock() == *other.bits.lock()
    }

    /// Serializes the filter to its JSON envelope.
    pub fn export(&self) -> Result<Vec<u8>, Error> {
        let envelope = BloomEnvelope {
            m: self.size,
            k: self.num_hashes,
            b: self.bits.lock().export(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Reconstructs a filter from an envelope produced by either backend.
    pub fn import(data: &[u8]) -> Result<Self, Error> {
        let envelope: BloomEnvelope = serde_json::from_slice(data)?;
        envelope.check()?;
        let bits = BitSetMem::import(&envelope.b)?;
        Ok(BloomFilter {
            size: envelope.m,
            num_hashes: envelope.k,
            bits: Mutex::new(bits),
        })
    }

    /// Writes the filter onto `stream`: size, hash count, then the bit set
    /// stream form, all big-endian.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), Error> {
        stream.write_u64::<BigEndian>(self.size).map_err(Error::io)?;
        stream
            .write_u64::<BigEndian>(self.num_hashes)
            .map_err(Error::io)?;
        self.bits.lock().write_to(stream)
    }

    /// Reads a filter written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(stream: &mut R) -> Result<Self, Error> {
        let size = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("bloom size"))?;
        let num_hashes = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("bloom hash count"))?;
        if size == 0 || num_hashes == 0 {
            return Err(Error::deserial(
                "bloom size and hash count must be greater than 0",
            ));
        }
        let bits = BitSetMem::read_from(stream)?;
        Ok(BloomFilter {
            size,
            num_hashes,
            bits: Mutex::new(bits),
        })
    }
}
