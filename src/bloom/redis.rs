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

use std::collections::HashMap;
use std::fmt;

use redis::Commands;
use redis::Connection;

use crate::backend::metadata_field;
use crate::backend::metadata_u64;
use crate::backend::RedisBackend;
use crate::bitset::BitSetRedis;
use crate::bloom::bit_indexes;
use crate::bloom::BloomEnvelope;
use crate::error::Error;
use crate::keys::random_key;

/// A Bloom filter whose bits live in a Redis bitmap.
///
/// Construction writes a metadata hash (`size`, `numHashes`, `bitsetKey`)
/// at a random key; [`from_metadata_key`](Self::from_metadata_key)
/// reattaches a client to that state. Each insert or lookup batches its `k`
/// bit operations into one pipelined round-trip; the single-threaded server
/// is the serialization point, so no client-side locking is performed.
pub struct RedisBloomFilter {
    conn: Connection,
    size: u64,
    num_hashes: u64,
    bits: BitSetRedis,
    metadata_key: String,
}

impl RedisBloomFilter {
    /// Creates a filter sized for `num_items` expected insertions at the
    /// target false positive rate.
    pub fn with_accuracy(
        backend: &RedisBackend,
        num_items: u64,
        error_rate: f64,
    ) -> Result<Self, Error> {
        let size = super::optimal_size(num_items, error_rate);
        let num_hashes = super::optimal_num_hashes(size, num_items);
        let mut conn = backend.connection()?;
        let bits = BitSetRedis::create(&mut conn, size)?;
        Self::with_bitset(conn, size, num_hashes, bits)
    }

    /// Creates a filter from a raw bit payload of packed words.
    pub fn from_words(
        backend: &RedisBackend,
        words: &[u64],
        num_hashes: u64,
    ) -> Result<Self, Error> {
        let mut conn = backend.connection()?;
        let bits = BitSetRedis::from_words(&mut conn, words)?;
        let size = bits.size();
        Self::with_bitset(conn, size.max(1), num_hashes.max(1), bits)
    }

    /// Reattaches to the filter described by the metadata hash at
    /// `metadata_key`.
    pub fn from_metadata_key(backend: &RedisBackend, metadata_key: &str) -> Result<Self, Error> {
        let mut conn = backend.connection()?;
        let metadata: HashMap<String, String> = conn.hgetall(metadata_key)?;
        let size = metadata_u64(&metadata, "size")?;
        let num_hashes = metadata_u64(&metadata, "numHashes")?;
        let bitset_key = metadata_field(&metadata, "bitsetKey")?;
        let bits = BitSetRedis::from_key(&mut conn, &bitset_key)?;
        Ok(RedisBloomFilter {
            conn,
            size,
            num_hashes,
            bits,
            metadata_key: metadata_key.to_string(),
        })
    }

    /// Reconstructs a filter under fresh keys from an envelope produced by
    /// either backend.
    pub fn import(backend: &RedisBackend, data: &[u8]) -> Result<Self, Error> {
        let envelope: BloomEnvelope = serde_json::from_slice(data)?;
        envelope.check()?;
        let mut conn = backend.connection()?;
        let bits = BitSetRedis::import(&mut conn, &envelope.b)?;
        Self::with_bitset(conn, envelope.m, envelope.k, bits)
    }

    fn with_bitset(
        mut conn: Connection,
        size: u64,
        num_hashes: u64,
        bits: BitSetRedis,
    ) -> Result<Self, Error> {
        let metadata_key = random_key();
        conn.hset_multiple::<_, _, _, ()>(
            &metadata_key,
            &[
                ("size", size.to_string()),
                ("numHashes", num_hashes.to_string()),
                ("bitsetKey", bits.key().to_string()),
            ],
        )?;
        Ok(RedisBloomFilter {
            conn,
            size,
            num_hashes,
            bits,
            metadata_key,
        })
    }

    /// Returns the filter width in bits.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the number of hash-derived positions per item.
    pub fn num_hashes(&self) -> u64 {
        self.num_hashes
    }

    /// Returns the key of the metadata hash describing this filter.
    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    /// Inserts an item, batching its bit writes into one round-trip.
    pub fn insert(&mut self, data: &[u8]) -> Result<(), Error> {
        let indexes = bit_indexes(data, self.num_hashes, self.size);
        self.bits.set_many(&mut self.conn, &indexes)
    }

    /// [`insert`](Self::insert) for string data.
    pub fn insert_str(&mut self, data: &str) -> Result<(), Error> {
        self.insert(data.as_bytes())
    }

    /// Returns `true` iff all of the item's bits are set.
    pub fn lookup(&mut self, data: &[u8]) -> Result<bool, Error> {
        let indexes = bit_indexes(data, self.num_hashes, self.size);
        let bits = self.bits.has_many(&mut self.conn, &indexes)?;
        Ok(bits.into_iter().all(|bit| bit))
    }

    /// [`lookup`](Self::lookup) for string data.
    pub fn lookup_str(&mut self, data: &str) -> Result<bool, Error> {
        self.lookup(data.as_bytes())
    }

    /// Estimates the current false positive rate from the popcount:
    /// `(1 - exp(-count / m))^k`.
    pub fn positive_rate(&mut self) -> Result<f64, Error> {
        let count = self.bits.bit_count(&mut self.conn)?;
        Ok((1.0 - (-(count as f64) / self.size as f64).exp()).powf(self.num_hashes as f64))
    }

    /// Returns whether both filters have the same parameters and bitmaps.
    pub fn equals(&mut self, other: &RedisBloomFilter) -> Result<bool, Error> {
        if self.size != other.size || self.num_hashes != other.num_hashes {
            return Ok(false);
        }
        self.bits.equals(&mut self.conn, &other.bits)
    }

    /// Serializes the filter to the backend-neutral JSON envelope.
    pub fn export(&mut self) -> Result<Vec<u8>, Error> {
        let envelope = BloomEnvelope {
            m: self.size,
            k: self.num_hashes,
            b: self.bits.export(&mut self.conn)?,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Stream output is not available for server-backed filters.
    pub fn write_to<W: std::io::Write>(&self, _stream: &mut W) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream write is not supported for a redis-backed bloom filter",
        ))
    }

    /// Stream input is not available for server-backed filters.
    pub fn read_from<R: std::io::Read>(&mut self, _stream: &mut R) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream read is not supported for a redis-backed bloom filter",
        ))
    }
}

impl fmt::Debug for RedisBloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBloomFilter")
            .field("size", &self.size)
            .field("num_hashes", &self.num_hashes)
            .field("bitset_key", &self.bits.key())
            .field("metadata_key", &self.metadata_key)
            .finish()
    }
}
