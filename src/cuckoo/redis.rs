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

use rand::Rng;
use redis::Commands;
use redis::Connection;

use crate::backend::metadata_field;
use crate::backend::metadata_u64;
use crate::backend::RedisBackend;
use crate::bucket::BucketRedis;
use crate::cuckoo::candidates;
use crate::cuckoo::check_parameters;
use crate::cuckoo::partner_index;
use crate::cuckoo::BucketEnvelope;
use crate::cuckoo::CuckooEnvelope;
use crate::cuckoo::DEFAULT_RETRIES;
use crate::error::Error;
use crate::keys::cuckoo_bucket_key;
use crate::keys::random_key;

/// A cuckoo filter whose buckets live in Redis lists.
///
/// Each bucket mutation is one atomic script maintaining the bucket list
/// and its length counter together. The eviction loop, however, spans many
/// buckets and is **not** atomic as a whole: a concurrent reader may see a
/// fingerprint in both its old and new bucket while a kick is in flight.
/// The filter's total length lives in the metadata hash and is advanced
/// only after the server confirms the bucket mutation.
pub struct RedisCuckooFilter {
    conn: Connection,
    key: String,
    metadata_key: String,
    size: u64,
    bucket_size: u64,
    fingerprint_len: u64,
    retries: u64,
    buckets: Vec<BucketRedis>,
}

impl RedisCuckooFilter {
    /// Creates a filter with `size` buckets of `bucket_size` slots, storing
    /// fingerprints of `fingerprint_len` characters, with the default
    /// number of eviction retries.
    pub fn new(
        backend: &RedisBackend,
        size: u64,
        bucket_size: u64,
        fingerprint_len: u64,
    ) -> Result<Self, Error> {
        Self::with_retries(backend, size, bucket_size, fingerprint_len, DEFAULT_RETRIES)
    }

    /// Creates a filter with an explicit eviction retry budget.
    pub fn with_retries(
        backend: &RedisBackend,
        size: u64,
        bucket_size: u64,
        fingerprint_len: u64,
        retries: u64,
    ) -> Result<Self, Error> {
        check_parameters(size, bucket_size, fingerprint_len)?;
        let conn = backend.connection()?;
        let key = random_key();
        let metadata_key = random_key();
        let mut filter = RedisCuckooFilter {
            conn,
            buckets: bucket_descriptors(&key, size, bucket_size),
            key,
            metadata_key,
            size,
            bucket_size,
            fingerprint_len,
            retries,
        };
        filter.write_metadata(0)?;
        filter.init_buckets()?;
        Ok(filter)
    }

    /// Creates a filter sized for `num_items` at a 0.955 load factor, with
    /// the fingerprint length derived from the target false positive rate.
    pub fn with_accuracy(
        backend: &RedisBackend,
        num_items: u64,
        bucket_size: u64,
        retries: u64,
        error_rate: f64,
    ) -> Result<Self, Error> {
        let fingerprint_len = super::fingerprint_length(bucket_size, error_rate);
        let size = super::optimal_size(num_items, bucket_size);
        Self::with_retries(backend, size, bucket_size, fingerprint_len, retries)
    }

    /// Reattaches to the filter described by the metadata hash at
    /// `metadata_key`. No server-side state is touched.
    pub fn from_metadata_key(backend: &RedisBackend, metadata_key: &str) -> Result<Self, Error> {
        let mut conn = backend.connection()?;
        let metadata: HashMap<String, String> = conn.hgetall(metadata_key)?;
        let size = metadata_u64(&metadata, "size")?;
        let bucket_size = metadata_u64(&metadata, "bucketSize")?;
        let fingerprint_len = metadata_u64(&metadata, "fingerPrintLength")?;
        let retries = metadata_u64(&metadata, "retries")?;
        let key = metadata_field(&metadata, "key")?;
        Ok(RedisCuckooFilter {
            conn,
            buckets: bucket_descriptors(&key, size, bucket_size),
            key,
            metadata_key: metadata_key.to_string(),
            size,
            bucket_size,
            fingerprint_len,
            retries,
        })
    }

    /// Reconstructs a filter from an envelope produced by either backend,
    /// preserving exact slot positions.
    ///
    /// With `with_new_key` the filter lands under fresh random keys;
    /// otherwise the envelope's own keys are reused (an envelope exported
    /// from the in-process backend carries none, which is an error).
    pub fn import(
        backend: &RedisBackend,
        data: &[u8],
        with_new_key: bool,
    ) -> Result<Self, Error> {
        let envelope: CuckooEnvelope = serde_json::from_slice(data)?;
        check_parameters(envelope.s, envelope.bs, envelope.fpl)?;
        if envelope.b.len() as u64 != envelope.s {
            return Err(Error::deserial(format!(
                "envelope holds {} buckets, expected {}",
                envelope.b.len(),
                envelope.s
            )));
        }
        let (key, metadata_key) = if with_new_key {
            (random_key(), random_key())
        } else {
            match (envelope.k.clone(), envelope.mk.clone()) {
                (Some(key), Some(metadata_key)) => (key, metadata_key),
                _ => {
                    return Err(Error::deserial(
                        "envelope carries no server keys; import with a new key",
                    ))
                }
            }
        };
        let conn = backend.connection()?;
        let mut filter = RedisCuckooFilter {
            conn,
            buckets: bucket_descriptors(&key, envelope.s, envelope.bs),
            key,
            metadata_key,
            size: envelope.s,
            bucket_size: envelope.bs,
            fingerprint_len: envelope.fpl,
            retries: envelope.r,
        };
        filter.write_metadata(envelope.l)?;
        let buckets = filter.buckets.clone();
        for (bucket, bucket_env) in buckets.iter().zip(&envelope.b) {
            let mut slots = bucket_env.e.clone();
            slots.resize(envelope.bs as usize, String::new());
            bucket.fill(&mut filter.conn, &slots)?;
        }
        Ok(filter)
    }

    /// Returns the handle under which bucket keys are namespaced.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the key of the metadata hash describing this filter.
    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    /// Returns the number of buckets.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the slots per bucket.
    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    /// Returns the fingerprint length in characters.
    pub fn fingerprint_length(&self) -> u64 {
        self.fingerprint_len
    }

    /// Returns the eviction retry budget.
    pub fn retries(&self) -> u64 {
        self.retries
    }

    /// Returns the total slot count, `size * bucket_size`.
    pub fn cell_count(&self) -> u64 {
        self.size * self.bucket_size
    }

    /// Upper bound on the false positive rate: `2 b / 2^(8 f)`.
    pub fn positive_rate(&self) -> f64 {
        super::positive_rate(self.bucket_size, self.fingerprint_len)
    }

    /// Returns the number of fingerprints currently stored (from the
    /// metadata hash).
    pub fn length(&mut self) -> Result<u64, Error> {
        let length: Option<i64> = self.conn.hget(&self.metadata_key, "length")?;
        Ok(length.unwrap_or(0).max(0) as u64)
    }

    /// Inserts an item; see
    /// [`CuckooFilter::insert`](crate::cuckoo::CuckooFilter::insert) for
    /// the eviction and rollback contract.
    pub fn insert(&mut self, data: &[u8], destructive: bool) -> Result<(), Error> {
        let c = candidates(data, self.size, self.fingerprint_len)?;
        if self.buckets[c.first as usize].is_free(&mut self.conn)? {
            self.buckets[c.first as usize].add(&mut self.conn, &c.fingerprint)?;
        } else if self.buckets[c.second as usize].is_free(&mut self.conn)? {
            self.buckets[c.second as usize].add(&mut self.conn, &c.fingerprint)?;
        } else {
            let mut index = if rand::thread_rng().gen::<f32>() < 0.5 {
                c.first
            } else {
                c.second
            };
            let mut current = c.fingerprint.clone();
            let mut trail: Vec<(String, u64, u64)> = Vec::new();
            for _ in 0..self.retries {
                let occupied = self.buckets[index as usize].len(&mut self.conn)?;
                let slot = (rand::thread_rng().gen::<f64>() * occupied.saturating_sub(1) as f64)
                    .ceil() as u64;
                let evicted =
                    self.buckets[index as usize].swap(&mut self.conn, slot, &current)?;
                trail.push((evicted.clone(), index, slot));
                let partner = partner_index(index, &evicted, self.size);
                if self.buckets[partner as usize].is_free(&mut self.conn)? {
                    self.buckets[partner as usize].add(&mut self.conn, &evicted)?;
                    self.incr_length(1)?;
                    return Ok(());
                }
                current = evicted;
                index = partner;
            }
            if !destructive {
                for (fingerprint, bucket, slot) in trail.iter().rev() {
                    self.buckets[*bucket as usize].set(&mut self.conn, *slot, fingerprint)?;
                }
            }
            return Err(Error::filter_full());
        }
        self.incr_length(1)?;
        Ok(())
    }

    /// Returns whether the item's fingerprint sits in either candidate
    /// bucket.
    pub fn lookup(&mut self, data: &[u8]) -> Result<bool, Error> {
        let c = candidates(data, self.size, self.fingerprint_len)?;
        if self.buckets[c.first as usize].lookup(&mut self.conn, &c.fingerprint)? {
            return Ok(true);
        }
        self.buckets[c.second as usize].lookup(&mut self.conn, &c.fingerprint)
    }

    /// Deletes one occurrence of the item's fingerprint, preferring the
    /// first candidate bucket. Returns whether anything was removed.
    pub fn remove(&mut self, data: &[u8]) -> Result<bool, Error> {
        let c = candidates(data, self.size, self.fingerprint_len)?;
        for index in [c.first, c.second] {
            if self.buckets[index as usize].remove(&mut self.conn, &c.fingerprint)? {
                self.incr_length(-1)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns whether both filters hold identical bucket arrays.
    pub fn equals(&mut self, other: &RedisCuckooFilter) -> Result<bool, Error> {
        if self.size != other.size
            || self.bucket_size != other.bucket_size
            || self.fingerprint_len != other.fingerprint_len
        {
            return Ok(false);
        }
        for (mine, theirs) in self.buckets.iter().zip(&other.buckets) {
            if !mine.equals(&mut self.conn, theirs)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Serializes the filter to the backend-neutral JSON envelope, with the
    /// server keys included so a later import can reattach in place.
    pub fn export(&mut self) -> Result<Vec<u8>, Error> {
        let length = self.length()?;
        let mut buckets = Vec::with_capacity(self.buckets.len());
        for bucket in &self.buckets {
            let elements = bucket.elements(&mut self.conn)?;
            let occupied = bucket.len(&mut self.conn)?;
            buckets.push(BucketEnvelope {
                s: bucket.capacity(),
                l: occupied,
                e: elements,
                k: Some(bucket.key().to_string()),
            });
        }
        let envelope = CuckooEnvelope {
            s: self.size,
            bs: self.bucket_size,
            fpl: self.fingerprint_len,
            l: length,
            r: self.retries,
            b: buckets,
            k: Some(self.key.clone()),
            mk: Some(self.metadata_key.clone()),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Stream output is not available for server-backed filters.
    pub fn write_to<W: std::io::Write>(&self, _stream: &mut W) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream write is not supported for a redis-backed cuckoo filter",
        ))
    }

    /// Stream input is not available for server-backed filters.
    pub fn read_from<R: std::io::Read>(&mut self, _stream: &mut R) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream read is not supported for a redis-backed cuckoo filter",
        ))
    }

    fn write_metadata(&mut self, length: u64) -> Result<(), Error> {
        self.conn.hset_multiple::<_, _, _, ()>(
            &self.metadata_key,
            &[
                ("size", self.size.to_string()),
                ("bucketSize", self.bucket_size.to_string()),
                ("fingerPrintLength", self.fingerprint_len.to_string()),
                ("retries", self.retries.to_string()),
                ("key", self.key.clone()),
                ("length", length.to_string()),
            ],
        )?;
        Ok(())
    }

    fn init_buckets(&mut self) -> Result<(), Error> {
        for bucket in &self.buckets {
            bucket.init(&mut self.conn)?;
        }
        Ok(())
    }

    fn incr_length(&mut self, delta: i64) -> Result<(), Error> {
        self.conn
            .hincr::<_, _, _, i64>(&self.metadata_key, "length", delta)?;
        Ok(())
    }
}

fn bucket_descriptors(key: &str, size: u64, bucket_size: u64) -> Vec<BucketRedis> {
    (0..size)
        .map(|index| BucketRedis::new(cuckoo_bucket_key(key, index), bucket_size))
        .collect()
}

impl fmt::Debug for RedisCuckooFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCuckooFilter")
            .field("size", &self.size)
            .field("bucket_size", &self.bucket_size)
            .field("fingerprint_len", &self.fingerprint_len)
            .field("retries", &self.retries)
            .field("key", &self.key)
            .field("metadata_key", &self.metadata_key)
            .finish()
    }
}
