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

use once_cell::sync::Lazy;
use redis::Commands;
use redis::Connection;
use redis::Script;

use crate::backend::metadata_f64;
use crate::backend::metadata_field;
use crate::backend::metadata_u64;
use crate::backend::RedisBackend;
use crate::countmin::RedisCountMinSketch;
use crate::error::Error;
use crate::keys::random_key;
use crate::topk::sort_values;
use crate::topk::HeapEntryEnvelope;
use crate::topk::TopKElement;
use crate::topk::TopKEnvelope;

/// KEYS: heap sorted set. ARGV: element, frequency, k.
/// Admits the element when there is room or its frequency reaches the
/// current minimum, then evicts the smallest entry past `k`.
static PUSH_HEAP: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local size = redis.call('ZCARD', KEYS[1])
        local admit = size < tonumber(ARGV[3])
        if not admit then
            local minimum = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
            admit = tonumber(ARGV[2]) >= tonumber(minimum[2])
        end
        if admit then
            if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
                redis.call('ZREM', KEYS[1], ARGV[1])
            end
            redis.call('ZADD', KEYS[1], tonumber(ARGV[2]), ARGV[1])
            if redis.call('ZCARD', KEYS[1]) > tonumber(ARGV[3]) then
                redis.call('ZPOPMIN', KEYS[1])
            end
        end
        return 1
    "#,
    )
});

/// KEYS: first heap, second heap.
/// Compares members and scores of the two sorted sets.
static EQUALS_HEAPS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local mine = redis.call('ZRANGE', KEYS[1], 0, -1, 'WITHSCORES')
        local theirs = redis.call('ZRANGE', KEYS[2], 0, -1, 'WITHSCORES')
        if #mine ~= #theirs then
            return 0
        end
        for i = 1, #mine do
            if mine[i] ~= theirs[i] then
                return 0
            end
        end
        return 1
    "#,
    )
});

/// KEYS: heap sorted set. ARGV: element and frequency pairs.
/// Replaces the heap wholesale (import path).
static SET_HEAP: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        redis.call('DEL', KEYS[1])
        for i = 1, #ARGV, 2 do
            redis.call('ZADD', KEYS[1], tonumber(ARGV[i + 1]), ARGV[i])
        end
        return 1
    "#,
    )
});

/// A Top-K tracker whose heap lives in a Redis sorted set scored by
/// frequency.
///
/// The embedded sketch is a [`RedisCountMinSketch`]; the conditional heap
/// update (size check, minimum check, replace, evict) runs as one atomic
/// script.
pub struct RedisTopK {
    conn: Connection,
    k: u64,
    error_rate: f64,
    accuracy: f64,
    sketch: RedisCountMinSketch,
    heap_key: String,
    metadata_key: String,
}

impl RedisTopK {
    /// Creates a tracker for the `k` heaviest elements, with the embedded
    /// sketch sized from `(error_rate, accuracy)`.
    pub fn new(
        backend: &RedisBackend,
        k: u64,
        error_rate: f64,
        accuracy: f64,
    ) -> Result<Self, Error> {
        if k == 0 {
            return Err(Error::invalid_argument("k must be greater than 0"));
        }
        let sketch = RedisCountMinSketch::from_estimates(backend, error_rate, accuracy)?;
        let conn = backend.connection()?;
        let mut topk = RedisTopK {
            conn,
            k,
            error_rate,
            accuracy,
            sketch,
            heap_key: random_key(),
            metadata_key: random_key(),
        };
        topk.write_metadata()?;
        Ok(topk)
    }

    /// Reattaches to the tracker described by the metadata hash at
    /// `metadata_key`. The embedded sketch is reattached through its own
    /// metadata handle (`sketchKey`).
    pub fn from_metadata_key(backend: &RedisBackend, metadata_key: &str) -> Result<Self, Error> {
        let mut conn = backend.connection()?;
        let metadata: HashMap<String, String> = conn.hgetall(metadata_key)?;
        let k = metadata_u64(&metadata, "k")?;
        let heap_key = metadata_field(&metadata, "heapKey")?;
        let error_rate = metadata_f64(&metadata, "errorRate")?;
        let accuracy = metadata_f64(&metadata, "accuracy")?;
        let sketch_key = metadata_field(&metadata, "sketchKey")?;
        let sketch = RedisCountMinSketch::from_metadata_key(backend, &sketch_key)?;
        Ok(RedisTopK {
            conn,
            k,
            error_rate,
            accuracy,
            sketch,
            heap_key,
            metadata_key: metadata_key.to_string(),
        })
    }

    /// Reconstructs a tracker from an envelope produced by either backend.
    ///
    /// With `with_new_key` the heap lands under a fresh random key;
    /// otherwise the envelope's own key is reused (an envelope exported
    /// from the in-process backend carries none, which is an error). The
    /// embedded sketch always lands under fresh keys.
    pub fn import(
        backend: &RedisBackend,
        data: &[u8],
        with_new_key: bool,
    ) -> Result<Self, Error> {
        let envelope: TopKEnvelope = serde_json::from_slice(data)?;
        let heap_key = if with_new_key {
            random_key()
        } else {
            envelope.hk.clone().ok_or_else(|| {
                Error::deserial("envelope carries no server key; import with a new key")
            })?
        };
        let sketch = RedisCountMinSketch::from_envelope(backend, envelope.s)?;
        let conn = backend.connection()?;
        let mut topk = RedisTopK {
            conn,
            k: envelope.k,
            error_rate: envelope.e,
            accuracy: envelope.a,
            sketch,
            heap_key,
            metadata_key: random_key(),
        };
        topk.write_metadata()?;
        let mut invocation = SET_HEAP.prepare_invoke();
        invocation.key(topk.heap_key.as_str());
        for entry in &envelope.h {
            invocation.arg(entry.v.as_str()).arg(entry.f);
        }
        invocation.invoke::<()>(&mut topk.conn)?;
        Ok(topk)
    }

    /// Returns `k`.
    pub fn k(&self) -> u64 {
        self.k
    }

    /// Returns the key of the heap sorted set.
    pub fn heap_key(&self) -> &str {
        &self.heap_key
    }

    /// Returns the key of the metadata hash describing this tracker.
    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    /// Records `count` occurrences of the element; see
    /// [`TopK::insert`](crate::topk::TopK::insert) for the admission rule.
    pub fn insert(&mut self, data: &[u8], count: u64) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::invalid_argument("count must be greater than zero"));
        }
        let element = String::from_utf8_lossy(data).into_owned();
        self.sketch.update(data, count)?;
        let frequency = self.sketch.count(data)?;
        PUSH_HEAP
            .key(&self.heap_key)
            .arg(element)
            .arg(frequency)
            .arg(self.k)
            .invoke::<()>(&mut self.conn)?;
        Ok(())
    }

    /// Returns the tracked elements ordered by count descending, ties
    /// broken lexicographically ascending.
    pub fn values(&mut self) -> Result<Vec<TopKElement>, Error> {
        let entries: Vec<(String, f64)> =
            self.conn.zrange_withscores(&self.heap_key, 0, -1)?;
        let mut values: Vec<TopKElement> = entries
            .into_iter()
            .map(|(element, count)| TopKElement {
                element,
                count: count as u64,
            })
            .collect();
        sort_values(&mut values);
        Ok(values)
    }

    /// Returns whether both trackers have the same parameters, sketches
    /// and heap contents.
    pub fn equals(&mut self, other: &RedisTopK) -> Result<bool, Error> {
        if self.k != other.k
            || self.error_rate != other.error_rate
            || self.accuracy != other.accuracy
        {
            return Ok(false);
        }
        if !self.sketch.equals(&other.sketch)? {
            return Ok(false);
        }
        let equal: i64 = EQUALS_HEAPS
            .key(&self.heap_key)
            .key(&other.heap_key)
            .invoke(&mut self.conn)?;
        Ok(equal == 1)
    }

    /// Serializes the tracker to the backend-neutral JSON envelope.
    pub fn export(&mut self) -> Result<Vec<u8>, Error> {
        let sketch = self.sketch.to_envelope()?;
        let heap = self
            .values()?
            .into_iter()
            .map(|value| HeapEntryEnvelope {
                v: value.element,
                f: value.count,
            })
            .collect();
        let envelope = TopKEnvelope {
            k: self.k,
            e: self.error_rate,
            a: self.accuracy,
            s: sketch,
            h: heap,
            hk: Some(self.heap_key.clone()),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Stream output is not available for server-backed trackers.
    pub fn write_to<W: std::io::Write>(&self, _stream: &mut W) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream write is not supported for a redis-backed top-k",
        ))
    }

    /// Stream input is not available for server-backed trackers.
    pub fn read_from<R: std::io::Read>(&mut self, _stream: &mut R) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream read is not supported for a redis-backed top-k",
        ))
    }

    fn write_metadata(&mut self) -> Result<(), Error> {
        self.conn.hset_multiple::<_, _, _, ()>(
            &self.metadata_key,
            &[
                ("k", self.k.to_string()),
                ("heapKey", self.heap_key.clone()),
                ("errorRate", self.error_rate.to_string()),
                ("accuracy", self.accuracy.to_string()),
                ("sketchKey", self.sketch.metadata_key().to_string()),
            ],
        )?;
        Ok(())
    }
}

impl fmt::Debug for RedisTopK {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTopK")
            .field("k", &self.k)
            .field("heap_key", &self.heap_key)
            .field("metadata_key", &self.metadata_key)
            .finish()
    }
}
