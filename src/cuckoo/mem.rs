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
use rand::Rng;

use crate::bucket::BucketMem;
use crate::cuckoo::candidates;
use crate::cuckoo::check_parameters;
use crate::cuckoo::partner_index;
use crate::cuckoo::BucketEnvelope;
use crate::cuckoo::CuckooEnvelope;
use crate::cuckoo::DEFAULT_RETRIES;
use crate::error::Error;

/// One step of the eviction trail: the displaced fingerprint and where it
/// sat. Rolling back a failed insert replays the trail in reverse.
struct TrailEntry {
    fingerprint: String,
    bucket: u64,
    slot: usize,
}

#[derive(Debug)]
struct Inner {
    buckets: Vec<BucketMem>,
    length: u64,
}

/// An in-process cuckoo filter.
///
/// Every operation takes the filter's single mutex: eviction touches many
/// buckets and must not interleave with lookups or removals.
#[derive(Debug)]
pub struct CuckooFilter {
    size: u64,
    bucket_size: u64,
    fingerprint_len: u64,
    retries: u64,
    inner: Mutex<Inner>,
}

impl CuckooFilter {
    /// Creates a filter with `size` buckets of `bucket_size` slots, storing
    /// fingerprints of `fingerprint_len` characters, with the default
    /// number of eviction retries.
    pub fn new(size: u64, bucket_size: u64, fingerprint_len: u64) -> Result<Self, Error> {
        Self::with_retries(size, bucket_size, fingerprint_len, DEFAULT_RETRIES)
    }

    /// Creates a filter with an explicit eviction retry budget.
    pub fn with_retries(
        size: u64,
        bucket_size: u64,
        fingerprint_len: u64,
        retries: u64,
    ) -> Result<Self, Error> {
        check_parameters(size, bucket_size, fingerprint_len)?;
        let buckets = (0..size).map(|_| BucketMem::new(bucket_size)).collect();
        Ok(CuckooFilter {
            size,
            bucket_size,
            fingerprint_len,
            retries,
            inner: Mutex::new(Inner { buckets, length: 0 }),
        })
    }

    /// Creates a filter sized for `num_items` at a 0.955 load factor, with
    /// the fingerprint length derived from the target false positive rate.
    pub fn with_accuracy(
        num_items: u64,
        bucket_size: u64,
        retries: u64,
        error_rate: f64,
    ) -> Result<Self, Error> {
        let fingerprint_len = super::fingerprint_length(bucket_size, error_rate);
        let size = super::optimal_size(num_items, bucket_size);
        Self::with_retries(size, bucket_size, fingerprint_len, retries)
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

    /// Returns the number of fingerprints currently stored.
    pub fn length(&self) -> u64 {
        self.inner.lock().length
    }

    /// Returns the total slot count, `size * bucket_size`.
    pub fn cell_count(&self) -> u64 {
        self.size * self.bucket_size
    }

    /// Upper bound on the false positive rate: `2 b / 2^(8 f)`.
    pub fn positive_rate(&self) -> f64 {
        super::positive_rate(self.bucket_size, self.fingerprint_len)
    }

    /// Inserts an item.
    ///
    /// When both candidate buckets are full, occupants are evicted to their
    /// partner buckets for up to `retries` kicks. If the kicks are
    /// exhausted the filter is full: with `destructive = false` every
    /// displacement is rolled back and the bucket array is exactly as
    /// before the call; with `destructive = true` the displacements remain.
    /// Either way [`ErrorKind::FilterFull`](crate::error::ErrorKind) is
    /// returned.
    pub fn insert(&self, data: &[u8], destructive: bool) -> Result<(), Error> {
        let c = candidates(data, self.size, self.fingerprint_len)?;
        let mut inner = self.inner.lock();

        if inner.buckets[c.first as usize].is_free() {
            inner.buckets[c.first as usize].add(&c.fingerprint);
        } else if inner.buckets[c.second as usize].is_free() {
            inner.buckets[c.second as usize].add(&c.fingerprint);
        } else {
            let mut rng = rand::thread_rng();
            let mut index = if rng.gen::<f32>() < 0.5 {
                c.first
            } else {
                c.second
            };
            let mut current = c.fingerprint.clone();
            let mut trail: Vec<TrailEntry> = Vec::new();
            for _ in 0..self.retries {
                let occupied = inner.buckets[index as usize].len();
                let slot = (rng.gen::<f64>() * (occupied - 1) as f64).ceil() as usize;
                let evicted = inner.buckets[index as usize].swap(slot, &current);
                trail.push(TrailEntry {
                    fingerprint: evicted.clone(),
                    bucket: index,
                    slot,
                });
                let partner = partner_index(index, &evicted, self.size);
                if inner.buckets[partner as usize].is_free() {
                    inner.buckets[partner as usize].add(&evicted);
                    inner.length += 1;
                    return Ok(());
                }
                current = evicted;
                index = partner;
            }
            if !destructive {
                for entry in trail.iter().rev() {
                    inner.buckets[entry.bucket as usize].set(entry.slot, &entry.fingerprint);
                }
            }
            return Err(Error::filter_full());
        }
        inner.length += 1;
        Ok(())
    }

    /// Returns whether the item's fingerprint sits in either candidate
    /// bucket.
    pub fn lookup(&self, data: &[u8]) -> Result<bool, Error> {
        let c = candidates(data, self.size, self.fingerprint_len)?;
        let inner = self.inner.lock();
        Ok(inner.buckets[c.first as usize].lookup(&c.fingerprint)
            || inner.buckets[c.second as usize].lookup(&c.fingerprint))
    }

    /// Deletes one occurrence of the item's fingerprint, preferring the
    /// first candidate bucket. Returns whether anything was removed.
    pub fn remove(&self, data: &[u8]) -> Result<bool, Error> {
        let c = candidates(data, self.size, self.fingerprint_len)?;
        let mut inner = self.inner.lock();
        for index in [c.first, c.second] {
            if inner.buckets[index as usize].remove(&c.fingerprint) {
                inner.length -= 1;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns whether both filters hold identical bucket arrays.
    pub fn equals(&self, other: &CuckooFilter) -> bool {
        if self.size != other.size
            || self.bucket_size != other.bucket_size
            || self.fingerprint_len != other.fingerprint_len
        {
            return false;
        }
        let a = self.inner.lock();
        let b = other.inner.lock();
        a.buckets == b.buckets
    }

    /// Serializes the filter to its JSON envelope.
    pub fn export(&self) -> Result<Vec<u8>, Error> {
        let inner = self.inner.lock();
        let buckets = inner
            .buckets
            .iter()
            .map(|bucket| BucketEnvelope {
                s: bucket.capacity(),
                l: bucket.len(),
                e: bucket.elements().to_vec(),
                k: None,
            })
            .collect();
        let envelope = CuckooEnvelope {
            s: self.size,
            bs: self.bucket_size,
            fpl: self.fingerprint_len,
            l: inner.length,
            r: self.retries,
            b: buckets,
            k: None,
            mk: None,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Reconstructs a filter from an envelope produced by either backend,
    /// preserving exact slot positions.
    pub fn import(data: &[u8]) -> Result<Self, Error> {
        let envelope: CuckooEnvelope = serde_json::from_slice(data)?;
        check_parameters(envelope.s, envelope.bs, envelope.fpl)?;
        if envelope.b.len() as u64 != envelope.s {
            return Err(Error::deserial(format!(
                "envelope holds {} buckets, expected {}",
                envelope.b.len(),
                envelope.s
            )));
        }
        let mut length = 0;
        let mut buckets = Vec::with_capacity(envelope.b.len());
        for bucket in envelope.b {
            let mut slots = bucket.e;
            if slots.len() as u64 > envelope.bs {
                return Err(Error::deserial(format!(
                    "envelope bucket holds {} slots, capacity is {}",
                    slots.len(),
                    envelope.bs
                )));
            }
            slots.resize(envelope.bs as usize, String::new());
            let bucket = BucketMem::from_slots(slots);
            length += bucket.len();
            buckets.push(bucket);
        }
        Ok(CuckooFilter {
            size: envelope.s,
            bucket_size: envelope.bs,
            fingerprint_len: envelope.fpl,
            retries: envelope.r,
            inner: Mutex::new(Inner { buckets, length }),
        })
    }

    /// Writes the filter onto `stream`: the five parameters, then every
    /// bucket, all big-endian.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), Error> {
        let inner = self.inner.lock();
        stream.write_u64::<BigEndian>(self.size).map_err(Error::io)?;
        stream
            .write_u64::<BigEndian>(self.bucket_size)
            .map_err(Error::io)?;
        stream
            .write_u64::<BigEndian>(self.fingerprint_len)
            .map_err(Error::io)?;
        stream
            .write_u64::<BigEndian>(inner.length)
            .map_err(Error::io)?;
        stream
            .write_u64::<BigEndian>(self.retries)
            .map_err(Error::io)?;
        for bucket in &inner.buckets {
            bucket.write_to(stream)?;
        }
        Ok(())
    }

    /// Reads a filter written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(stream: &mut R) -> Result<Self, Error> {
        let size = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("cuckoo size"))?;
        let bucket_size = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("cuckoo bucket size"))?;
        let fingerprint_len = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("cuckoo fingerprint length"))?;
        let length = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("cuckoo length"))?;
        let retries = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("cuckoo retries"))?;
        check_parameters(size, bucket_size, fingerprint_len)?;
        let mut buckets = Vec::with_capacity(size as usize);
        for _ in 0..size {
            buckets.push(BucketMem::read_from(stream)?);
        }
        Ok(CuckooFilter {
            size,
            bucket_size,
            fingerprint_len,
            retries,
            inner: Mutex::new(Inner { buckets, length }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_add_delete_add() {
        let filter = CuckooFilter::with_accuracy(20, 4, 500, 0.01).unwrap();
        filter.insert(b"cat", false).unwrap();
        filter.insert(b"dog", false).unwrap();
        assert_eq!(filter.length(), 2);

        assert!(filter.lookup(b"cat").unwrap());
        assert!(!filter.lookup(b"elephant").unwrap());

        assert!(filter.remove(b"dog").unwrap());
        assert!(!filter.lookup(b"dog").unwrap());
        assert!(!filter.remove(b"dog").unwrap());
        assert_eq!(filter.length(), 1);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(CuckooFilter::new(0, 4, 2).is_err());
        assert!(CuckooFilter::new(4, 0, 2).is_err());
        assert!(CuckooFilter::new(4, 4, 0).is_err());
        assert!(CuckooFilter::new(4, 4, 21).is_err());
    }

    #[test]
    fn test_full_filter_rolls_back() {
        let filter = CuckooFilter::new(5, 1, 3).unwrap();
        let items: &[&[u8]] = &[b"one", b"two", b"three", b"four", b"five"];
        for item in items {
            filter.insert(item, false).unwrap();
        }
        let snapshot = filter.export().unwrap();

        let err = filter.insert(b"six", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FilterFull);
        assert_eq!(filter.export().unwrap(), snapshot);
        assert_eq!(filter.length(), 5);

        // Every previously inserted item is still present.
        for item in items {
            assert!(filter.lookup(item).unwrap());
        }
    }

    #[test]
    fn test_destructive_insert_keeps_displacements() {
        let filter = CuckooFilter::new(5, 1, 3).unwrap();
        for item in [&b"one"[..], b"two", b"three", b"four", b"five"] {
            filter.insert(item, false).unwrap();
        }
        let err = filter.insert(b"six", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FilterFull);
        // The trail stays in place; occupancy is unchanged because the
        // final fingerprint never found a home.
        assert_eq!(filter.length(), 5);
    }

    #[test]
    fn test_eviction_keeps_members_reachable() {
        // One-slot buckets force eviction chains well before the table is
        // half full.
        let filter = CuckooFilter::new(64, 1, 4).unwrap();
        let mut inserted = Vec::new();
        for i in 0..32 {
            let item = format!("item-{i}");
            if filter.insert(item.as_bytes(), false).is_ok() {
                inserted.push(item);
            } else {
                break;
            }
        }
        assert!(!inserted.is_empty());
        for item in &inserted {
            assert!(filter.lookup(item.as_bytes()).unwrap(), "{item} lost");
        }
        assert_eq!(filter.length(), inserted.len() as u64);
    }

    #[test]
    fn test_export_import_round_trip() {
        let filter = CuckooFilter::new(20, 4, 3).unwrap();
        filter.insert(b"cat", false).unwrap();
        filter.insert(b"dog", false).unwrap();
        filter.remove(b"cat").unwrap();

        let restored = CuckooFilter::import(&filter.export().unwrap()).unwrap();
        assert!(filter.equals(&restored));
        assert_eq!(restored.length(), 1);
        assert!(restored.lookup(b"dog").unwrap());
        assert!(!restored.lookup(b"cat").unwrap());
    }

    #[test]
    fn test_import_malformed() {
        assert!(CuckooFilter::import(b"{").is_err());
        // Bucket count disagreeing with the size field is rejected.
        assert!(CuckooFilter::import(
            br#"{"s":3,"bs":1,"fpl":3,"l":0,"r":500,"b":[]}"#
        )
        .is_err());
    }

    #[test]
    fn test_stream_round_trip() {
        let filter = CuckooFilter::new(10, 2, 3).unwrap();
        filter.insert(b"alpha", false).unwrap();
        filter.insert(b"beta", false).unwrap();

        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();
        let restored = CuckooFilter::read_from(&mut buffer.as_slice()).unwrap();
        assert!(filter.equals(&restored));
        assert_eq!(restored.length(), 2);
    }
}
