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

use redis::Commands;
use redis::Connection;

use crate::bitset::decode_payload;
use crate::bitset::encode_payload;
use crate::bitset::words_for_bits;
use crate::error::Error;
use crate::keys::random_key;

/// A fixed-width bit array stored as a Redis bitmap.
///
/// The value is a string key manipulated with SETBIT/GETBIT; bit indices
/// match the in-process [`BitSetMem`](crate::bitset::BitSetMem) numbering.
/// The descriptor itself holds no connection: every operation borrows one,
/// typically owned by the filter that owns this set. The server being
/// single-threaded is the serialization point; no client-side locking is
/// performed.
#[derive(Debug, Clone)]
pub struct BitSetRedis {
    key: String,
    size: u64,
}

impl BitSetRedis {
    /// Creates a zeroed bitmap of `size` bits under a fresh random key.
    pub fn create(conn: &mut Connection, size: u64) -> Result<Self, Error> {
        let key = random_key();
        let zeroes = vec![0u8; words_for_bits(size) * 8];
        conn.set::<_, _, ()>(&key, zeroes)?;
        Ok(BitSetRedis { key, size })
    }

    /// Creates a bitmap under a fresh key, initialized from raw words; the
    /// size is `64 * words.len()`.
    pub fn from_words(conn: &mut Connection, words: &[u64]) -> Result<Self, Error> {
        let key = random_key();
        conn.set::<_, _, ()>(&key, words_to_bitmap(words))?;
        Ok(BitSetRedis {
            key,
            size: words.len() as u64 * 64,
        })
    }

    /// Attaches to an existing bitmap; the size is taken from the stored
    /// value length.
    pub fn from_key(conn: &mut Connection, key: &str) -> Result<Self, Error> {
        let value: Option<Vec<u8>> = conn.get(key)?;
        let value = value.ok_or_else(|| Error::backend(format!("no bitmap at key {key}")))?;
        Ok(BitSetRedis {
            key: key.to_string(),
            size: value.len() as u64 * 8,
        })
    }

    /// Reconstructs a bitmap under a fresh key from a payload produced by
    /// [`export`](Self::export) (on either backend).
    pub fn import(conn: &mut Connection, payload: &str) -> Result<Self, Error> {
        let (size, words) = decode_payload(payload)?;
        let key = random_key();
        conn.set::<_, _, ()>(&key, words_to_bitmap(&words))?;
        Ok(BitSetRedis { key, size })
    }

    /// Returns the server-side key of the bitmap.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the number of bits.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns whether bit `index` is set.
    pub fn has(&self, conn: &mut Connection, index: u64) -> Result<bool, Error> {
        Ok(conn.getbit(&self.key, index as usize)?)
    }

    /// Reads every bit in `indexes` with one pipelined round-trip.
    pub fn has_many(&self, conn: &mut Connection, indexes: &[u64]) -> Result<Vec<bool>, Error> {
        if indexes.is_empty() {
            return Err(Error::invalid_argument("at least 1 index is required"));
        }
        let mut pipe = redis::pipe();
        for index in indexes {
            pipe.getbit(&self.key, *index as usize);
        }
        Ok(pipe.query(conn)?)
    }

    /// Sets bit `index`.
    pub fn set(&self, conn: &mut Connection, index: u64) -> Result<(), Error> {
        conn.setbit::<_, ()>(&self.key, index as usize, true)?;
        Ok(())
    }

    /// Sets every bit in `indexes` with one pipelined round-trip.
    pub fn set_many(&self, conn: &mut Connection, indexes: &[u64]) -> Result<(), Error> {
        if indexes.is_empty() {
            return Err(Error::invalid_argument("at least 1 index is required"));
        }
        let mut pipe = redis::pipe();
        for index in indexes {
            pipe.setbit(&self.key, *index as usize, true).ignore();
        }
        pipe.query::<()>(conn)?;
        Ok(())
    }

    /// Returns the number of set bits (server-side BITCOUNT).
    pub fn bit_count(&self, conn: &mut Connection) -> Result<u64, Error> {
        Ok(conn.bitcount(&self.key)?)
    }

    /// Returns the index of the lowest set bit, or `None` if no bit is set.
    pub fn first_set(&self, conn: &mut Connection) -> Result<Option<u64>, Error> {
        let pos: i64 = redis::cmd("BITPOS").arg(&self.key).arg(1).query(conn)?;
        Ok((pos >= 0).then_some(pos as u64))
    }

    /// Returns whether the two stored bitmaps are byte-for-byte equal.
    pub fn equals(&self, conn: &mut Connection, other: &BitSetRedis) -> Result<bool, Error> {
        let a: Option<Vec<u8>> = conn.get(&self.key)?;
        let b: Option<Vec<u8>> = conn.get(&other.key)?;
        Ok(a.unwrap_or_default() == b.unwrap_or_default())
    }

    /// Serializes to the canonical base64 payload shared with the
    /// in-process backend.
    pub fn export(&self, conn: &mut Connection) -> Result<String, Error> {
        let value: Option<Vec<u8>> = conn.get(&self.key)?;
        let words = bitmap_to_words(&value.unwrap_or_default());
        Ok(encode_payload(self.size, &words))
    }
}

/// Converts packed words (bit `i mod 64` of word `i / 64`) into the server
/// bitmap layout (bit `i mod 8` of byte `i / 8`, high bit first).
///
/// Per 8-byte group this is the little-endian byte order of the word with
/// the bit order reversed inside each byte; the canonical big-endian form is
/// recovered by undoing both reversals.
fn words_to_bitmap(words: &[u64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 8);
    for word in words {
        bytes.extend(word.to_le_bytes().map(u8::reverse_bits));
    }
    bytes
}

/// Inverse of [`words_to_bitmap`]; trailing partial groups are zero-padded.
fn bitmap_to_words(bytes: &[u8]) -> Vec<u64> {
    let mut words = Vec::with_capacity(bytes.len().div_ceil(8));
    for chunk in bytes.chunks(8) {
        let mut group = [0u8; 8];
        group[..chunk.len()].copy_from_slice(chunk);
        words.push(u64::from_le_bytes(group.map(u8::reverse_bits)));
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_layout_round_trip() {
        let words = vec![0x0123_4567_89ab_cdef, 0x8000_0000_0000_0001];
        assert_eq!(bitmap_to_words(&words_to_bitmap(&words)), words);
    }

    #[test]
    fn test_bitmap_bit_numbering() {
        // Bit 0 of the word layout must land on bit 0 of the bitmap layout,
        // which the server stores as the high bit of the first byte.
        let bytes = words_to_bitmap(&[1]);
        assert_eq!(bytes[0], 0b1000_0000);

        // Bit 9 lands in byte 1, second-highest position.
        let bytes = words_to_bitmap(&[1 << 9]);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], 0b0100_0000);
    }

    #[test]
    fn test_bitmap_padding() {
        let words = bitmap_to_words(&[0b1000_0000, 0, 0]);
        assert_eq!(words, vec![1]);
    }
}
