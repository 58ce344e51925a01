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

//! Fixed-width bit arrays backing the Bloom filter.
//!
//! [`BitSetMem`] packs bits into local 64-bit words; [`BitSetRedis`] stores
//! them in a server-side bitmap manipulated with SETBIT/GETBIT/BITCOUNT.
//!
//! Both backends serialize to the same canonical form: the size in bits as a
//! big-endian `u64`, followed by the words in order, each big-endian, with
//! bit `i` held in word `i / 64` at position `i mod 64`. The JSON form is
//! the URL-safe base64 encoding of those bytes. The server bitmap packs
//! bits high-bit-first per byte, so the Redis backend converts between the
//! two layouts on export and import (see `redis.rs`); an export from either
//! backend imports into the other unchanged.

mod mem;
mod redis;

use std::io::Read;
use std::io::Write;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

pub use self::mem::BitSetMem;
pub use self::redis::BitSetRedis;

use crate::error::Error;

/// Number of 64-bit words needed to hold `size` bits.
pub(crate) fn words_for_bits(size: u64) -> usize {
    size.div_ceil(64) as usize
}

/// Writes the canonical binary form: size, then the words, all big-endian.
pub(crate) fn write_words<W: Write>(
    stream: &mut W,
    size: u64,
    words: &[u64],
) -> Result<(), Error> {
    stream
        .write_u64::<BigEndian>(size)
        .map_err(Error::io)?;
    for word in words {
        stream.write_u64::<BigEndian>(*word).map_err(Error::io)?;
    }
    Ok(())
}

/// Reads the canonical binary form written by [`write_words`].
pub(crate) fn read_words<R: Read>(stream: &mut R) -> Result<(u64, Vec<u64>), Error> {
    let size = stream
        .read_u64::<BigEndian>()
        .map_err(|_| Error::insufficient_data("bit set size"))?;
    let mut words = vec![0u64; words_for_bits(size)];
    for word in words.iter_mut() {
        *word = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("bit set words"))?;
    }
    Ok((size, words))
}

/// Encodes the canonical binary form as URL-safe base64.
pub(crate) fn encode_payload(size: u64, words: &[u64]) -> String {
    let mut bytes = Vec::with_capacity(8 + words.len() * 8);
    // Writing into a Vec cannot fail.
    write_words(&mut bytes, size, words).expect("vec write");
    URL_SAFE.encode(bytes)
}

/// Decodes a payload produced by [`encode_payload`].
pub(crate) fn decode_payload(payload: &str) -> Result<(u64, Vec<u64>), Error> {
    let bytes = URL_SAFE
        .decode(payload)
        .map_err(|err| Error::deserial(format!("bit set payload is not base64: {err}")))?;
    let (size, words) = read_words(&mut bytes.as_slice())?;
    Ok((size, words))
}
